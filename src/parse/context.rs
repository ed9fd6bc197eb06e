//! Per-parse state: the current item and the query built so far.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::{QueryModelError, Result};
use crate::expr::{ExprRef, LambdaExpr};
use crate::model::{
    BodyClause, MainFromClause, OrderByClause, QueryModel, ResultOperator, SelectClause,
    ShapeChain, SourceId, StreamedData,
};
use crate::resolve::resolve_lambda;
use crate::types::DataType;

use super::subquery::SubqueryFinder;
use super::QueryParser;

/// Generates item names for sources no lambda parameter names.
#[derive(Debug)]
pub(crate) struct NameGenerator {
    prefix: String,
    next: usize,
}

impl NameGenerator {
    pub(crate) fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            next: 0,
        }
    }

    pub(crate) fn fresh(&mut self) -> String {
        let name = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        name
    }
}

/// Query under construction while a chain is folded, innermost call first.
///
/// The current projection doubles as the *current item*: what a lambda
/// parameter of the next call stands for.
pub struct ChainContext<'p> {
    parser: &'p QueryParser,
    names: &'p mut NameGenerator,
    outer_scope: BTreeSet<SourceId>,
    main_from: MainFromClause,
    body: Vec<BodyClause>,
    selector: ExprRef,
    result_operators: Vec<ResultOperator>,
    shape: Option<ShapeChain>,
}

impl<'p> ChainContext<'p> {
    pub(crate) fn new(
        parser: &'p QueryParser,
        names: &'p mut NameGenerator,
        outer_scope: BTreeSet<SourceId>,
        main_from: MainFromClause,
    ) -> Self {
        let selector = main_from.reference();
        Self {
            parser,
            names,
            outer_scope,
            main_from,
            body: Vec::new(),
            selector,
            result_operators: Vec::new(),
            shape: None,
        }
    }

    /// What one item looks like at this point of the chain.
    pub fn current_item(&self) -> &ExprRef {
        &self.selector
    }

    /// Result operators collected since the last wrap.
    pub fn result_operators(&self) -> &[ResultOperator] {
        &self.result_operators
    }

    /// A new generated item name.
    pub fn fresh_name(&mut self) -> String {
        self.names.fresh()
    }

    /// Prepares for a call that adds a clause. Clauses cannot follow result
    /// operators, so any collected operators push the query built so far into
    /// a subquery that becomes the new main source, named after `name_hint`.
    pub fn begin_clause(&mut self, name_hint: Option<&str>) -> Result<()> {
        if self.result_operators.is_empty() {
            return Ok(());
        }
        self.wrap_in_subquery(name_hint)
    }

    /// Prepares for a lambda over the current item. After an operator that
    /// changes what an item is (grouping, casting, aggregating) the current
    /// projection no longer describes the item, so the query is wrapped.
    pub fn prepare_lambda_scope(&mut self, name_hint: Option<&str>) -> Result<()> {
        if self
            .result_operators
            .iter()
            .all(ResultOperator::is_item_preserving)
        {
            return Ok(());
        }
        self.wrap_in_subquery(name_hint)
    }

    fn wrap_in_subquery(&mut self, name_hint: Option<&str>) -> Result<()> {
        let item_type = match self.shape.as_ref().map(ShapeChain::current) {
            Some(StreamedData::Sequence { item_type }) => item_type.clone(),
            Some(other) => {
                return Err(QueryModelError::unrecognized(
                    self.render(),
                    format!("the chain cannot continue after a {} result", other.kind()),
                ))
            }
            None => self.selector.data_type(),
        };
        let name = match name_hint {
            Some(hint) => hint.to_owned(),
            None => match self.result_operators.last() {
                Some(ResultOperator::GroupBy { item_name, .. }) => item_name.clone(),
                _ => self.names.fresh(),
            },
        };
        let main_from = MainFromClause::new(name.clone(), item_type, Arc::clone(&self.selector));
        let previous = std::mem::replace(&mut self.main_from, main_from);
        let inner = QueryModel::from_parts(
            previous,
            std::mem::take(&mut self.body),
            SelectClause::new(Arc::clone(&self.selector)),
            std::mem::take(&mut self.result_operators),
            self.outer_scope.clone(),
        )?;
        self.main_from.from_expression = crate::expr::Expr::subquery(inner);
        self.selector = self.main_from.reference();
        self.shape = None;
        debug!(item = %name, "query.parse.wrap_subquery");
        Ok(())
    }

    /// Resolves a one-parameter lambda against the current item.
    pub fn resolve(&mut self, lambda: &LambdaExpr) -> Result<ExprRef> {
        let item = Arc::clone(&self.selector);
        self.resolve_with(lambda, &[item])
    }

    /// Resolves `lambda` with its parameters bound to `args`, then parses any
    /// query chains left in the body as subqueries.
    pub fn resolve_with(&mut self, lambda: &LambdaExpr, args: &[ExprRef]) -> Result<ExprRef> {
        let resolved = resolve_lambda(lambda, args)?;
        self.prepare_argument(&resolved)
    }

    /// Parses query chains inside a non-lambda argument as subqueries.
    pub fn prepare_argument(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        if !self.parser.config().detect_subqueries {
            return Ok(Arc::clone(expr));
        }
        let scope = self.visible_sources();
        SubqueryFinder::new(self.parser, &mut *self.names, scope).find(expr)
    }

    /// Sources a nested query may correlate with.
    pub fn visible_sources(&self) -> BTreeSet<SourceId> {
        let mut scope = self.outer_scope.clone();
        scope.insert(self.main_from.id());
        scope.extend(self.body.iter().filter_map(BodyClause::source_id));
        scope
    }

    /// Appends a body clause.
    pub fn add_body_clause(&mut self, clause: BodyClause) {
        debug!(clause = clause.kind(), "query.parse.clause");
        self.body.push(clause);
    }

    /// The ordering clause a `ThenBy` call extends: the last body clause, if
    /// it is an ordering and no result operator followed it.
    pub fn last_ordering(&mut self) -> Option<&mut OrderByClause> {
        if !self.result_operators.is_empty() {
            return None;
        }
        match self.body.last_mut() {
            Some(BodyClause::OrderBy(clause)) => Some(clause),
            _ => None,
        }
    }

    /// Replaces the projection (and with it the current item).
    pub fn set_selector(&mut self, selector: ExprRef) {
        self.selector = selector;
    }

    /// Appends a result operator, checking it against the shape so far.
    pub fn add_result_operator(&mut self, op: ResultOperator) -> Result<()> {
        let selector_type = self.selector.data_type();
        let shape = self
            .shape
            .get_or_insert_with(|| ShapeChain::new(StreamedData::sequence(selector_type)));
        shape.push(&op)?;
        debug!(operator = op.name(), "query.parse.result_operator");
        self.result_operators.push(op);
        Ok(())
    }

    /// Item type of the current item.
    pub fn item_type(&self) -> DataType {
        self.selector.data_type()
    }

    fn render(&self) -> String {
        let mut out = format!(
            "from {} in {}",
            self.main_from.item_name, self.main_from.from_expression
        );
        for clause in &self.body {
            out.push_str(&format!(" {clause}"));
        }
        out.push_str(&format!(" select {}", self.selector));
        for op in &self.result_operators {
            out.push_str(&format!(" => {op}"));
        }
        out
    }

    pub(crate) fn finish(self) -> Result<QueryModel> {
        let model = QueryModel::from_parts(
            self.main_from,
            self.body,
            SelectClause::new(self.selector),
            self.result_operators,
            self.outer_scope,
        )?;
        debug!(
            body_clauses = model.body_clauses().len(),
            result_operators = model.result_operators().len(),
            "query.parse.complete"
        );
        Ok(model)
    }
}
