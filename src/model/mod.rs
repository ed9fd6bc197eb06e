//! Normalized query model: a main source, ordered body clauses, a projection,
//! and a chain of result operators.
//!
//! A model is only ever changed through the methods on [`QueryModel`]. Each of
//! them validates the no-forward-reference rule for the items it touches and
//! commits atomically, so a rejected mutation leaves the model unchanged.
//!
//! Clause order doubles as scope: a reference node inside the clause at body
//! position `i` may only point at the main source, at sources declared by body
//! clauses before `i`, at the clause's own source for non-sequence
//! expressions, or at one of the model's outer-scope sources (a subquery's
//! correlation with its enclosing model).

mod clause;
mod clone;
mod execute;
mod explain;
mod result_operator;
mod shape;

use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::error::{QueryModelError, Result};
use crate::expr::{walk, Expr, ExprRef, ExprVisitor, SourceRef};
use crate::types::DataType;

pub use clause::{
    AdditionalFromClause, BodyClause, JoinClause, MainFromClause, OrderByClause, Ordering,
    OrderingDirection, QuerySource, SelectClause, SourceId, WhereClause,
};
pub use clone::QuerySourceMapping;
pub use execute::{QueryExecutor, QueryOutput};
pub use explain::{ExplainNode, ExplainProp, ModelExplain};
pub use result_operator::{ResultOperator, SetOperationKind};
pub use shape::{compose, ShapeChain, StreamedData};

use clause::ExprMapper;

/// How the outer scope of a rewritten model is derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OuterScope {
    /// Keep the original outer scope; the rewrite must not add correlations.
    Keep,
    /// Recompute it from the free references left after the rewrite.
    Infer,
}

/// A normalized query.
///
/// `Clone` is a structural copy that keeps source identities; use
/// [`QueryModel::deep_clone`] for an independent copy with fresh identities.
#[derive(Clone, Debug)]
pub struct QueryModel {
    main_from: MainFromClause,
    body_clauses: Vec<BodyClause>,
    select: SelectClause,
    result_operators: Vec<ResultOperator>,
    outer_scope: BTreeSet<SourceId>,
    /// Declared source → scope position (main = 0, body clause `i` = `i + 1`).
    declared: FxHashMap<SourceId, usize>,
    /// Occurrences of every referenced source across all owned expressions.
    references: FxHashMap<SourceId, usize>,
}

impl PartialEq for QueryModel {
    fn eq(&self, other: &Self) -> bool {
        self.main_from == other.main_from
            && self.body_clauses == other.body_clauses
            && self.select == other.select
            && self.result_operators == other.result_operators
    }
}

impl QueryModel {
    /// Model selecting `select` from `main_from` with no body clauses.
    pub fn new(main_from: MainFromClause, select: SelectClause) -> Result<Self> {
        Self::from_parts(main_from, Vec::new(), select, Vec::new(), BTreeSet::new())
    }

    /// Builds and fully validates a model from its parts.
    ///
    /// `outer_scope` lists sources of enclosing models the parts may refer to.
    pub fn from_parts(
        main_from: MainFromClause,
        body_clauses: Vec<BodyClause>,
        select: SelectClause,
        result_operators: Vec<ResultOperator>,
        outer_scope: BTreeSet<SourceId>,
    ) -> Result<Self> {
        let mut model = Self {
            main_from,
            body_clauses,
            select,
            result_operators,
            outer_scope,
            declared: FxHashMap::default(),
            references: FxHashMap::default(),
        };
        model.reindex()?;
        model.validate()?;
        Ok(model)
    }

    /// The main source.
    pub fn main_from(&self) -> &MainFromClause {
        &self.main_from
    }

    /// Body clauses in order.
    pub fn body_clauses(&self) -> &[BodyClause] {
        &self.body_clauses
    }

    /// The projection.
    pub fn select_clause(&self) -> &SelectClause {
        &self.select
    }

    /// Result operators in application order.
    pub fn result_operators(&self) -> &[ResultOperator] {
        &self.result_operators
    }

    /// Sources of enclosing models this model may refer to.
    pub fn outer_scope(&self) -> &BTreeSet<SourceId> {
        &self.outer_scope
    }

    /// All source-declaring clauses in scope order.
    pub fn sources(&self) -> Vec<QuerySource<'_>> {
        let mut out = vec![QuerySource::Main(&self.main_from)];
        for clause in &self.body_clauses {
            match clause {
                BodyClause::AdditionalFrom(c) => out.push(QuerySource::AdditionalFrom(c)),
                BodyClause::Join(c) => out.push(QuerySource::Join(c)),
                BodyClause::Where(_) | BodyClause::OrderBy(_) => {}
            }
        }
        out
    }

    /// Source clause declared by this model with identity `id`.
    pub fn source(&self, id: SourceId) -> Option<QuerySource<'_>> {
        match *self.declared.get(&id)? {
            0 => Some(QuerySource::Main(&self.main_from)),
            position => match self.body_clauses.get(position - 1)? {
                BodyClause::AdditionalFrom(c) => Some(QuerySource::AdditionalFrom(c)),
                BodyClause::Join(c) => Some(QuerySource::Join(c)),
                BodyClause::Where(_) | BodyClause::OrderBy(_) => None,
            },
        }
    }

    /// Whether the model only enumerates its main source unchanged.
    pub fn is_identity_query(&self) -> bool {
        self.body_clauses.is_empty()
            && self.result_operators.is_empty()
            && matches!(
                self.select.selector.as_source_ref(),
                Some(reference) if reference.id == self.main_from.id
            )
    }

    /// Shape the query streams out after all result operators.
    pub fn output_shape(&self) -> Result<StreamedData> {
        compose(self.projection_shape(), &self.result_operators)
    }

    /// Type of the query result, [`DataType::Unknown`] for an ill-shaped chain.
    pub fn result_type(&self) -> DataType {
        self.output_shape()
            .map(|shape| shape.data_type())
            .unwrap_or(DataType::Unknown)
    }

    fn projection_shape(&self) -> StreamedData {
        StreamedData::sequence(self.select.selector.data_type())
    }

    /// Sources referenced by this model (or its subqueries) but declared outside it.
    pub fn free_references(&self) -> BTreeSet<SourceId> {
        let mut out = BTreeSet::new();
        self.for_each_free_reference(&mut |reference| {
            out.insert(reference.id);
        });
        out
    }

    /// Re-checks every invariant of the model and of its nested subqueries.
    pub fn validate(&self) -> Result<()> {
        self.check_main_from(&self.main_from)?;
        for (idx, clause) in self.body_clauses.iter().enumerate() {
            self.check_body_clause(idx, clause)?;
        }
        self.check_tail_expression(&self.select.selector, "select")?;
        for op in &self.result_operators {
            self.check_result_operator(op)?;
        }
        self.output_shape()?;
        for expr in self.expressions() {
            for nested in subqueries(expr) {
                nested.validate()?;
            }
        }
        let mut seen = FxHashSet::default();
        let mut walked = FxHashSet::default();
        self.check_unique_sources(&mut seen, &mut walked)
    }

    /// Appends a body clause.
    pub fn add_body_clause(&mut self, clause: BodyClause) -> Result<()> {
        self.insert_body_clause(self.body_clauses.len(), clause)
    }

    /// Inserts a body clause at `index`, shifting later clauses back.
    pub fn insert_body_clause(&mut self, index: usize, clause: BodyClause) -> Result<()> {
        let outcome = self.check_insert_body_clause(index, &clause);
        if let Err(err) = outcome {
            return Err(self.rejected("insert_body_clause", err));
        }
        for (expr, _) in clause.expressions() {
            count_references(expr, &mut self.references, true);
        }
        self.body_clauses.insert(index, clause);
        self.reposition_from(index);
        Ok(())
    }

    fn check_insert_body_clause(&self, index: usize, clause: &BodyClause) -> Result<()> {
        if index > self.body_clauses.len() {
            return Err(QueryModelError::invalid(
                "insert_body_clause",
                format!("index {index} out of range 0..={}", self.body_clauses.len()),
            ));
        }
        if let Some(id) = clause.source_id() {
            if self.declared.contains_key(&id) || self.outer_scope.contains(&id) {
                return Err(QueryModelError::CyclicModel {
                    query_source: format!("{}{id}", clause.source_name().unwrap_or_default()),
                });
            }
        }
        self.check_body_clause(index, clause)
    }

    /// Removes the body clause at `index`.
    ///
    /// Fails with [`QueryModelError::DanglingReference`] when another clause
    /// still refers to the source the clause declares.
    pub fn remove_body_clause(&mut self, index: usize) -> Result<BodyClause> {
        let Some(clause) = self.body_clauses.get(index) else {
            return Err(self.rejected(
                "remove_body_clause",
                QueryModelError::invalid(
                    "remove_body_clause",
                    format!("index {index} out of range 0..{}", self.body_clauses.len()),
                ),
            ));
        };
        if let Some(id) = clause.source_id() {
            let mut own = FxHashMap::default();
            for (expr, _) in clause.expressions() {
                count_references(expr, &mut own, true);
            }
            let total = self.references.get(&id).copied().unwrap_or(0);
            let inside = own.get(&id).copied().unwrap_or(0);
            if total > inside {
                let referenced_by = self.describe_referrer(id, index);
                let name = clause.source_name().unwrap_or_default().to_owned();
                let err = QueryModelError::dangling(id, &name, referenced_by);
                return Err(self.rejected("remove_body_clause", err));
            }
        }
        let clause = self.body_clauses.remove(index);
        for (expr, _) in clause.expressions() {
            count_references(expr, &mut self.references, false);
        }
        if let Some(id) = clause.source_id() {
            self.declared.remove(&id);
        }
        self.reposition_from(index);
        Ok(clause)
    }

    /// Replaces the projection, returning the previous one.
    pub fn set_select_clause(&mut self, select: SelectClause) -> Result<SelectClause> {
        let outcome = self
            .check_tail_expression(&select.selector, "select")
            .and_then(|()| {
                let start = StreamedData::sequence(select.selector.data_type());
                compose(start, &self.result_operators).map(|_| ())
            });
        if let Err(err) = outcome {
            return Err(self.rejected("set_select_clause", err));
        }
        count_references(&select.selector, &mut self.references, true);
        let previous = std::mem::replace(&mut self.select, select);
        count_references(&previous.selector, &mut self.references, false);
        Ok(previous)
    }

    /// Appends a result operator.
    pub fn add_result_operator(&mut self, op: ResultOperator) -> Result<()> {
        self.insert_result_operator(self.result_operators.len(), op)
    }

    /// Inserts a result operator at `index`.
    pub fn insert_result_operator(&mut self, index: usize, op: ResultOperator) -> Result<()> {
        let outcome = self.check_insert_result_operator(index, &op);
        if let Err(err) = outcome {
            return Err(self.rejected("insert_result_operator", err));
        }
        for expr in op.expressions() {
            count_references(expr, &mut self.references, true);
        }
        for lambda in op.lambdas() {
            count_references(&lambda.body, &mut self.references, true);
        }
        self.result_operators.insert(index, op);
        Ok(())
    }

    fn check_insert_result_operator(&self, index: usize, op: &ResultOperator) -> Result<()> {
        if index > self.result_operators.len() {
            return Err(QueryModelError::invalid(
                "insert_result_operator",
                format!("index {index} out of range 0..={}", self.result_operators.len()),
            ));
        }
        self.check_result_operator(op)?;
        let (before, after) = self.result_operators.split_at(index);
        let shape = compose(self.projection_shape(), before)?;
        let shape = op.output_shape(&shape)?;
        compose(shape, after).map(|_| ())
    }

    /// Removes the result operator at `index`.
    pub fn remove_result_operator(&mut self, index: usize) -> Result<ResultOperator> {
        let outcome = if index < self.result_operators.len() {
            let remaining = self
                .result_operators
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != index)
                .map(|(_, op)| op);
            compose(self.projection_shape(), remaining).map(|_| ())
        } else {
            Err(QueryModelError::invalid(
                "remove_result_operator",
                format!("index {index} out of range 0..{}", self.result_operators.len()),
            ))
        };
        if let Err(err) = outcome {
            return Err(self.rejected("remove_result_operator", err));
        }
        let op = self.result_operators.remove(index);
        for expr in op.expressions() {
            count_references(expr, &mut self.references, false);
        }
        for lambda in op.lambdas() {
            count_references(&lambda.body, &mut self.references, false);
        }
        Ok(op)
    }

    /// Applies `f` to every expression of the model, nested subqueries first.
    ///
    /// The rewritten model is validated as a whole before it replaces `self`;
    /// on error the model is unchanged.
    pub fn transform_expressions<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&ExprRef) -> Result<ExprRef>,
    {
        let rewritten = self.rewrite_nested(&mut f, OuterScope::Keep);
        match rewritten {
            Ok(model) => {
                *self = model;
                Ok(())
            }
            Err(err) => Err(self.rejected("transform_expressions", err)),
        }
    }

    fn rewrite_nested(&self, f: &mut ExprMapper<'_>, scope: OuterScope) -> Result<QueryModel> {
        let mut apply = |expr: &ExprRef| -> Result<ExprRef> {
            let inner = NestedRewrite { f: &mut *f }.visit(expr)?;
            f(&inner)
        };
        self.map_expressions(&mut apply, scope)
    }

    /// Builds a new model whose expressions are `f` applied to this model's,
    /// keeping every source identity. Subqueries are only rewritten if `f`
    /// rewrites them.
    pub fn map_expressions(
        &self,
        f: &mut dyn FnMut(&ExprRef) -> Result<ExprRef>,
        scope: OuterScope,
    ) -> Result<QueryModel> {
        let main_from = self.main_from.map_expressions(f)?;
        let mut body = Vec::with_capacity(self.body_clauses.len());
        for clause in &self.body_clauses {
            body.push(clause.map_expressions(f)?);
        }
        let select = self.select.map_expressions(f)?;
        let mut ops = Vec::with_capacity(self.result_operators.len());
        for op in &self.result_operators {
            ops.push(op.map_expressions(f)?);
        }
        let outer_scope = match scope {
            OuterScope::Keep => self.outer_scope.clone(),
            OuterScope::Infer => {
                let draft = QueryModel {
                    main_from: main_from.clone(),
                    body_clauses: body.clone(),
                    select: select.clone(),
                    result_operators: ops.clone(),
                    outer_scope: BTreeSet::new(),
                    declared: self.declared.clone(),
                    references: FxHashMap::default(),
                };
                draft.free_references()
            }
        };
        QueryModel::from_parts(main_from, body, select, ops, outer_scope)
    }

    /// Every expression owned directly by the model, lambda bodies included.
    pub(crate) fn expressions(&self) -> Vec<&ExprRef> {
        let mut out = vec![&self.main_from.from_expression];
        for clause in &self.body_clauses {
            out.extend(clause.expressions().into_iter().map(|(expr, _)| expr));
        }
        out.push(&self.select.selector);
        for op in &self.result_operators {
            out.extend(op.expressions());
            out.extend(op.lambdas().into_iter().map(|lambda| &lambda.body));
        }
        out
    }

    pub(crate) fn for_each_free_reference(&self, f: &mut dyn FnMut(&SourceRef)) {
        let declared = &self.declared;
        let mut filtered = |reference: &SourceRef| {
            if !declared.contains_key(&reference.id) {
                f(reference);
            }
        };
        for expr in self.expressions() {
            for_each_reference(expr, &mut filtered);
        }
    }

    fn reindex(&mut self) -> Result<()> {
        let mut declared = FxHashMap::default();
        declared.insert(self.main_from.id, 0);
        for (idx, clause) in self.body_clauses.iter().enumerate() {
            if let Some(id) = clause.source_id() {
                if declared.insert(id, idx + 1).is_some() || self.outer_scope.contains(&id) {
                    return Err(QueryModelError::CyclicModel {
                        query_source: format!("{}{id}", clause.source_name().unwrap_or_default()),
                    });
                }
            }
        }
        if self.outer_scope.contains(&self.main_from.id) {
            return Err(QueryModelError::CyclicModel {
                query_source: format!("{}{}", self.main_from.item_name, self.main_from.id),
            });
        }
        let mut references = FxHashMap::default();
        for expr in self.expressions() {
            count_references(expr, &mut references, true);
        }
        self.declared = declared;
        self.references = references;
        Ok(())
    }

    fn reposition_from(&mut self, index: usize) {
        for (idx, clause) in self.body_clauses.iter().enumerate().skip(index) {
            if let Some(id) = clause.source_id() {
                self.declared.insert(id, idx + 1);
            }
        }
    }

    fn is_visible(&self, id: SourceId, limit: usize, own: Option<SourceId>) -> bool {
        self.outer_scope.contains(&id)
            || own == Some(id)
            || self.declared.get(&id).is_some_and(|position| *position < limit)
    }

    fn check_expression(
        &self,
        expr: &ExprRef,
        limit: usize,
        own: Option<SourceId>,
        referenced_by: impl FnOnce() -> String,
    ) -> Result<()> {
        let mut offending: Option<SourceRef> = None;
        for_each_reference(expr, &mut |reference| {
            if offending.is_none() && !self.is_visible(reference.id, limit, own) {
                offending = Some(reference.clone());
            }
        });
        match offending {
            None => Ok(()),
            Some(reference) => Err(QueryModelError::dangling(
                reference.id,
                &reference.name,
                referenced_by(),
            )),
        }
    }

    fn check_main_from(&self, clause: &MainFromClause) -> Result<()> {
        self.check_expression(&clause.from_expression, 0, None, || {
            format!("from {} in {}", clause.item_name, clause.from_expression)
        })
    }

    fn check_body_clause(&self, index: usize, clause: &BodyClause) -> Result<()> {
        for (expr, strict) in clause.expressions() {
            let own = if strict { None } else { clause.source_id() };
            self.check_expression(expr, index + 1, own, || clause.to_string())?;
        }
        Ok(())
    }

    fn check_tail_expression(&self, expr: &ExprRef, context: &str) -> Result<()> {
        self.check_expression(expr, self.body_clauses.len() + 1, None, || {
            format!("{context} {expr}")
        })
    }

    fn check_result_operator(&self, op: &ResultOperator) -> Result<()> {
        for expr in op.expressions() {
            self.check_tail_expression(expr, op.name())?;
        }
        for lambda in op.lambdas() {
            self.check_tail_expression(&lambda.body, op.name())?;
        }
        Ok(())
    }

    /// Source ids must be unique across every distinct nested model. A
    /// subquery node shared by several clauses is one model and is walked
    /// once.
    fn check_unique_sources(
        &self,
        seen: &mut FxHashSet<SourceId>,
        walked: &mut FxHashSet<*const QueryModel>,
    ) -> Result<()> {
        for source in self.sources() {
            if !seen.insert(source.id()) {
                return Err(QueryModelError::CyclicModel {
                    query_source: format!("{}{}", source.item_name(), source.id()),
                });
            }
        }
        for expr in self.expressions() {
            for nested in subqueries(expr) {
                if walked.insert(nested as *const QueryModel) {
                    nested.check_unique_sources(seen, walked)?;
                }
            }
        }
        Ok(())
    }

    fn describe_referrer(&self, id: SourceId, skip_index: usize) -> String {
        let mentions = |expr: &ExprRef| {
            let mut found = false;
            for_each_reference(expr, &mut |reference| found |= reference.id == id);
            found
        };
        for (idx, clause) in self.body_clauses.iter().enumerate() {
            if idx != skip_index && clause.expressions().iter().any(|(expr, _)| mentions(*expr)) {
                return clause.to_string();
            }
        }
        if mentions(&self.select.selector) {
            return format!("select {}", self.select.selector);
        }
        for op in &self.result_operators {
            if op.expressions().iter().any(|expr| mentions(*expr))
                || op.lambdas().iter().any(|lambda| mentions(&lambda.body))
            {
                return op.to_string();
            }
        }
        "an enclosing clause".to_owned()
    }

    fn rejected(&self, operation: &'static str, err: QueryModelError) -> QueryModelError {
        debug!(
            operation,
            code = err.code(),
            error = %err,
            "query.model.mutation_rejected"
        );
        err
    }
}

/// Rewrites the nested models of subquery nodes, leaving other nodes to the
/// caller's function.
struct NestedRewrite<'f, 'a> {
    f: &'f mut ExprMapper<'a>,
}

impl ExprVisitor for NestedRewrite<'_, '_> {
    fn visit(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::Subquery(model) => {
                let nested = model.rewrite_nested(&mut *self.f, OuterScope::Infer)?;
                Ok(Expr::subquery(nested))
            }
            _ => crate::expr::walk_children(self, expr),
        }
    }
}

/// Calls `f` for every reference node in `expr` that is free at this level,
/// including the free references of nested subqueries.
pub(crate) fn for_each_reference(expr: &ExprRef, f: &mut dyn FnMut(&SourceRef)) {
    walk(expr, &mut |node| match node.as_ref() {
        Expr::SourceRef(reference) => {
            f(reference);
            false
        }
        Expr::Subquery(model) => {
            model.for_each_free_reference(&mut *f);
            false
        }
        _ => true,
    });
}

/// Nested models reachable from `expr` without entering another subquery.
pub(crate) fn subqueries(expr: &ExprRef) -> Vec<&QueryModel> {
    let mut out = Vec::new();
    walk(expr, &mut |node| match node.as_ref() {
        Expr::Subquery(model) => {
            out.push(model.as_ref());
            false
        }
        _ => true,
    });
    out
}

fn count_references(expr: &ExprRef, counts: &mut FxHashMap<SourceId, usize>, add: bool) {
    for_each_reference(expr, &mut |reference| {
        let entry = counts.entry(reference.id).or_insert(0);
        if add {
            *entry += 1;
        } else {
            *entry = entry.saturating_sub(1);
        }
    });
}

impl fmt::Display for QueryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "from {} {} in {}",
            self.main_from.item_type, self.main_from.item_name, self.main_from.from_expression
        )?;
        for clause in &self.body_clauses {
            write!(f, " {clause}")?;
        }
        write!(f, " select {}", self.select.selector)?;
        for op in &self.result_operators {
            write!(f, " => {op}")?;
        }
        Ok(())
    }
}
