//! Folding of nested call chains into correlated subqueries.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::Result;
use crate::expr::{walk_children, Expr, ExprRef, ExprVisitor};
use crate::model::SourceId;

use super::context::NameGenerator;
use super::QueryParser;

/// Replaces operator call chains inside an expression with subquery nodes.
///
/// The nested models may refer to any source in `scope`; those references
/// become their outer scope.
pub(crate) struct SubqueryFinder<'a> {
    parser: &'a QueryParser,
    names: &'a mut NameGenerator,
    scope: BTreeSet<SourceId>,
}

impl<'a> SubqueryFinder<'a> {
    pub(crate) fn new(
        parser: &'a QueryParser,
        names: &'a mut NameGenerator,
        scope: BTreeSet<SourceId>,
    ) -> Self {
        Self {
            parser,
            names,
            scope,
        }
    }

    pub(crate) fn find(mut self, expr: &ExprRef) -> Result<ExprRef> {
        self.visit(expr)
    }
}

impl ExprVisitor for SubqueryFinder<'_> {
    fn visit(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::Call(call) if self.parser.is_operator_call(call) => {
                let model =
                    self.parser
                        .parse_chain(expr, None, self.scope.clone(), &mut *self.names)?;
                Ok(Expr::subquery(model))
            }
            Expr::Subquery(_) => Ok(Arc::clone(expr)),
            _ => walk_children(self, expr),
        }
    }
}
