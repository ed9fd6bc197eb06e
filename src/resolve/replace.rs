//! Reference replacement over expressions and whole models.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::error::{QueryModelError, Result};
use crate::expr::{walk_children, Expr, ExprRef, ExprVisitor};
use crate::model::{OuterScope, QueryModel, QuerySourceMapping, SourceId};

/// Rewrites every reference node whose source is in `mapping` to the mapped
/// expression, descending into subquery models.
///
/// With `strict` set, a reference to a source that is neither mapped, retained
/// by the mapping, nor declared inside an enclosing subquery of `expr` fails
/// with [`QueryModelError::UnmappedReference`].
pub fn replace_references(
    expr: &ExprRef,
    mapping: &QuerySourceMapping<'_>,
    strict: bool,
) -> Result<ExprRef> {
    ReferenceReplacer::new(mapping, strict, SubqueryMode::Rewrite).replace(expr)
}

/// [`replace_references`] over every expression of `model`.
///
/// Used to flatten a subquery into its parent: the subquery's correlated
/// references are mapped to the parent's expressions and the outer scope of
/// the result is recomputed.
pub fn replace_references_in_model(
    model: &QueryModel,
    mapping: &QuerySourceMapping<'_>,
    strict: bool,
) -> Result<QueryModel> {
    let bound: FxHashSet<SourceId> = model.sources().iter().map(|s| s.id()).collect();
    let mut rewrite = |expr: &ExprRef| {
        let mut replacer = ReferenceReplacer::new(mapping, strict, SubqueryMode::Rewrite);
        replacer.bound = bound.clone();
        replacer.replace(expr)
    };
    model.map_expressions(&mut rewrite, OuterScope::Infer)
}

/// What happens to subquery nodes met during replacement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SubqueryMode {
    /// Replace references inside the nested model, keeping its sources.
    Rewrite,
    /// Deep-clone the nested model against a child of the mapping.
    Clone,
}

pub(crate) struct ReferenceReplacer<'m, 'p> {
    mapping: &'m QuerySourceMapping<'p>,
    strict: bool,
    mode: SubqueryMode,
    /// Sources declared by subqueries enclosing the current node.
    bound: FxHashSet<SourceId>,
    root: Option<ExprRef>,
}

impl<'m, 'p> ReferenceReplacer<'m, 'p> {
    pub(crate) fn new(
        mapping: &'m QuerySourceMapping<'p>,
        strict: bool,
        mode: SubqueryMode,
    ) -> Self {
        Self {
            mapping,
            strict,
            mode,
            bound: FxHashSet::default(),
            root: None,
        }
    }

    pub(crate) fn replace(mut self, expr: &ExprRef) -> Result<ExprRef> {
        self.root = Some(Arc::clone(expr));
        self.visit(expr)
    }

    fn unmapped(&self, name: &str, id: SourceId) -> QueryModelError {
        QueryModelError::UnmappedReference {
            query_source: format!("{name}{id}"),
            expression: self
                .root
                .as_ref()
                .map(|root| root.to_string())
                .unwrap_or_default(),
        }
    }

    fn rewrite_subquery(&self, model: &QueryModel) -> Result<QueryModel> {
        let mut bound = self.bound.clone();
        bound.extend(model.sources().iter().map(|s| s.id()));
        let mut rewrite = |expr: &ExprRef| {
            let mut nested = ReferenceReplacer::new(self.mapping, self.strict, self.mode);
            nested.bound = bound.clone();
            nested.root = self.root.clone();
            nested.visit(expr)
        };
        model.map_expressions(&mut rewrite, OuterScope::Infer)
    }
}

impl ExprVisitor for ReferenceReplacer<'_, '_> {
    fn visit(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::SourceRef(reference) => {
                if self.bound.contains(&reference.id) || self.mapping.is_retained(reference.id) {
                    return Ok(Arc::clone(expr));
                }
                match self.mapping.get(reference.id) {
                    Some(replacement) => Ok(Arc::clone(replacement)),
                    None if self.strict => Err(self.unmapped(&reference.name, reference.id)),
                    None => Ok(Arc::clone(expr)),
                }
            }
            Expr::Subquery(model) => match self.mode {
                SubqueryMode::Rewrite => Ok(Expr::subquery(self.rewrite_subquery(model)?)),
                SubqueryMode::Clone => {
                    let mut child = self.mapping.child();
                    Ok(Expr::subquery(model.deep_clone_with(&mut child)?))
                }
            },
            _ => walk_children(self, expr),
        }
    }
}
