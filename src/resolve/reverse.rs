//! Reverse resolution of expressions onto the current item.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::error::{QueryModelError, Result};
use crate::expr::{walk_children, Expr, ExprRef, ExprVisitor, LambdaExpr, ParameterExpr};
use crate::model::{OuterScope, QueryModel, SourceId};

use super::accessor::{find_accessor, reachable_nodes};

/// Turns `resolved`, written against source references, into a function of
/// one opaque item shaped like `item_shape`.
///
/// Each reference is replaced by the accessor that reads it out of the item.
/// References missing from `item_shape` fail with
/// [`QueryModelError::ReverseResolution`].
pub fn reverse_resolve(item_shape: &ExprRef, resolved: &ExprRef) -> Result<LambdaExpr> {
    let input = ParameterExpr::new("input", item_shape.data_type());
    let body = ReverseResolver::new(item_shape, &input).visit(resolved)?;
    Ok(LambdaExpr::new(vec![input], body))
}

/// Like [`reverse_resolve`] for an existing function: its body is reverse
/// resolved and the item parameter is inserted at `insert_at` among its
/// parameters.
pub fn reverse_resolve_lambda(
    item_shape: &ExprRef,
    resolved: &LambdaExpr,
    insert_at: usize,
) -> Result<LambdaExpr> {
    if insert_at > resolved.params.len() {
        return Err(QueryModelError::invalid(
            "reverse resolution",
            format!(
                "cannot insert parameter at {insert_at} into '{}' with {} parameter(s)",
                resolved.to_expr(),
                resolved.params.len()
            ),
        ));
    }
    let name = unique_name("input", &resolved.params);
    let input = ParameterExpr::new(name, item_shape.data_type());
    let body = ReverseResolver::new(item_shape, &input).visit(&resolved.body)?;
    let mut params = resolved.params.clone();
    params.insert(insert_at, input);
    Ok(LambdaExpr::new(params, body))
}

fn unique_name(base: &str, taken: &[ParameterExpr]) -> String {
    let clash = |name: &str| taken.iter().any(|p| p.name == name);
    if !clash(base) {
        return base.to_owned();
    }
    (1..)
        .map(|n| format!("{base}{n}"))
        .find(|candidate| !clash(candidate.as_str()))
        .unwrap_or_else(|| base.to_owned())
}

struct ReverseResolver<'a> {
    item_shape: &'a ExprRef,
    input: &'a ParameterExpr,
    /// Nodes of `item_shape` an accessor can read directly.
    reachable: FxHashSet<*const Expr>,
    /// Sources declared by subqueries enclosing the current node.
    bound: FxHashSet<SourceId>,
}

impl<'a> ReverseResolver<'a> {
    fn new(item_shape: &'a ExprRef, input: &'a ParameterExpr) -> Self {
        Self {
            item_shape,
            input,
            reachable: reachable_nodes(item_shape),
            bound: FxHashSet::default(),
        }
    }

    fn rewrite_subquery(&self, model: &QueryModel) -> Result<QueryModel> {
        let mut bound = self.bound.clone();
        bound.extend(model.sources().iter().map(|s| s.id()));
        let mut rewrite = |expr: &ExprRef| {
            ReverseResolver {
                item_shape: self.item_shape,
                input: self.input,
                reachable: self.reachable.clone(),
                bound: bound.clone(),
            }
            .visit(expr)
        };
        model.map_expressions(&mut rewrite, OuterScope::Infer)
    }
}

impl ReverseResolver<'_> {
    fn accessor(&self, expr: &ExprRef) -> Result<ExprRef> {
        find_accessor(expr, self.item_shape, self.input)
            .map(|accessor| accessor.body)
            .map_err(|err| QueryModelError::ReverseResolution {
                item_shape: self.item_shape.to_string(),
                inner: Box::new(err),
            })
    }
}

impl ExprVisitor for ReverseResolver<'_> {
    fn visit(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        if self.reachable.contains(&Arc::as_ptr(expr)) {
            return self.accessor(expr);
        }
        match expr.as_ref() {
            Expr::SourceRef(reference) if self.bound.contains(&reference.id) => {
                Ok(Arc::clone(expr))
            }
            Expr::SourceRef(_) => self.accessor(expr),
            Expr::Subquery(model) => Ok(Expr::subquery(self.rewrite_subquery(model)?)),
            _ => walk_children(self, expr),
        }
    }
}
