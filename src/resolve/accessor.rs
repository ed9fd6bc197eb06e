//! Accessor finding: how to reach a node inside a projected item.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::error::{QueryModelError, Result};
use crate::expr::{same_node, Expr, ExprRef, LambdaExpr, ParameterExpr, UnaryOp};

/// Builds `input -> path` where `path` reads `searched` out of a value shaped
/// like `container`.
///
/// Only constructions and type coercions are descended into; anything else is
/// an opaque leaf. Nodes are matched by identity (see [`same_node`]). If
/// `searched` is the container itself the identity function is returned.
pub fn find_accessor(
    searched: &ExprRef,
    container: &ExprRef,
    input: &ParameterExpr,
) -> Result<LambdaExpr> {
    // Pending nodes paired with the accessor reaching them from `input`.
    let mut stack: SmallVec<[(&ExprRef, ExprRef); 8]> = SmallVec::new();
    stack.push((container, input.to_expr()));

    while let Some((node, path)) = stack.pop() {
        if same_node(node, searched) {
            return Ok(LambdaExpr::new(vec![input.clone()], path));
        }
        match node.as_ref() {
            Expr::Construct(construct) => {
                for binding in construct.bindings.iter().rev() {
                    let step = Expr::member(path.clone(), binding.member.clone());
                    stack.push((&binding.expr, step));
                }
            }
            Expr::Unary {
                op: UnaryOp::Convert(_),
                operand,
            } => {
                stack.push((operand, Expr::convert(path, operand.data_type())));
            }
            _ => {}
        }
    }

    Err(QueryModelError::AccessorNotFound {
        searched: searched.to_string(),
        container: container.to_string(),
    })
}

/// Nodes [`find_accessor`] can reach inside `container`, by address.
pub(crate) fn reachable_nodes(container: &ExprRef) -> FxHashSet<*const Expr> {
    let mut seen = FxHashSet::default();
    let mut stack: SmallVec<[&ExprRef; 8]> = SmallVec::new();
    stack.push(container);
    while let Some(node) = stack.pop() {
        seen.insert(std::sync::Arc::as_ptr(node));
        match node.as_ref() {
            Expr::Construct(construct) => {
                stack.extend(construct.bindings.iter().map(|binding| &binding.expr));
            }
            Expr::Unary {
                op: UnaryOp::Convert(_),
                operand,
            } => stack.push(operand),
            _ => {}
        }
    }
    seen
}
