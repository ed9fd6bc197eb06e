//! Rewriting and read-only traversal over expression trees.

use std::sync::Arc;

use crate::error::Result;

use super::{CallExpr, ConstructExpr, Expr, ExprRef, LambdaExpr, MemberBinding};

/// Rewriting visitor over the closed set of expression variants.
///
/// Implementors override [`ExprVisitor::visit`] for the nodes they care about
/// and delegate everything else to [`walk_children`].
pub trait ExprVisitor {
    /// Rewrites `expr`, returning the same `Arc` when nothing changed.
    fn visit(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk_children(self, expr)
    }
}

/// Visits every child of `expr` and rebuilds the node only if a child changed.
///
/// Subquery nodes are returned untouched; passes that need to reach into
/// nested models handle [`Expr::Subquery`] themselves.
pub fn walk_children<V: ExprVisitor + ?Sized>(visitor: &mut V, expr: &ExprRef) -> Result<ExprRef> {
    let rebuilt = match expr.as_ref() {
        Expr::Constant { .. } | Expr::Parameter(_) | Expr::SourceRef(_) | Expr::Subquery(_) => None,
        Expr::MemberAccess { target, member } => {
            let new_target = visitor.visit(target)?;
            (!Arc::ptr_eq(target, &new_target)).then(|| Expr::MemberAccess {
                target: new_target,
                member: member.clone(),
            })
        }
        Expr::Call(call) => {
            let new_target = match &call.target {
                Some(target) => Some(visitor.visit(target)?),
                None => None,
            };
            let target_changed = match (&call.target, &new_target) {
                (Some(old), Some(new)) => !Arc::ptr_eq(old, new),
                _ => false,
            };
            let new_args = visit_all(visitor, &call.args)?;
            (target_changed || new_args.is_some()).then(|| {
                Expr::Call(CallExpr {
                    target: new_target,
                    method: call.method.clone(),
                    args: new_args.unwrap_or_else(|| call.args.clone()),
                })
            })
        }
        Expr::Lambda(lambda) => {
            let body = visitor.visit(&lambda.body)?;
            (!Arc::ptr_eq(&lambda.body, &body)).then(|| {
                Expr::Lambda(LambdaExpr {
                    params: lambda.params.clone(),
                    body,
                })
            })
        }
        Expr::Binary { op, left, right } => {
            let new_left = visitor.visit(left)?;
            let new_right = visitor.visit(right)?;
            (!Arc::ptr_eq(left, &new_left) || !Arc::ptr_eq(right, &new_right)).then(|| {
                Expr::Binary {
                    op: *op,
                    left: new_left,
                    right: new_right,
                }
            })
        }
        Expr::Unary { op, operand } => {
            let new_operand = visitor.visit(operand)?;
            (!Arc::ptr_eq(operand, &new_operand)).then(|| Expr::Unary {
                op: op.clone(),
                operand: new_operand,
            })
        }
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            let t = visitor.visit(test)?;
            let a = visitor.visit(if_true)?;
            let b = visitor.visit(if_false)?;
            let changed =
                !Arc::ptr_eq(test, &t) || !Arc::ptr_eq(if_true, &a) || !Arc::ptr_eq(if_false, &b);
            changed.then(|| Expr::Conditional {
                test: t,
                if_true: a,
                if_false: b,
            })
        }
        Expr::Construct(construct) => {
            let exprs: Vec<ExprRef> = construct.bindings.iter().map(|b| Arc::clone(&b.expr)).collect();
            visit_all(visitor, &exprs)?.map(|new_exprs| {
                Expr::Construct(ConstructExpr {
                    ty: construct.ty.clone(),
                    kind: construct.kind,
                    bindings: construct
                        .bindings
                        .iter()
                        .zip(new_exprs)
                        .map(|(binding, expr)| MemberBinding {
                            member: binding.member.clone(),
                            expr,
                        })
                        .collect(),
                })
            })
        }
        Expr::Extension { name, ty, operands } => {
            visit_all(visitor, operands)?.map(|operands| Expr::Extension {
                name: name.clone(),
                ty: ty.clone(),
                operands,
            })
        }
    };
    Ok(rebuilt.map(Arc::new).unwrap_or_else(|| Arc::clone(expr)))
}

/// Visits a list of nodes; `Some` only if at least one of them changed.
fn visit_all<V: ExprVisitor + ?Sized>(
    visitor: &mut V,
    items: &[ExprRef],
) -> Result<Option<Vec<ExprRef>>> {
    let mut out = Vec::with_capacity(items.len());
    let mut changed = false;
    for item in items {
        let new_item = visitor.visit(item)?;
        changed |= !Arc::ptr_eq(item, &new_item);
        out.push(new_item);
    }
    Ok(changed.then_some(out))
}

/// Pre-order read-only traversal. Returning `false` from `f` skips the node's
/// children. Subquery contents are not entered.
pub fn walk<'a>(expr: &'a ExprRef, f: &mut impl FnMut(&'a ExprRef) -> bool) {
    if f(expr) {
        for child in expr.children() {
            walk(child, f);
        }
    }
}
