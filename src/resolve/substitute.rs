//! Parameter substitution with record-construction reduction.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{QueryModelError, Result};
use crate::expr::{walk_children, Expr, ExprRef, ExprVisitor, LambdaExpr, UnaryOp};

/// Applies `lambda` to `args`: parameters are replaced by the arguments in
/// order and the body is reduced.
pub fn resolve_lambda(lambda: &LambdaExpr, args: &[ExprRef]) -> Result<ExprRef> {
    if lambda.params.len() != args.len() {
        return Err(QueryModelError::invalid(
            "lambda resolution",
            format!(
                "'{}' takes {} parameter(s) but {} argument(s) were supplied",
                lambda.to_expr(),
                lambda.params.len(),
                args.len()
            ),
        ));
    }
    let bindings = lambda
        .params
        .iter()
        .zip(args)
        .map(|(param, arg)| (param.name.clone(), Arc::clone(arg)))
        .collect();
    substitute_parameters(&lambda.body, &bindings)
}

/// Replaces free parameters named in `bindings`, honoring shadowing by nested
/// lambdas, then reduces member reads over constructions.
pub fn substitute_parameters(
    body: &ExprRef,
    bindings: &FxHashMap<String, ExprRef>,
) -> Result<ExprRef> {
    Substitution {
        bindings,
        shadowed: Vec::new(),
    }
    .visit(body)
}

/// Reduces `new {a = x}.a` to `x` and collapses round-tripping coercions.
pub fn reduce(expr: &ExprRef) -> Result<ExprRef> {
    substitute_parameters(expr, &FxHashMap::default())
}

struct Substitution<'b> {
    bindings: &'b FxHashMap<String, ExprRef>,
    shadowed: Vec<String>,
}

impl ExprVisitor for Substitution<'_> {
    fn visit(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::Parameter(param) => {
                if self.shadowed.iter().any(|name| *name == param.name) {
                    return Ok(Arc::clone(expr));
                }
                Ok(self
                    .bindings
                    .get(&param.name)
                    .map_or_else(|| Arc::clone(expr), Arc::clone))
            }
            Expr::Lambda(lambda) => {
                let depth = self.shadowed.len();
                self.shadowed
                    .extend(lambda.params.iter().map(|p| p.name.clone()));
                let out = walk_children(self, expr);
                self.shadowed.truncate(depth);
                out
            }
            _ => {
                let rebuilt = walk_children(self, expr)?;
                Ok(reduce_node(&rebuilt))
            }
        }
    }
}

fn reduce_node(node: &ExprRef) -> ExprRef {
    match node.as_ref() {
        Expr::MemberAccess { target, member } => target
            .as_construct()
            .and_then(|construct| construct.binding(&member.name))
            .map_or_else(|| Arc::clone(node), |binding| Arc::clone(&binding.expr)),
        Expr::Unary {
            op: UnaryOp::Convert(ty),
            operand,
        } => match operand.as_ref() {
            Expr::Unary {
                op: UnaryOp::Convert(_),
                operand: inner,
            } if inner.data_type() == *ty => Arc::clone(inner),
            _ => Arc::clone(node),
        },
        _ => Arc::clone(node),
    }
}
