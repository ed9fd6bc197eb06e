use std::fmt;

use super::{ConstructKind, Expr, ExprRef, UnaryOp};

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant { value, .. } => write!(f, "{value}"),
            Expr::Parameter(param) => write!(f, "{}", param.name),
            Expr::MemberAccess { target, member } => write!(f, "{target}.{}", member.name),
            Expr::Call(call) => {
                match &call.target {
                    Some(target) => write!(f, "{target}.{}", call.method.name)?,
                    None => write!(f, "{}.{}", call.method.owner, call.method.name)?,
                }
                if !call.method.type_args.is_empty() {
                    write!(f, "<")?;
                    for (idx, ty) in call.method.type_args.iter().enumerate() {
                        if idx > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{ty}")?;
                    }
                    write!(f, ">")?;
                }
                write!(f, "(")?;
                write_list(f, &call.args)?;
                write!(f, ")")
            }
            Expr::Lambda(lambda) => {
                if lambda.params.len() == 1 {
                    write!(f, "{}", lambda.params[0].name)?;
                } else {
                    write!(f, "(")?;
                    for (idx, param) in lambda.params.iter().enumerate() {
                        if idx > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", param.name)?;
                    }
                    write!(f, ")")?;
                }
                write!(f, " => {}", lambda.body)
            }
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{operand}"),
                UnaryOp::Negate => write!(f, "-{operand}"),
                UnaryOp::Convert(ty) => write!(f, "Convert({operand}, {ty})"),
                UnaryOp::Quote => write!(f, "{operand}"),
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "IIF({test}, {if_true}, {if_false})"),
            Expr::Construct(construct) => {
                let anonymous = construct
                    .ty
                    .as_record()
                    .map_or(true, |record| record.name.starts_with('{'));
                match construct.kind {
                    ConstructKind::Positional => {
                        write!(f, "new {}(", construct.ty)?;
                        for (idx, binding) in construct.bindings.iter().enumerate() {
                            if idx > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{}", binding.expr)?;
                        }
                        write!(f, ")")
                    }
                    ConstructKind::Initializer => {
                        if anonymous {
                            write!(f, "new {{")?;
                        } else {
                            write!(f, "new {} {{", construct.ty)?;
                        }
                        for (idx, binding) in construct.bindings.iter().enumerate() {
                            if idx > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{} = {}", binding.member.name, binding.expr)?;
                        }
                        write!(f, "}}")
                    }
                }
            }
            Expr::SourceRef(reference) => write!(f, "[{}]", reference.name),
            Expr::Subquery(model) => write!(f, "{{{model}}}"),
            Expr::Extension { name, operands, .. } => {
                write!(f, "{name}(")?;
                write_list(f, operands)?;
                write!(f, ")")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[ExprRef]) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}
