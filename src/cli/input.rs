//! JSON encoding of a raw call-chain tree.
//!
//! Parameters are written by name; each one binds to the nearest enclosing
//! lambda parameter of that name, whose declared type it takes.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::error::QueryModelError;
use crate::expr::{
    BinaryOp, ConstructKind, Expr, ExprRef, LambdaExpr, MemberBinding, MethodRef, ParameterExpr,
    UnaryOp, Value,
};
use crate::types::{DataType, Member};

/// A tree file: the chain root plus the element type of its innermost source.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeFile {
    /// Element type of the initial source.
    pub element_type: DataType,
    /// Outermost call of the chain.
    pub root: RawNode,
}

/// One node of the raw tree.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum RawNode {
    /// Literal.
    Constant {
        /// Literal value.
        value: Value,
        /// Literal type.
        #[serde(rename = "type")]
        ty: DataType,
    },
    /// Named root source.
    Source {
        /// Source name.
        name: String,
        /// Element type.
        element_type: DataType,
    },
    /// Lambda parameter use.
    Parameter {
        /// Parameter name.
        name: String,
    },
    /// `target.member`.
    Member {
        /// Accessed value.
        target: Box<RawNode>,
        /// Member name.
        member: String,
    },
    /// Method call; static calls pass their receiver as the first argument.
    Call {
        /// Instance receiver.
        #[serde(default)]
        target: Option<Box<RawNode>>,
        /// Declaring type.
        owner: String,
        /// Method name.
        method: String,
        /// Explicit generic arguments.
        #[serde(default)]
        type_args: Vec<DataType>,
        /// Declared return type.
        #[serde(default = "unknown_type")]
        returns: DataType,
        /// Arguments.
        #[serde(default)]
        args: Vec<RawNode>,
    },
    /// Lambda.
    Lambda {
        /// Parameters.
        params: Vec<RawParam>,
        /// Body.
        body: Box<RawNode>,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<RawNode>,
        /// Right operand.
        right: Box<RawNode>,
    },
    /// Logical negation.
    Not {
        /// Operand.
        operand: Box<RawNode>,
    },
    /// Arithmetic negation.
    Negate {
        /// Operand.
        operand: Box<RawNode>,
    },
    /// Type coercion.
    Convert {
        /// Operand.
        operand: Box<RawNode>,
        /// Target type.
        to: DataType,
    },
    /// `test ? if_true : if_false`.
    Conditional {
        /// Condition.
        test: Box<RawNode>,
        /// Value when true.
        if_true: Box<RawNode>,
        /// Value when false.
        if_false: Box<RawNode>,
    },
    /// Anonymous record construction.
    Record {
        /// Bound fields in order.
        fields: Vec<RawField>,
    },
    /// Construction of a declared record type.
    New {
        /// Record type.
        #[serde(rename = "type")]
        ty: DataType,
        /// Construction form.
        #[serde(default = "initializer")]
        kind: ConstructKind,
        /// Bound fields in order.
        fields: Vec<RawField>,
    },
}

/// Lambda parameter declaration.
#[derive(Clone, Debug, Deserialize)]
pub struct RawParam {
    /// Name.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type", default = "unknown_type")]
    pub ty: DataType,
}

/// Field of a construction.
#[derive(Clone, Debug, Deserialize)]
pub struct RawField {
    /// Member name.
    pub name: String,
    /// Bound value.
    pub value: RawNode,
}

fn unknown_type() -> DataType {
    DataType::Unknown
}

fn initializer() -> ConstructKind {
    ConstructKind::Initializer
}

/// Errors raised while loading a tree file.
#[derive(Debug, Error)]
pub enum InputError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file is not a valid tree encoding.
    #[error("invalid tree in {path}: {source}")]
    Json {
        /// Offending file.
        path: PathBuf,
        /// Underlying decode error.
        source: serde_json::Error,
    },
    /// A parameter is used outside every lambda declaring it.
    #[error("parameter '{name}' is not declared by an enclosing lambda")]
    UnboundParameter {
        /// Parameter name.
        name: String,
    },
    /// The tree decodes but is not a well-formed expression.
    #[error(transparent)]
    Model(#[from] QueryModelError),
}

impl TreeFile {
    /// Reads and decodes `path`.
    pub fn load(path: &Path) -> Result<Self, InputError> {
        let contents = fs::read_to_string(path).map_err(|source| InputError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| InputError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl RawNode {
    /// Builds the expression tree.
    pub fn build(&self) -> Result<ExprRef, InputError> {
        self.build_in(&mut Vec::new())
    }

    fn build_in(&self, scope: &mut Vec<ParameterExpr>) -> Result<ExprRef, InputError> {
        let expr = match self {
            RawNode::Constant { value, ty } => Expr::constant(value.clone(), ty.clone()),
            RawNode::Source { name, element_type } => {
                Expr::source(name.clone(), element_type.clone())
            }
            RawNode::Parameter { name } => scope
                .iter()
                .rev()
                .find(|param| param.name == *name)
                .map(ParameterExpr::to_expr)
                .ok_or_else(|| InputError::UnboundParameter { name: name.clone() })?,
            RawNode::Member { target, member } => {
                let target = target.build_in(scope)?;
                Expr::field(&target, member)?
            }
            RawNode::Call {
                target,
                owner,
                method,
                type_args,
                returns,
                args,
            } => {
                let target = target
                    .as_ref()
                    .map(|target| target.build_in(scope))
                    .transpose()?;
                let args = args
                    .iter()
                    .map(|arg| arg.build_in(scope))
                    .collect::<Result<Vec<_>, _>>()?;
                let method = MethodRef::new(owner.clone(), method.clone(), returns.clone())
                    .with_type_args(type_args.clone());
                Expr::call(target, method, args)
            }
            RawNode::Lambda { params, body } => {
                let params: Vec<ParameterExpr> = params
                    .iter()
                    .map(|p| ParameterExpr::new(p.name.clone(), p.ty.clone()))
                    .collect();
                let depth = scope.len();
                scope.extend(params.iter().cloned());
                let body = body.build_in(scope);
                scope.truncate(depth);
                LambdaExpr::new(params, body?).to_expr()
            }
            RawNode::Binary { op, left, right } => {
                Expr::binary(*op, left.build_in(scope)?, right.build_in(scope)?)
            }
            RawNode::Not { operand } => Expr::unary(UnaryOp::Not, operand.build_in(scope)?),
            RawNode::Negate { operand } => {
                Expr::unary(UnaryOp::Negate, operand.build_in(scope)?)
            }
            RawNode::Convert { operand, to } => Expr::convert(operand.build_in(scope)?, to.clone()),
            RawNode::Conditional {
                test,
                if_true,
                if_false,
            } => Expr::conditional(
                test.build_in(scope)?,
                if_true.build_in(scope)?,
                if_false.build_in(scope)?,
            ),
            RawNode::Record { fields } => {
                let fields = fields
                    .iter()
                    .map(|field| Ok((field.name.clone(), field.value.build_in(scope)?)))
                    .collect::<Result<Vec<_>, InputError>>()?;
                Expr::record(fields)
            }
            RawNode::New { ty, kind, fields } => {
                let bindings = fields
                    .iter()
                    .map(|field| {
                        let expr = field.value.build_in(scope)?;
                        let member = ty
                            .member(&field.name)
                            .unwrap_or_else(|| Member::new(field.name.clone(), expr.data_type()));
                        Ok(MemberBinding { member, expr })
                    })
                    .collect::<Result<Vec<_>, InputError>>()?;
                Expr::construct(ty.clone(), *kind, bindings)?
            }
        };
        Ok(expr)
    }
}
