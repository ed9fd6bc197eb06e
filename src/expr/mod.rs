//! Expression node model shared by the recognizer, the query model, and the
//! rewriting passes.
//!
//! Nodes are immutable and reference counted ([`ExprRef`]). Rewrites return the
//! *same* `Arc` when nothing below a node changed, so pointer identity is a
//! meaningful notion: the accessor finder and the round-trip properties of
//! reverse resolution rely on it.

mod display;
mod value;
pub mod visit;

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{QueryModelError, Result};
use crate::model::{QueryModel, SourceId};
use crate::types::{DataType, Member};

pub use value::Value;
pub use visit::{walk, walk_children, ExprVisitor};

/// Shared handle to an immutable expression node.
pub type ExprRef = Arc<Expr>;

/// A node of a query expression tree.
#[derive(Debug, PartialEq)]
pub enum Expr {
    /// Literal value of a known type.
    Constant {
        /// Literal payload.
        value: Value,
        /// Declared type of the literal.
        ty: DataType,
    },
    /// Free variable; lambda parameters and accessor inputs.
    Parameter(ParameterExpr),
    /// Member read on a target value.
    MemberAccess {
        /// Value the member is read from.
        target: ExprRef,
        /// Member being read.
        member: Member,
    },
    /// Method call, either instance style (`target` set) or static style.
    Call(CallExpr),
    /// Function literal.
    Lambda(LambdaExpr),
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: ExprRef,
        /// Right operand.
        right: ExprRef,
    },
    /// Unary operation, including type coercion.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: ExprRef,
    },
    /// `test ? if_true : if_false`.
    Conditional {
        /// Condition.
        test: ExprRef,
        /// Value when the condition holds.
        if_true: ExprRef,
        /// Value otherwise.
        if_false: ExprRef,
    },
    /// Record construction binding members to sub-expressions.
    Construct(ConstructExpr),
    /// Non-owning reference to a source clause of a query model.
    SourceRef(SourceRef),
    /// Fully nested query model.
    Subquery(Box<QueryModel>),
    /// Host node the engine does not interpret; operands are still traversed.
    Extension {
        /// Host-side node name, used for rendering.
        name: String,
        /// Result type reported by the host.
        ty: DataType,
        /// Child expressions.
        operands: Vec<ExprRef>,
    },
}

/// A named, typed free variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ParameterExpr {
    /// Parameter name; lambda bodies bind parameters by name.
    pub name: String,
    /// Parameter type.
    pub ty: DataType,
}

impl ParameterExpr {
    /// Creates a parameter descriptor.
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    /// Wraps the descriptor into an expression node.
    pub fn to_expr(&self) -> ExprRef {
        Arc::new(Expr::Parameter(self.clone()))
    }
}

/// Identity of a called method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Declaring type, e.g. `Queryable`.
    pub owner: String,
    /// Method name.
    pub name: String,
    /// Explicit generic arguments (`cast`/`of_type` carry their target here).
    pub type_args: Vec<DataType>,
    /// Declared return type.
    pub return_type: DataType,
}

impl MethodRef {
    /// Creates a method reference without generic arguments.
    pub fn new(owner: impl Into<String>, name: impl Into<String>, return_type: DataType) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            type_args: Vec::new(),
            return_type,
        }
    }

    /// Attaches explicit generic arguments.
    pub fn with_type_args(mut self, type_args: Vec<DataType>) -> Self {
        self.type_args = type_args;
        self
    }
}

/// Payload of [`Expr::Call`].
#[derive(Debug, PartialEq)]
pub struct CallExpr {
    /// Instance the method is invoked on; `None` for static calls.
    pub target: Option<ExprRef>,
    /// Called method.
    pub method: MethodRef,
    /// Positional arguments.
    pub args: Vec<ExprRef>,
}

/// Payload of [`Expr::Lambda`].
#[derive(Clone, Debug, PartialEq)]
pub struct LambdaExpr {
    /// Declared parameters.
    pub params: Vec<ParameterExpr>,
    /// Function body.
    pub body: ExprRef,
}

impl LambdaExpr {
    /// Creates a lambda payload.
    pub fn new(params: Vec<ParameterExpr>, body: ExprRef) -> Self {
        Self { params, body }
    }

    /// Name of the parameter at `idx`, if declared.
    pub fn param_name(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(|p| p.name.as_str())
    }

    /// Function type of the lambda.
    pub fn data_type(&self) -> DataType {
        DataType::Function {
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
            ret: Box::new(self.body.data_type()),
        }
    }

    /// Wraps the payload into an expression node.
    pub fn to_expr(&self) -> ExprRef {
        Arc::new(Expr::Lambda(self.clone()))
    }
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterEqual,
    /// `&&`
    And,
    /// `||`
    Or,
    /// `??`
    Coalesce,
}

impl BinaryOp {
    /// Whether the operator always yields a boolean.
    pub fn is_predicate(self) -> bool {
        !matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulo
                | BinaryOp::Coalesce
        )
    }

    /// Operator symbol used when rendering.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Coalesce => "??",
        }
    }
}

/// Unary operators.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Negate,
    /// Type coercion to the carried type.
    Convert(DataType),
    /// Marks a lambda passed as data rather than as a value.
    Quote,
}

/// How an object construction was written by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructKind {
    /// Constructor call whose positional arguments are tied to members.
    Positional,
    /// Initializer binding named members.
    Initializer,
}

/// One `(member, expression)` pair of a construction.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberBinding {
    /// Member receiving the value.
    pub member: Member,
    /// Bound expression.
    pub expr: ExprRef,
}

/// Payload of [`Expr::Construct`].
#[derive(Debug, PartialEq)]
pub struct ConstructExpr {
    /// Constructed record type.
    pub ty: DataType,
    /// Construction form.
    pub kind: ConstructKind,
    /// Member bindings in source order.
    pub bindings: Vec<MemberBinding>,
}

impl ConstructExpr {
    /// Binding for the member named `name`.
    pub fn binding(&self, name: &str) -> Option<&MemberBinding> {
        self.bindings.iter().find(|b| b.member.name == name)
    }
}

/// Payload of [`Expr::SourceRef`].
///
/// Equality and hashing consider only the referenced [`SourceId`]; the name and
/// item type are cached for rendering and typing.
#[derive(Clone, Debug)]
pub struct SourceRef {
    /// Referenced source clause.
    pub id: SourceId,
    /// Item name of the source clause.
    pub name: String,
    /// Item type produced by the source clause.
    pub ty: DataType,
}

impl PartialEq for SourceRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SourceRef {}

impl Hash for SourceRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Expr {
    /// Literal node.
    pub fn constant(value: impl Into<Value>, ty: DataType) -> ExprRef {
        Arc::new(Expr::Constant {
            value: value.into(),
            ty,
        })
    }

    /// Named root data source producing a sequence of `element`.
    pub fn source(name: impl Into<String>, element: DataType) -> ExprRef {
        Arc::new(Expr::Constant {
            value: Value::Source(name.into()),
            ty: DataType::sequence(element),
        })
    }

    /// Parameter node.
    pub fn parameter(name: impl Into<String>, ty: DataType) -> ExprRef {
        Arc::new(Expr::Parameter(ParameterExpr::new(name, ty)))
    }

    /// Member access with an explicit member descriptor.
    pub fn member(target: ExprRef, member: Member) -> ExprRef {
        Arc::new(Expr::MemberAccess { target, member })
    }

    /// Member access resolved by name against the target's record type.
    pub fn field(target: &ExprRef, name: &str) -> Result<ExprRef> {
        let ty = target.data_type();
        let member = ty.member(name).ok_or_else(|| {
            QueryModelError::invalid("member access", format!("type {ty} has no member '{name}'"))
        })?;
        Ok(Expr::member(Arc::clone(target), member))
    }

    /// Method call node.
    pub fn call(target: Option<ExprRef>, method: MethodRef, args: Vec<ExprRef>) -> ExprRef {
        Arc::new(Expr::Call(CallExpr {
            target,
            method,
            args,
        }))
    }

    /// Lambda node.
    pub fn lambda(params: Vec<ParameterExpr>, body: ExprRef) -> ExprRef {
        Arc::new(Expr::Lambda(LambdaExpr { params, body }))
    }

    /// Binary node.
    pub fn binary(op: BinaryOp, left: ExprRef, right: ExprRef) -> ExprRef {
        Arc::new(Expr::Binary { op, left, right })
    }

    /// Unary node.
    pub fn unary(op: UnaryOp, operand: ExprRef) -> ExprRef {
        Arc::new(Expr::Unary { op, operand })
    }

    /// Type coercion of `operand` to `ty`.
    pub fn convert(operand: ExprRef, ty: DataType) -> ExprRef {
        Expr::unary(UnaryOp::Convert(ty), operand)
    }

    /// Quoted lambda, as emitted by hosts for query-operator arguments.
    pub fn quote(lambda: ExprRef) -> ExprRef {
        Expr::unary(UnaryOp::Quote, lambda)
    }

    /// Conditional node.
    pub fn conditional(test: ExprRef, if_true: ExprRef, if_false: ExprRef) -> ExprRef {
        Arc::new(Expr::Conditional {
            test,
            if_true,
            if_false,
        })
    }

    /// Anonymous record initializer `new { name = expr, .. }`.
    pub fn record<I, S>(fields: I) -> ExprRef
    where
        I: IntoIterator<Item = (S, ExprRef)>,
        S: Into<String>,
    {
        let bindings: Vec<MemberBinding> = fields
            .into_iter()
            .map(|(name, expr)| MemberBinding {
                member: Member::new(name, expr.data_type()),
                expr,
            })
            .collect();
        let ty = DataType::anonymous_record(bindings.iter().map(|b| b.member.clone()));
        Arc::new(Expr::Construct(ConstructExpr {
            ty,
            kind: ConstructKind::Initializer,
            bindings,
        }))
    }

    /// Construction of a declared record type.
    ///
    /// Every bound member must belong to `ty`, and its declared type must agree
    /// with the bound expression unless either side is [`DataType::Unknown`].
    pub fn construct(
        ty: DataType,
        kind: ConstructKind,
        bindings: Vec<MemberBinding>,
    ) -> Result<ExprRef> {
        let record = ty.as_record().ok_or_else(|| {
            QueryModelError::invalid("object construction", format!("{ty} is not a record type"))
        })?;
        for binding in &bindings {
            let declared = record.member(&binding.member.name).ok_or_else(|| {
                QueryModelError::invalid(
                    "object construction",
                    format!("{ty} has no member '{}'", binding.member.name),
                )
            })?;
            let bound = binding.expr.data_type();
            if declared.ty != bound && declared.ty != DataType::Unknown && bound != DataType::Unknown
            {
                return Err(QueryModelError::invalid(
                    "object construction",
                    format!(
                        "member '{}' is {} but bound expression is {bound}",
                        declared.name, declared.ty
                    ),
                ));
            }
        }
        Ok(Arc::new(Expr::Construct(ConstructExpr { ty, kind, bindings })))
    }

    /// Reference to the source clause `id`.
    pub fn source_ref(id: SourceId, name: impl Into<String>, ty: DataType) -> ExprRef {
        Arc::new(Expr::SourceRef(SourceRef {
            id,
            name: name.into(),
            ty,
        }))
    }

    /// Wraps a nested query model.
    pub fn subquery(model: QueryModel) -> ExprRef {
        Arc::new(Expr::Subquery(Box::new(model)))
    }

    /// Opaque host node.
    pub fn extension(name: impl Into<String>, ty: DataType, operands: Vec<ExprRef>) -> ExprRef {
        Arc::new(Expr::Extension {
            name: name.into(),
            ty,
            operands,
        })
    }

    /// Value type this node produces, derived from its variant's typing rule.
    pub fn data_type(&self) -> DataType {
        match self {
            Expr::Constant { ty, .. } => ty.clone(),
            Expr::Parameter(param) => param.ty.clone(),
            Expr::MemberAccess { member, .. } => member.ty.clone(),
            Expr::Call(call) => call.method.return_type.clone(),
            Expr::Lambda(lambda) => lambda.data_type(),
            Expr::Binary { op, left, right } => match op {
                op if op.is_predicate() => DataType::Bool,
                BinaryOp::Coalesce => right.data_type(),
                _ => {
                    let left_ty = left.data_type();
                    if right.data_type().is_nullable() && !left_ty.is_nullable() {
                        DataType::nullable(left_ty)
                    } else {
                        left_ty
                    }
                }
            },
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => DataType::Bool,
                UnaryOp::Convert(ty) => ty.clone(),
                UnaryOp::Negate | UnaryOp::Quote => operand.data_type(),
            },
            Expr::Conditional { if_true, .. } => if_true.data_type(),
            Expr::Construct(construct) => construct.ty.clone(),
            Expr::SourceRef(reference) => reference.ty.clone(),
            Expr::Subquery(model) => model.result_type(),
            Expr::Extension { ty, .. } => ty.clone(),
        }
    }

    /// Direct child expressions in a fixed order.
    ///
    /// Subquery nodes report no children: their expressions belong to the
    /// nested model and are reached through it.
    pub fn children(&self) -> SmallVec<[&ExprRef; 4]> {
        let mut out = SmallVec::new();
        match self {
            Expr::Constant { .. } | Expr::Parameter(_) | Expr::SourceRef(_) | Expr::Subquery(_) => {}
            Expr::MemberAccess { target, .. } => out.push(target),
            Expr::Call(call) => {
                if let Some(target) = &call.target {
                    out.push(target);
                }
                out.extend(call.args.iter());
            }
            Expr::Lambda(lambda) => out.push(&lambda.body),
            Expr::Binary { left, right, .. } => {
                out.push(left);
                out.push(right);
            }
            Expr::Unary { operand, .. } => out.push(operand),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                out.push(test);
                out.push(if_true);
                out.push(if_false);
            }
            Expr::Construct(construct) => out.extend(construct.bindings.iter().map(|b| &b.expr)),
            Expr::Extension { operands, .. } => out.extend(operands.iter()),
        }
        out
    }

    /// Lambda payload, looking through a [`UnaryOp::Quote`] wrapper.
    pub fn as_lambda(&self) -> Option<&LambdaExpr> {
        match self {
            Expr::Lambda(lambda) => Some(lambda),
            Expr::Unary {
                op: UnaryOp::Quote,
                operand,
            } => operand.as_lambda(),
            _ => None,
        }
    }

    /// Source reference payload.
    pub fn as_source_ref(&self) -> Option<&SourceRef> {
        match self {
            Expr::SourceRef(reference) => Some(reference),
            _ => None,
        }
    }

    /// Call payload.
    pub fn as_call(&self) -> Option<&CallExpr> {
        match self {
            Expr::Call(call) => Some(call),
            _ => None,
        }
    }

    /// Construction payload.
    pub fn as_construct(&self) -> Option<&ConstructExpr> {
        match self {
            Expr::Construct(construct) => Some(construct),
            _ => None,
        }
    }

    /// Nested model of a subquery node.
    pub fn as_subquery(&self) -> Option<&QueryModel> {
        match self {
            Expr::Subquery(model) => Some(model),
            _ => None,
        }
    }
}

/// Node identity used when searching a tree for a specific sub-expression.
///
/// Two handles denote the same node when they point at the same allocation.
/// Source references are the exception: their identity *is* the referenced
/// source, so two reference nodes to the same clause are the same node.
pub fn same_node(a: &ExprRef, b: &ExprRef) -> bool {
    if Arc::ptr_eq(a, b) {
        return true;
    }
    match (a.as_ref(), b.as_ref()) {
        (Expr::SourceRef(x), Expr::SourceRef(y)) => x.id == y.id,
        _ => false,
    }
}
