//! Handler registry keyed by call signature.

use crate::error::{QueryModelError, Result};
use crate::expr::{ExprRef, LambdaExpr, MethodRef};
use crate::types::DataType;

use super::context::ChainContext;

/// Shape of one argument in a [`MethodSignature`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgShape {
    /// Anything.
    Any,
    /// A (possibly quoted) lambda with exactly this many parameters.
    Lambda(usize),
    /// Anything but a lambda.
    NotLambda,
}

impl ArgShape {
    fn matches(self, arg: &ExprRef) -> bool {
        match self {
            ArgShape::Any => true,
            ArgShape::Lambda(arity) => arg.as_lambda().is_some_and(|l| l.params.len() == arity),
            ArgShape::NotLambda => arg.as_lambda().is_none(),
        }
    }
}

/// Method name plus the shapes of the arguments after the chain source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSignature {
    /// Method name.
    pub name: String,
    /// Argument shapes, the chain source excluded.
    pub args: Vec<ArgShape>,
}

impl MethodSignature {
    /// Creates a signature.
    pub fn new(name: impl Into<String>, args: &[ArgShape]) -> Self {
        Self {
            name: name.into(),
            args: args.to_vec(),
        }
    }

    /// Whether `call` has this signature.
    pub fn matches(&self, call: &ChainCall<'_>) -> bool {
        call.method.name == self.name
            && call.args.len() == self.args.len()
            && self
                .args
                .iter()
                .zip(call.args)
                .all(|(shape, arg)| shape.matches(arg))
    }
}

/// One operator call of a chain, with its source argument split off.
#[derive(Clone, Copy, Debug)]
pub struct ChainCall<'a> {
    /// The whole call node.
    pub expr: &'a ExprRef,
    /// Called method.
    pub method: &'a MethodRef,
    /// Arguments after the chain source.
    pub args: &'a [ExprRef],
}

impl<'a> ChainCall<'a> {
    /// Method name.
    pub fn name(&self) -> &'a str {
        &self.method.name
    }

    /// Argument `idx` (source excluded).
    pub fn arg(&self, idx: usize) -> Result<&'a ExprRef> {
        self.args.get(idx).ok_or_else(|| {
            QueryModelError::unrecognized(self.expr, format!("missing argument {idx}"))
        })
    }

    /// Argument `idx` as a lambda.
    pub fn lambda(&self, idx: usize) -> Result<&'a LambdaExpr> {
        self.arg(idx)?.as_lambda().ok_or_else(|| {
            QueryModelError::unrecognized(self.expr, format!("argument {idx} is not a lambda"))
        })
    }

    /// Explicit generic argument `idx`.
    pub fn type_arg(&self, idx: usize) -> Result<&'a DataType> {
        self.method.type_args.get(idx).ok_or_else(|| {
            QueryModelError::unrecognized(self.expr, format!("missing type argument {idx}"))
        })
    }

    /// First parameter name of the first lambda argument.
    pub fn first_param_name(&self) -> Option<&'a str> {
        self.args
            .iter()
            .find_map(|arg| arg.as_lambda())
            .and_then(|lambda| lambda.param_name(0))
    }
}

/// Folds one recognized call into the query under construction.
pub trait ChainHandler: Send + Sync {
    /// Applies the call to `ctx`.
    fn apply(&self, call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()>;
}

impl<F> ChainHandler for F
where
    F: Fn(&ChainCall<'_>, &mut ChainContext<'_>) -> Result<()> + Send + Sync,
{
    fn apply(&self, call: &ChainCall<'_>, ctx: &mut ChainContext<'_>) -> Result<()> {
        self(call, ctx)
    }
}

/// Ordered list of handlers; the first whose signature matches wins, so more
/// specific signatures must be registered first.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: Vec<(MethodSignature, Box<dyn ChainHandler>)>,
}

impl HandlerRegistry {
    /// Registry without handlers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the standard operator handlers.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        super::handlers::register_standard(&mut registry);
        registry
    }

    /// Appends a handler.
    pub fn register(&mut self, signature: MethodSignature, handler: impl ChainHandler + 'static) {
        self.register_boxed(signature, Box::new(handler));
    }

    pub(crate) fn register_boxed(
        &mut self,
        signature: MethodSignature,
        handler: Box<dyn ChainHandler>,
    ) {
        self.entries.push((signature, handler));
    }

    /// Inserts a handler ahead of every registered one.
    pub fn register_first(
        &mut self,
        signature: MethodSignature,
        handler: impl ChainHandler + 'static,
    ) {
        self.entries.insert(0, (signature, Box::new(handler)));
    }

    /// First handler whose signature matches `call`.
    pub fn find(&self, call: &ChainCall<'_>) -> Option<&dyn ChainHandler> {
        self.entries
            .iter()
            .find(|(signature, _)| signature.matches(call))
            .map(|(_, handler)| handler.as_ref())
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
