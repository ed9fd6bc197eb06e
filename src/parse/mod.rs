//! Node-chain recognizer: folds a method-call chain into a [`QueryModel`].
//!
//! The chain is flattened from the outermost call inward, then replayed from
//! the innermost call outward. Each call is matched against the
//! [`HandlerRegistry`]; the matching handler adds a clause or result operator
//! to the [`ChainContext`] and updates the current item the next call's
//! lambdas are resolved against.

mod context;
mod handlers;
mod registry;
mod subquery;

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::ParserConfig;
use crate::error::{QueryModelError, Result};
use crate::expr::{CallExpr, Expr, ExprRef};
use crate::model::{MainFromClause, QueryModel, SourceId};
use crate::types::DataType;

pub use context::ChainContext;
pub use registry::{ArgShape, ChainCall, ChainHandler, HandlerRegistry, MethodSignature};

use context::NameGenerator;

/// Recognizer over a handler registry.
pub struct QueryParser {
    registry: HandlerRegistry,
    config: ParserConfig,
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryParser {
    /// Parser with the standard handlers and default configuration.
    pub fn new() -> Self {
        Self::with_config(ParserConfig::default())
    }

    /// Parser with the standard handlers.
    pub fn with_config(config: ParserConfig) -> Self {
        Self::with_registry(HandlerRegistry::standard(), config)
    }

    /// Parser over a caller-built registry.
    pub fn with_registry(registry: HandlerRegistry, config: ParserConfig) -> Self {
        Self { registry, config }
    }

    /// Registry, for registering additional handlers.
    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.registry
    }

    /// Active configuration.
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub(crate) fn is_operator_call(&self, call: &CallExpr) -> bool {
        self.config.is_operator_owner(&call.method.owner)
    }

    /// Folds the chain rooted at `root` into a model whose main source yields
    /// items of `element_type`.
    ///
    /// A root that is not an operator call is its own source: the result is
    /// the identity query over it.
    pub fn parse(&self, root: &ExprRef, element_type: DataType) -> Result<QueryModel> {
        let mut names = NameGenerator::new(&self.config.generated_name_prefix);
        self.parse_chain(root, Some(element_type), BTreeSet::new(), &mut names)
    }

    pub(crate) fn parse_chain(
        &self,
        root: &ExprRef,
        element_type: Option<DataType>,
        outer_scope: BTreeSet<SourceId>,
        names: &mut NameGenerator,
    ) -> Result<QueryModel> {
        let (source, calls) = self.flatten(root)?;
        debug!(
            calls = calls.len(),
            outer_scope = outer_scope.len(),
            "query.parse.start"
        );

        let element_type = element_type
            .or_else(|| source.data_type().element_type().cloned())
            .unwrap_or(DataType::Unknown);
        let item_name = match calls.first().and_then(|call| call.first_param_name()) {
            Some(name) => name.to_owned(),
            None => names.fresh(),
        };
        let main_from = MainFromClause::new(item_name, element_type, source.clone());

        let mut ctx = ChainContext::new(self, names, outer_scope, main_from);
        for call in &calls {
            let handler = self.registry.find(call).ok_or_else(|| {
                QueryModelError::unrecognized(
                    call.expr,
                    format!(
                        "no handler matches {} with {} argument(s)",
                        call.name(),
                        call.args.len()
                    ),
                )
            })?;
            handler.apply(call, &mut ctx)?;
        }
        ctx.finish()
    }

    /// Splits the chain into its innermost source and its calls, innermost
    /// first.
    fn flatten<'a>(&self, root: &'a ExprRef) -> Result<(&'a ExprRef, Vec<ChainCall<'a>>)> {
        let mut calls = Vec::new();
        let mut current = root;
        while let Expr::Call(call) = current.as_ref() {
            if !self.is_operator_call(call) {
                break;
            }
            if calls.len() == self.config.max_chain_length {
                return Err(QueryModelError::invalid(
                    "chain recognition",
                    format!(
                        "chain exceeds the configured maximum of {} calls",
                        self.config.max_chain_length
                    ),
                ));
            }
            let (source, args) = match (&call.target, call.args.split_first()) {
                (Some(target), _) => (target, call.args.as_slice()),
                (None, Some((first, rest))) => (first, rest),
                (None, None) => {
                    return Err(QueryModelError::unrecognized(
                        current,
                        format!("{} has no source to operate on", call.method.name),
                    ))
                }
            };
            calls.push(ChainCall {
                expr: current,
                method: &call.method,
                args,
            });
            current = source;
        }
        calls.reverse();
        Ok((current, calls))
    }
}
