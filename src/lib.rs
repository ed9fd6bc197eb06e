//! Folds method-chained query expression trees into normalized query models.
//!
//! The pipeline is: a raw call-chain tree ([`expr`]) goes through the
//! node-chain recognizer ([`parse`]) and comes out as a [`model::QueryModel`]
//! made of source clauses, body clauses, a projection, and result operators.
//! The rewriting passes in [`resolve`] and the cloning engine in [`model`]
//! operate on models and expressions after construction.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod expr;
pub mod model;
pub mod parse;
pub mod resolve;
pub mod types;

pub use config::ParserConfig;
pub use error::{ErrorWithCode, QueryModelError, Result};
pub use expr::{Expr, ExprRef};
pub use model::{QueryModel, SourceId, StreamedData};
pub use parse::QueryParser;
pub use types::DataType;
