#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::model::SourceId;

/// Structured errors emitted while building, mutating, or rewriting query models.
///
/// Every variant carries rendered expressions so a failure can be diagnosed
/// without re-running the pass that produced it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryModelError {
    /// A call in the chain matched no registered handler.
    #[error("unrecognized chain shape at '{expression}': {reason}")]
    UnrecognizedChainShape { expression: String, reason: String },
    /// The searched node does not occur inside the container expression.
    #[error("cannot find '{searched}' inside '{container}'")]
    AccessorNotFound { searched: String, container: String },
    /// Strict reference replacement met a source without a mapping.
    #[error("no mapping for query source {query_source} in '{expression}'")]
    UnmappedReference {
        query_source: String,
        expression: String,
    },
    /// A mutation would leave a forward or orphaned source reference.
    #[error("query source {query_source} is referenced out of order by {referenced_by}")]
    DanglingReference {
        query_source: String,
        referenced_by: String,
    },
    /// A reference could not be re-expressed as an accessor on the item shape.
    #[error("cannot reverse-resolve against item shape '{item_shape}': {inner}")]
    ReverseResolution {
        item_shape: String,
        inner: Box<QueryModelError>,
    },
    /// A result operator was applied to an incompatible streamed shape.
    #[error("{operator} expects {expected} but input is {found}")]
    ShapeMismatch {
        operator: &'static str,
        expected: String,
        found: String,
    },
    /// A node or argument is malformed for the requested operation.
    #[error("invalid argument for {context}: {reason}")]
    InvalidArgument {
        context: &'static str,
        reason: String,
    },
    /// A source identity was encountered twice while walking nested models.
    #[error("query source {query_source} is declared more than once in a model tree")]
    CyclicModel { query_source: String },
}

/// Convenience alias for fallible engine operations.
pub type Result<T> = std::result::Result<T, QueryModelError>;

impl QueryModelError {
    /// Builds an [`QueryModelError::UnrecognizedChainShape`].
    pub fn unrecognized(expression: impl fmt::Display, reason: impl Into<String>) -> Self {
        QueryModelError::UnrecognizedChainShape {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    /// Builds an [`QueryModelError::InvalidArgument`].
    pub fn invalid(context: &'static str, reason: impl Into<String>) -> Self {
        QueryModelError::InvalidArgument {
            context,
            reason: reason.into(),
        }
    }

    pub(crate) fn dangling(source: SourceId, name: &str, referenced_by: impl Into<String>) -> Self {
        QueryModelError::DanglingReference {
            query_source: format!("{name}#{}", source.0),
            referenced_by: referenced_by.into(),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryModelError::UnrecognizedChainShape { .. } => "UnrecognizedChainShape",
            QueryModelError::AccessorNotFound { .. } => "AccessorNotFound",
            QueryModelError::UnmappedReference { .. } => "UnmappedReference",
            QueryModelError::DanglingReference { .. } => "DanglingReference",
            QueryModelError::ReverseResolution { .. } => "ReverseResolution",
            QueryModelError::ShapeMismatch { .. } => "ShapeMismatch",
            QueryModelError::InvalidArgument { .. } => "InvalidArgument",
            QueryModelError::CyclicModel { .. } => "CyclicModel",
        }
    }
}

/// Convenience wrapper that formats engine errors with their codes.
pub struct ErrorWithCode<'a>(pub &'a QueryModelError);

impl fmt::Display for ErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
