//! Hand-off of a finished model to an execution backend.

use serde::Serialize;

use crate::error::Result;
use crate::expr::Value;

use super::{QueryModel, StreamedData};

/// Capability a backend exposes for running finished models.
///
/// Which method is called is decided by [`QueryModel::output_shape`], never by
/// the backend.
pub trait QueryExecutor {
    /// Runs a query whose result is one computed value.
    fn execute_scalar(&self, model: &QueryModel) -> Result<Value>;

    /// Runs a query whose result is one element of the sequence. With
    /// `return_default_when_empty` an empty source yields the type default
    /// instead of an error.
    fn execute_single(&self, model: &QueryModel, return_default_when_empty: bool)
        -> Result<Value>;

    /// Runs a query whose result is a sequence.
    fn execute_collection(&self, model: &QueryModel) -> Result<Vec<Value>>;
}

/// Result of [`QueryModel::execute`], tagged with the dispatch path taken.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "shape", content = "value", rename_all = "snake_case")]
pub enum QueryOutput {
    /// From [`QueryExecutor::execute_scalar`].
    Scalar(Value),
    /// From [`QueryExecutor::execute_single`].
    Single(Value),
    /// From [`QueryExecutor::execute_collection`].
    Sequence(Vec<Value>),
}

impl QueryModel {
    /// Dispatches the model to the executor method matching its output shape.
    pub fn execute(&self, executor: &dyn QueryExecutor) -> Result<QueryOutput> {
        match self.output_shape()? {
            StreamedData::Scalar { .. } => executor.execute_scalar(self).map(QueryOutput::Scalar),
            StreamedData::Single {
                return_default_when_empty,
                ..
            } => executor
                .execute_single(self, return_default_when_empty)
                .map(QueryOutput::Single),
            StreamedData::Sequence { .. } => executor
                .execute_collection(self)
                .map(QueryOutput::Sequence),
        }
    }
}
