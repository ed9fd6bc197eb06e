//! Streamed-result shape descriptors and their propagation through result
//! operators.

use std::fmt;

use serde::Serialize;

use crate::error::Result;
use crate::types::DataType;

use super::ResultOperator;

/// What a query (or a prefix of its result-operator chain) streams out.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum StreamedData {
    /// A single computed value such as a count.
    Scalar {
        /// Value type.
        ty: DataType,
    },
    /// One element picked from the sequence.
    Single {
        /// Element type.
        ty: DataType,
        /// Yield the type default instead of failing on an empty source.
        return_default_when_empty: bool,
    },
    /// A sequence of items.
    Sequence {
        /// Item type.
        item_type: DataType,
    },
}

impl StreamedData {
    /// Sequence descriptor.
    pub fn sequence(item_type: DataType) -> Self {
        StreamedData::Sequence { item_type }
    }

    /// Scalar descriptor.
    pub fn scalar(ty: DataType) -> Self {
        StreamedData::Scalar { ty }
    }

    /// Type of the whole streamed result; sequences report `seq<item>`.
    pub fn data_type(&self) -> DataType {
        match self {
            StreamedData::Scalar { ty } | StreamedData::Single { ty, .. } => ty.clone(),
            StreamedData::Sequence { item_type } => DataType::sequence(item_type.clone()),
        }
    }

    /// Item type when this is a sequence.
    pub fn item_type(&self) -> Option<&DataType> {
        match self {
            StreamedData::Sequence { item_type } => Some(item_type),
            _ => None,
        }
    }

    /// Short shape name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamedData::Scalar { .. } => "scalar",
            StreamedData::Single { .. } => "single",
            StreamedData::Sequence { .. } => "sequence",
        }
    }
}

impl fmt::Display for StreamedData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamedData::Scalar { ty } => write!(f, "scalar<{ty}>"),
            StreamedData::Single {
                ty,
                return_default_when_empty,
            } => {
                if *return_default_when_empty {
                    write!(f, "single_or_default<{ty}>")
                } else {
                    write!(f, "single<{ty}>")
                }
            }
            StreamedData::Sequence { item_type } => write!(f, "sequence<{item_type}>"),
        }
    }
}

/// Left-to-right application of each operator's shape function.
pub fn compose<'a, I>(start: StreamedData, operators: I) -> Result<StreamedData>
where
    I: IntoIterator<Item = &'a ResultOperator>,
{
    operators
        .into_iter()
        .try_fold(start, |shape, op| op.output_shape(&shape))
}

/// Memoized composition over an operator chain.
///
/// Holds the descriptor after every prefix so that the shape after appending
/// or truncating operators is recomputed from the last cached point only.
#[derive(Clone, Debug)]
pub struct ShapeChain {
    prefixes: Vec<StreamedData>,
}

impl ShapeChain {
    /// Starts a chain at `start`.
    pub fn new(start: StreamedData) -> Self {
        Self {
            prefixes: vec![start],
        }
    }

    /// Applies `op` to the current descriptor.
    pub fn push(&mut self, op: &ResultOperator) -> Result<&StreamedData> {
        let next = op.output_shape(self.current())?;
        self.prefixes.push(next);
        Ok(self.current())
    }

    /// Drops the last `n` applied operators.
    pub fn truncate(&mut self, n: usize) {
        let keep = self.prefixes.len().saturating_sub(n).max(1);
        self.prefixes.truncate(keep);
    }

    /// Descriptor after all applied operators.
    pub fn current(&self) -> &StreamedData {
        // `prefixes` always holds at least the start descriptor.
        &self.prefixes[self.prefixes.len() - 1]
    }

    /// Number of operators applied.
    pub fn len(&self) -> usize {
        self.prefixes.len() - 1
    }

    /// Whether no operator was applied yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
