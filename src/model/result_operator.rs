//! Result operators applied after the projection.

use std::fmt;

use smallvec::SmallVec;

use crate::error::{QueryModelError, Result};
use crate::expr::{ExprRef, LambdaExpr};
use crate::types::DataType;

use super::clause::ExprMapper;
use super::shape::StreamedData;

/// Kind of a two-sequence set operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SetOperationKind {
    /// Distinct union.
    Union,
    /// Concatenation keeping duplicates.
    Concat,
    /// Intersection.
    Intersect,
    /// Difference.
    Except,
}

impl SetOperationKind {
    /// Operator name as written in a chain.
    pub fn name(self) -> &'static str {
        match self {
            SetOperationKind::Union => "Union",
            SetOperationKind::Concat => "Concat",
            SetOperationKind::Intersect => "Intersect",
            SetOperationKind::Except => "Except",
        }
    }
}

/// Terminal or chained operation applied to the projected sequence.
///
/// Expressions carried by an operator are resolved against the model, so they
/// refer to sources through reference nodes. The accumulating functions of
/// the aggregate operators are the exception: they are stored as lambdas over
/// an opaque item.
#[derive(Clone, Debug, PartialEq)]
pub enum ResultOperator {
    /// Number of items as `i32`.
    Count,
    /// Number of items as `i64`.
    LongCount,
    /// Drops duplicate items.
    Distinct,
    /// Reverses item order.
    Reverse,
    /// Keeps the first `n` items.
    Take(ExprRef),
    /// Drops the first `n` items.
    Skip(ExprRef),
    /// First item.
    First {
        /// Yield the type default on an empty sequence.
        return_default_when_empty: bool,
    },
    /// Last item.
    Last {
        /// Yield the type default on an empty sequence.
        return_default_when_empty: bool,
    },
    /// The only item.
    Single {
        /// Yield the type default on an empty sequence.
        return_default_when_empty: bool,
    },
    /// Smallest item.
    Min,
    /// Largest item.
    Max,
    /// Sum of numeric items.
    Sum,
    /// Mean of numeric items.
    Average,
    /// Whether the sequence has items.
    Any,
    /// Whether every item satisfies the predicate.
    All {
        /// Resolved predicate.
        predicate: ExprRef,
    },
    /// Whether the sequence contains `item`.
    Contains {
        /// Searched value.
        item: ExprRef,
    },
    /// Converts every item to `target`.
    Cast {
        /// Target item type.
        target: DataType,
    },
    /// Keeps items of type `target`.
    OfType {
        /// Target item type.
        target: DataType,
    },
    /// Yields a single default item when the sequence is empty.
    DefaultIfEmpty {
        /// Explicit default; the type default when absent.
        default_value: Option<ExprRef>,
    },
    /// Combination with a second sequence.
    SetOperation {
        /// Operation kind.
        kind: SetOperationKind,
        /// The second sequence.
        source2: ExprRef,
    },
    /// Groups items by key.
    GroupBy {
        /// Name under which downstream clauses see one group.
        item_name: String,
        /// Resolved key expression.
        key_selector: ExprRef,
        /// Resolved element expression.
        element_selector: ExprRef,
    },
    /// Folds items with `func(acc, item)`; the first item seeds the fold.
    Aggregate {
        /// Accumulating function over `(acc, item)`.
        func: LambdaExpr,
    },
    /// Folds items with `func(acc, item)` starting at `seed`.
    AggregateFromSeed {
        /// Initial accumulator.
        seed: ExprRef,
        /// Accumulating function over `(acc, item)`.
        func: LambdaExpr,
        /// Optional final projection of the accumulator.
        result_selector: Option<LambdaExpr>,
    },
}

impl ResultOperator {
    /// Operator name as written in a chain.
    pub fn name(&self) -> &'static str {
        match self {
            ResultOperator::Count => "Count",
            ResultOperator::LongCount => "LongCount",
            ResultOperator::Distinct => "Distinct",
            ResultOperator::Reverse => "Reverse",
            ResultOperator::Take(_) => "Take",
            ResultOperator::Skip(_) => "Skip",
            ResultOperator::First { .. } => "First",
            ResultOperator::Last { .. } => "Last",
            ResultOperator::Single { .. } => "Single",
            ResultOperator::Min => "Min",
            ResultOperator::Max => "Max",
            ResultOperator::Sum => "Sum",
            ResultOperator::Average => "Average",
            ResultOperator::Any => "Any",
            ResultOperator::All { .. } => "All",
            ResultOperator::Contains { .. } => "Contains",
            ResultOperator::Cast { .. } => "Cast",
            ResultOperator::OfType { .. } => "OfType",
            ResultOperator::DefaultIfEmpty { .. } => "DefaultIfEmpty",
            ResultOperator::SetOperation { kind, .. } => kind.name(),
            ResultOperator::GroupBy { .. } => "GroupBy",
            ResultOperator::Aggregate { .. } => "Aggregate",
            ResultOperator::AggregateFromSeed { .. } => "Aggregate",
        }
    }

    /// Whether downstream clauses still see the projected item unchanged.
    ///
    /// Operators that keep item identity (filters, limits, reordering) can be
    /// followed by further clauses over the same item; the others change what
    /// one item is and force the preceding query into a subquery.
    pub fn is_item_preserving(&self) -> bool {
        matches!(
            self,
            ResultOperator::Distinct
                | ResultOperator::Reverse
                | ResultOperator::Take(_)
                | ResultOperator::Skip(_)
                | ResultOperator::SetOperation { .. }
                | ResultOperator::DefaultIfEmpty { .. }
        )
    }

    /// Output descriptor for the given input descriptor.
    pub fn output_shape(&self, input: &StreamedData) -> Result<StreamedData> {
        let op = self.name();
        match self {
            ResultOperator::Count => {
                require_sequence(op, input)?;
                Ok(StreamedData::scalar(DataType::Int32))
            }
            ResultOperator::LongCount => {
                require_sequence(op, input)?;
                Ok(StreamedData::scalar(DataType::Int64))
            }
            ResultOperator::Any
            | ResultOperator::All { .. }
            | ResultOperator::Contains { .. } => {
                require_sequence(op, input)?;
                Ok(StreamedData::scalar(DataType::Bool))
            }
            ResultOperator::Distinct
            | ResultOperator::Reverse
            | ResultOperator::Take(_)
            | ResultOperator::Skip(_)
            | ResultOperator::DefaultIfEmpty { .. }
            | ResultOperator::SetOperation { .. } => {
                let item = require_sequence(op, input)?;
                Ok(StreamedData::sequence(item.clone()))
            }
            ResultOperator::First {
                return_default_when_empty,
            }
            | ResultOperator::Last {
                return_default_when_empty,
            }
            | ResultOperator::Single {
                return_default_when_empty,
            } => {
                let item = require_sequence(op, input)?;
                Ok(StreamedData::Single {
                    ty: item.clone(),
                    return_default_when_empty: *return_default_when_empty,
                })
            }
            ResultOperator::Min | ResultOperator::Max => {
                let item = require_sequence(op, input)?;
                Ok(StreamedData::Single {
                    ty: item.clone(),
                    return_default_when_empty: false,
                })
            }
            ResultOperator::Sum => {
                let item = require_sequence(op, input)?;
                item.sum_type()
                    .map(StreamedData::scalar)
                    .ok_or_else(|| numeric_mismatch(op, item))
            }
            ResultOperator::Average => {
                let item = require_sequence(op, input)?;
                item.average_type()
                    .map(StreamedData::scalar)
                    .ok_or_else(|| numeric_mismatch(op, item))
            }
            ResultOperator::Cast { target } | ResultOperator::OfType { target } => {
                require_sequence(op, input)?;
                Ok(StreamedData::sequence(target.clone()))
            }
            ResultOperator::GroupBy {
                key_selector,
                element_selector,
                ..
            } => {
                require_sequence(op, input)?;
                Ok(StreamedData::sequence(DataType::grouping(
                    key_selector.data_type(),
                    element_selector.data_type(),
                )))
            }
            ResultOperator::Aggregate { func } => {
                require_sequence(op, input)?;
                Ok(StreamedData::scalar(func.body.data_type()))
            }
            ResultOperator::AggregateFromSeed {
                func,
                result_selector,
                ..
            } => {
                require_sequence(op, input)?;
                let ty = match result_selector {
                    Some(selector) => selector.body.data_type(),
                    None => func.body.data_type(),
                };
                Ok(StreamedData::scalar(ty))
            }
        }
    }

    /// Expressions resolved against the model (not the aggregate lambdas).
    pub(crate) fn expressions(&self) -> SmallVec<[&ExprRef; 2]> {
        let mut out = SmallVec::new();
        match self {
            ResultOperator::Take(e) | ResultOperator::Skip(e) => out.push(e),
            ResultOperator::All { predicate } => out.push(predicate),
            ResultOperator::Contains { item } => out.push(item),
            ResultOperator::DefaultIfEmpty {
                default_value: Some(value),
            } => out.push(value),
            ResultOperator::SetOperation { source2, .. } => out.push(source2),
            ResultOperator::GroupBy {
                key_selector,
                element_selector,
                ..
            } => {
                out.push(key_selector);
                out.push(element_selector);
            }
            ResultOperator::AggregateFromSeed { seed, .. } => out.push(seed),
            _ => {}
        }
        out
    }

    /// Lambdas carried by the aggregate operators.
    pub(crate) fn lambdas(&self) -> SmallVec<[&LambdaExpr; 2]> {
        let mut out = SmallVec::new();
        match self {
            ResultOperator::Aggregate { func } => out.push(func),
            ResultOperator::AggregateFromSeed {
                func,
                result_selector,
                ..
            } => {
                out.push(func);
                if let Some(selector) = result_selector {
                    out.push(selector);
                }
            }
            _ => {}
        }
        out
    }

    pub(crate) fn map_expressions(&self, f: &mut ExprMapper<'_>) -> Result<Self> {
        Ok(match self {
            ResultOperator::Take(e) => ResultOperator::Take(f(e)?),
            ResultOperator::Skip(e) => ResultOperator::Skip(f(e)?),
            ResultOperator::All { predicate } => ResultOperator::All {
                predicate: f(predicate)?,
            },
            ResultOperator::Contains { item } => ResultOperator::Contains { item: f(item)? },
            ResultOperator::DefaultIfEmpty { default_value } => ResultOperator::DefaultIfEmpty {
                default_value: default_value.as_ref().map(|v| f(v)).transpose()?,
            },
            ResultOperator::SetOperation { kind, source2 } => ResultOperator::SetOperation {
                kind: *kind,
                source2: f(source2)?,
            },
            ResultOperator::GroupBy {
                item_name,
                key_selector,
                element_selector,
            } => ResultOperator::GroupBy {
                item_name: item_name.clone(),
                key_selector: f(key_selector)?,
                element_selector: f(element_selector)?,
            },
            ResultOperator::Aggregate { func } => ResultOperator::Aggregate {
                func: map_lambda(func, f)?,
            },
            ResultOperator::AggregateFromSeed {
                seed,
                func,
                result_selector,
            } => ResultOperator::AggregateFromSeed {
                seed: f(seed)?,
                func: map_lambda(func, f)?,
                result_selector: result_selector
                    .as_ref()
                    .map(|selector| map_lambda(selector, f))
                    .transpose()?,
            },
            other => other.clone(),
        })
    }
}

fn map_lambda(lambda: &LambdaExpr, f: &mut ExprMapper<'_>) -> Result<LambdaExpr> {
    let mapped = f(&lambda.to_expr())?;
    mapped.as_lambda().cloned().ok_or_else(|| {
        QueryModelError::invalid(
            "result operator rewrite",
            format!("rewrite of '{}' must stay a lambda, got '{mapped}'", lambda.to_expr()),
        )
    })
}

fn require_sequence<'a>(operator: &'static str, input: &'a StreamedData) -> Result<&'a DataType> {
    input.item_type().ok_or_else(|| QueryModelError::ShapeMismatch {
        operator,
        expected: "sequence".into(),
        found: input.to_string(),
    })
}

fn numeric_mismatch(operator: &'static str, item: &DataType) -> QueryModelError {
    QueryModelError::ShapeMismatch {
        operator,
        expected: "numeric items".into(),
        found: format!("sequence<{item}>"),
    }
}

impl fmt::Display for ResultOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let or_default = |flag: bool| if flag { "OrDefault" } else { "" };
        match self {
            ResultOperator::Take(e) | ResultOperator::Skip(e) => write!(f, "{}({e})", self.name()),
            ResultOperator::First {
                return_default_when_empty,
            }
            | ResultOperator::Last {
                return_default_when_empty,
            }
            | ResultOperator::Single {
                return_default_when_empty,
            } => write!(f, "{}{}()", self.name(), or_default(*return_default_when_empty)),
            ResultOperator::All { predicate } => write!(f, "All({predicate})"),
            ResultOperator::Contains { item } => write!(f, "Contains({item})"),
            ResultOperator::Cast { target } => write!(f, "Cast<{target}>()"),
            ResultOperator::OfType { target } => write!(f, "OfType<{target}>()"),
            ResultOperator::DefaultIfEmpty {
                default_value: Some(value),
            } => write!(f, "DefaultIfEmpty({value})"),
            ResultOperator::SetOperation { kind, source2 } => write!(f, "{}({source2})", kind.name()),
            ResultOperator::GroupBy {
                key_selector,
                element_selector,
                ..
            } => write!(f, "GroupBy({key_selector}, {element_selector})"),
            ResultOperator::Aggregate { func } => write!(f, "Aggregate({})", func.to_expr()),
            ResultOperator::AggregateFromSeed {
                seed,
                func,
                result_selector,
            } => {
                write!(f, "Aggregate({seed}, {}", func.to_expr())?;
                if let Some(selector) = result_selector {
                    write!(f, ", {}", selector.to_expr())?;
                }
                write!(f, ")")
            }
            _ => write!(f, "{}()", self.name()),
        }
    }
}
