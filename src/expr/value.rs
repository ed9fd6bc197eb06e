//! Constant values embedded in expression trees and returned by executors.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::DataType;

/// Typed value tagged with explicit type information so the JSON encoding
/// used by the CLI remains unambiguous.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    String(String),
    /// Milliseconds since Unix epoch in UTC.
    DateTime(i64),
    /// Constant list (e.g. the operand of `contains`).
    List(Vec<Value>),
    /// Named root data source a query chain starts from.
    Source(String),
}

impl Value {
    /// Value a backend returns for an empty source when asked for a default.
    pub fn default_for(ty: &DataType) -> Value {
        match ty {
            DataType::Bool => Value::Bool(false),
            DataType::Int32 | DataType::Int64 => Value::Int(0),
            DataType::Float32 | DataType::Float64 | DataType::Decimal => Value::Float(0.0),
            DataType::DateTime => Value::DateTime(0),
            _ => Value::Null,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "\"{v}\""),
            Value::DateTime(v) => write!(f, "datetime({v})"),
            Value::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Source(name) => write!(f, "{name}"),
        }
    }
}
