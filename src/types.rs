//! Host type descriptions carried by every expression node.
//!
//! The engine never evaluates values, but it has to know what each node would
//! produce: member lookups, sequence element types, and the numeric widening
//! rules of `sum`/`average` are all driven by these descriptions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Result type of an expression node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "snake_case")]
pub enum DataType {
    /// Boolean value.
    Bool,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
    /// Fixed-point decimal.
    Decimal,
    /// UTF-8 string.
    String,
    /// Point in time.
    DateTime,
    /// Value type that also admits null.
    Nullable(Box<DataType>),
    /// Named or anonymous record with ordered members.
    Record(Arc<RecordType>),
    /// Ordered sequence of elements.
    Sequence(Box<DataType>),
    /// A keyed group of elements produced by `group_by`.
    Grouping {
        /// Type of the grouping key.
        key: Box<DataType>,
        /// Type of the grouped elements.
        element: Box<DataType>,
    },
    /// Function type of a lambda.
    Function {
        /// Parameter types in declaration order.
        params: Vec<DataType>,
        /// Return type.
        ret: Box<DataType>,
    },
    /// Type is not known to the engine (opaque host type).
    Unknown,
}

/// Record layout used by member access and object construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordType {
    /// Record name; anonymous records use a generated `{a, b}` style name.
    pub name: String,
    /// Members in declaration order.
    pub members: Vec<Member>,
}

/// A named, typed member of a record.
///
/// Members are the stable field identifiers used by member access and by
/// object-construction bindings; two members are the same field when both
/// name and type agree.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    /// Member name.
    pub name: String,
    /// Member value type.
    pub ty: DataType,
}

impl Member {
    /// Creates a member descriptor.
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl RecordType {
    /// Looks up a member by name.
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }
}

impl DataType {
    /// Builds a named record type.
    pub fn record<I>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = Member>,
    {
        DataType::Record(Arc::new(RecordType {
            name: name.into(),
            members: members.into_iter().collect(),
        }))
    }

    /// Builds an anonymous record type whose name lists its member names.
    pub fn anonymous_record<I>(members: I) -> Self
    where
        I: IntoIterator<Item = Member>,
    {
        let members: Vec<Member> = members.into_iter().collect();
        let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
        let name = format!("{{{}}}", names.join(", "));
        DataType::Record(Arc::new(RecordType { name, members }))
    }

    /// Wraps `element` into a sequence type.
    pub fn sequence(element: DataType) -> Self {
        DataType::Sequence(Box::new(element))
    }

    /// Wraps `inner` into a nullable type; nullable types are not nested.
    pub fn nullable(inner: DataType) -> Self {
        match inner {
            DataType::Nullable(_) => inner,
            other => DataType::Nullable(Box::new(other)),
        }
    }

    /// Builds a grouping type.
    pub fn grouping(key: DataType, element: DataType) -> Self {
        DataType::Grouping {
            key: Box::new(key),
            element: Box::new(element),
        }
    }

    /// Element type when this type can be enumerated.
    pub fn element_type(&self) -> Option<&DataType> {
        match self {
            DataType::Sequence(element) => Some(element),
            DataType::Grouping { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Returns the record layout, if this is a record.
    pub fn as_record(&self) -> Option<&RecordType> {
        match self {
            DataType::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Looks up a member on a record (or the `key` of a grouping). Every
    /// member of an opaque type is itself opaque.
    pub fn member(&self, name: &str) -> Option<Member> {
        match self {
            DataType::Record(record) => record.member(name).cloned(),
            DataType::Unknown => Some(Member::new(name, DataType::Unknown)),
            DataType::Grouping { key, .. } if name == "key" => {
                Some(Member::new("key", (**key).clone()))
            }
            _ => None,
        }
    }

    /// Strips one level of nullability.
    pub fn underlying(&self) -> &DataType {
        match self {
            DataType::Nullable(inner) => inner,
            other => other,
        }
    }

    /// Whether the type is nullable.
    pub fn is_nullable(&self) -> bool {
        matches!(self, DataType::Nullable(_))
    }

    /// Whether the underlying type is one of the numeric primitives.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.underlying(),
            DataType::Int32
                | DataType::Int64
                | DataType::Float32
                | DataType::Float64
                | DataType::Decimal
        )
    }

    /// Result type of `sum` over elements of this type.
    pub fn sum_type(&self) -> Option<DataType> {
        self.is_numeric().then(|| self.clone())
    }

    /// Result type of `average` over elements of this type.
    ///
    /// Integers widen to `Float64`; floating and decimal types are kept.
    /// Nullability is preserved.
    pub fn average_type(&self) -> Option<DataType> {
        let widened = match self.underlying() {
            DataType::Int32 | DataType::Int64 => DataType::Float64,
            DataType::Float32 => DataType::Float32,
            DataType::Float64 => DataType::Float64,
            DataType::Decimal => DataType::Decimal,
            _ => return None,
        };
        if self.is_nullable() {
            Some(DataType::nullable(widened))
        } else {
            Some(widened)
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => write!(f, "bool"),
            DataType::Int32 => write!(f, "i32"),
            DataType::Int64 => write!(f, "i64"),
            DataType::Float32 => write!(f, "f32"),
            DataType::Float64 => write!(f, "f64"),
            DataType::Decimal => write!(f, "decimal"),
            DataType::String => write!(f, "string"),
            DataType::DateTime => write!(f, "datetime"),
            DataType::Nullable(inner) => write!(f, "{inner}?"),
            DataType::Record(record) => write!(f, "{}", record.name),
            DataType::Sequence(element) => write!(f, "seq<{element}>"),
            DataType::Grouping { key, element } => write!(f, "group<{key}, {element}>"),
            DataType::Function { params, ret } => {
                write!(f, "fn(")?;
                for (idx, param) in params.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ") -> {ret}")
            }
            DataType::Unknown => write!(f, "?"),
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)
    }
}
