//! Clause types of a query model.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::Serialize;
use smallvec::SmallVec;

use crate::error::Result;
use crate::expr::{Expr, ExprRef};
use crate::types::DataType;

/// Identity of a source clause, unique for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceId(pub u64);

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

impl SourceId {
    /// Allocates a fresh identity.
    pub fn next() -> Self {
        SourceId(NEXT_SOURCE_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Rewrite callback applied to clause expressions.
pub(crate) type ExprMapper<'a> = dyn FnMut(&ExprRef) -> Result<ExprRef> + 'a;

/// The mandatory first source of a query.
#[derive(Clone, Debug, PartialEq)]
pub struct MainFromClause {
    pub(crate) id: SourceId,
    /// Name the query uses for one item of this source.
    pub item_name: String,
    /// Type of one item.
    pub item_type: DataType,
    /// Sequence the items are drawn from.
    pub from_expression: ExprRef,
}

impl MainFromClause {
    /// Creates the clause with a fresh [`SourceId`].
    pub fn new(item_name: impl Into<String>, item_type: DataType, from_expression: ExprRef) -> Self {
        Self {
            id: SourceId::next(),
            item_name: item_name.into(),
            item_type,
            from_expression,
        }
    }

    /// Source identity.
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// New reference node pointing at this clause.
    pub fn reference(&self) -> ExprRef {
        Expr::source_ref(self.id, self.item_name.clone(), self.item_type.clone())
    }

    pub(crate) fn map_expressions(&self, f: &mut ExprMapper<'_>) -> Result<Self> {
        Ok(Self {
            from_expression: f(&self.from_expression)?,
            ..self.clone()
        })
    }
}

/// A further source drawn per item of the preceding sources (`select_many`).
#[derive(Clone, Debug, PartialEq)]
pub struct AdditionalFromClause {
    pub(crate) id: SourceId,
    /// Name the query uses for one item of this source.
    pub item_name: String,
    /// Type of one item.
    pub item_type: DataType,
    /// Sequence expression, usually correlated with earlier sources.
    pub from_expression: ExprRef,
}

impl AdditionalFromClause {
    /// Creates the clause with a fresh [`SourceId`].
    pub fn new(item_name: impl Into<String>, item_type: DataType, from_expression: ExprRef) -> Self {
        Self {
            id: SourceId::next(),
            item_name: item_name.into(),
            item_type,
            from_expression,
        }
    }

    /// Source identity.
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// New reference node pointing at this clause.
    pub fn reference(&self) -> ExprRef {
        Expr::source_ref(self.id, self.item_name.clone(), self.item_type.clone())
    }
}

/// Inner equi-join against another sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinClause {
    pub(crate) id: SourceId,
    /// Name the query uses for one item of the inner sequence.
    pub item_name: String,
    /// Type of one inner item.
    pub item_type: DataType,
    /// Joined sequence; may not reference the join itself.
    pub inner_sequence: ExprRef,
    /// Key computed from the preceding sources.
    pub outer_key: ExprRef,
    /// Key computed from the joined item.
    pub inner_key: ExprRef,
}

impl JoinClause {
    /// Creates the clause with a fresh [`SourceId`].
    pub fn new(
        item_name: impl Into<String>,
        item_type: DataType,
        inner_sequence: ExprRef,
        outer_key: ExprRef,
        inner_key: ExprRef,
    ) -> Self {
        Self {
            id: SourceId::next(),
            item_name: item_name.into(),
            item_type,
            inner_sequence,
            outer_key,
            inner_key,
        }
    }

    /// Source identity.
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// New reference node pointing at this clause.
    pub fn reference(&self) -> ExprRef {
        Expr::source_ref(self.id, self.item_name.clone(), self.item_type.clone())
    }
}

/// Filter.
#[derive(Clone, Debug, PartialEq)]
pub struct WhereClause {
    /// Boolean predicate over the visible sources.
    pub predicate: ExprRef,
}

/// Sort direction of one ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderingDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl fmt::Display for OrderingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderingDirection::Asc => write!(f, "asc"),
            OrderingDirection::Desc => write!(f, "desc"),
        }
    }
}

/// One sort key.
#[derive(Clone, Debug, PartialEq)]
pub struct Ordering {
    /// Key expression.
    pub expression: ExprRef,
    /// Sort direction.
    pub direction: OrderingDirection,
}

/// Ordering clause; the first ordering is the primary sort key.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderByClause {
    /// Sort keys in priority order.
    pub orderings: Vec<Ordering>,
}

/// Final projection.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectClause {
    /// Projected expression over the visible sources.
    pub selector: ExprRef,
}

impl SelectClause {
    /// Creates a projection.
    pub fn new(selector: ExprRef) -> Self {
        Self { selector }
    }

    pub(crate) fn map_expressions(&self, f: &mut ExprMapper<'_>) -> Result<Self> {
        Ok(Self {
            selector: f(&self.selector)?,
        })
    }
}

/// Clause between the main source and the projection.
#[derive(Clone, Debug, PartialEq)]
pub enum BodyClause {
    /// Filter.
    Where(WhereClause),
    /// Ordering.
    OrderBy(OrderByClause),
    /// Additional source.
    AdditionalFrom(AdditionalFromClause),
    /// Join.
    Join(JoinClause),
}

impl BodyClause {
    /// Filter clause over `predicate`.
    pub fn filter(predicate: ExprRef) -> Self {
        BodyClause::Where(WhereClause { predicate })
    }

    /// Identity of the source this clause declares, if any.
    pub fn source_id(&self) -> Option<SourceId> {
        match self {
            BodyClause::AdditionalFrom(c) => Some(c.id),
            BodyClause::Join(c) => Some(c.id),
            BodyClause::Where(_) | BodyClause::OrderBy(_) => None,
        }
    }

    /// Item name of the declared source, if any.
    pub fn source_name(&self) -> Option<&str> {
        match self {
            BodyClause::AdditionalFrom(c) => Some(&c.item_name),
            BodyClause::Join(c) => Some(&c.item_name),
            BodyClause::Where(_) | BodyClause::OrderBy(_) => None,
        }
    }

    /// Short clause name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            BodyClause::Where(_) => "where",
            BodyClause::OrderBy(_) => "orderby",
            BodyClause::AdditionalFrom(_) => "from",
            BodyClause::Join(_) => "join",
        }
    }

    /// Expressions owned by the clause, each paired with whether it may only
    /// see sources strictly before this clause (sequence-producing expressions)
    /// or may also see the clause's own source.
    pub(crate) fn expressions(&self) -> SmallVec<[(&ExprRef, bool); 3]> {
        let mut out = SmallVec::new();
        match self {
            BodyClause::Where(c) => out.push((&c.predicate, false)),
            BodyClause::OrderBy(c) => out.extend(c.orderings.iter().map(|o| (&o.expression, false))),
            BodyClause::AdditionalFrom(c) => out.push((&c.from_expression, true)),
            BodyClause::Join(c) => {
                out.push((&c.inner_sequence, true));
                out.push((&c.outer_key, true));
                out.push((&c.inner_key, false));
            }
        }
        out
    }

    pub(crate) fn map_expressions(&self, f: &mut ExprMapper<'_>) -> Result<Self> {
        Ok(match self {
            BodyClause::Where(c) => BodyClause::Where(WhereClause {
                predicate: f(&c.predicate)?,
            }),
            BodyClause::OrderBy(c) => {
                let mut orderings = Vec::with_capacity(c.orderings.len());
                for ordering in &c.orderings {
                    orderings.push(Ordering {
                        expression: f(&ordering.expression)?,
                        direction: ordering.direction,
                    });
                }
                BodyClause::OrderBy(OrderByClause { orderings })
            }
            BodyClause::AdditionalFrom(c) => BodyClause::AdditionalFrom(AdditionalFromClause {
                from_expression: f(&c.from_expression)?,
                ..c.clone()
            }),
            BodyClause::Join(c) => BodyClause::Join(JoinClause {
                inner_sequence: f(&c.inner_sequence)?,
                outer_key: f(&c.outer_key)?,
                inner_key: f(&c.inner_key)?,
                ..c.clone()
            }),
        })
    }

    pub(crate) fn with_source_id(mut self, id: SourceId) -> Self {
        match &mut self {
            BodyClause::AdditionalFrom(c) => c.id = id,
            BodyClause::Join(c) => c.id = id,
            BodyClause::Where(_) | BodyClause::OrderBy(_) => {}
        }
        self
    }
}

impl fmt::Display for BodyClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyClause::Where(c) => write!(f, "where {}", c.predicate),
            BodyClause::OrderBy(c) => {
                write!(f, "orderby ")?;
                for (idx, ordering) in c.orderings.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", ordering.expression, ordering.direction)?;
                }
                Ok(())
            }
            BodyClause::AdditionalFrom(c) => write!(
                f,
                "from {} {} in {}",
                c.item_type, c.item_name, c.from_expression
            ),
            BodyClause::Join(c) => write!(
                f,
                "join {} {} in {} on {} equals {}",
                c.item_type, c.item_name, c.inner_sequence, c.outer_key, c.inner_key
            ),
        }
    }
}

/// Borrowed view of any source-declaring clause.
#[derive(Clone, Copy, Debug)]
pub enum QuerySource<'a> {
    /// The main source.
    Main(&'a MainFromClause),
    /// An additional source.
    AdditionalFrom(&'a AdditionalFromClause),
    /// A joined source.
    Join(&'a JoinClause),
}

impl QuerySource<'_> {
    /// Source identity.
    pub fn id(&self) -> SourceId {
        match self {
            QuerySource::Main(c) => c.id,
            QuerySource::AdditionalFrom(c) => c.id,
            QuerySource::Join(c) => c.id,
        }
    }

    /// Item name.
    pub fn item_name(&self) -> &str {
        match self {
            QuerySource::Main(c) => &c.item_name,
            QuerySource::AdditionalFrom(c) => &c.item_name,
            QuerySource::Join(c) => &c.item_name,
        }
    }

    /// Item type.
    pub fn item_type(&self) -> &DataType {
        match self {
            QuerySource::Main(c) => &c.item_type,
            QuerySource::AdditionalFrom(c) => &c.item_type,
            QuerySource::Join(c) => &c.item_type,
        }
    }

    /// New reference node pointing at the source.
    pub fn reference(&self) -> ExprRef {
        Expr::source_ref(self.id(), self.item_name(), self.item_type().clone())
    }
}
