//! Deep cloning of query models with fresh source identities.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::error::{QueryModelError, Result};
use crate::expr::{Expr, ExprRef};
use crate::resolve::replace::{ReferenceReplacer, SubqueryMode};

use super::{QueryModel, SourceId};

/// Transient map from original source identity to replacement expression.
///
/// Lookups fall back to the parent mapping, which is how a nested model cloned
/// inside an enclosing clone sees the enclosing model's new identities.
/// Retained identities are sources that intentionally map to themselves.
#[derive(Debug, Default)]
pub struct QuerySourceMapping<'p> {
    entries: FxHashMap<SourceId, ExprRef>,
    retained: FxHashSet<SourceId>,
    parent: Option<&'p QuerySourceMapping<'p>>,
}

impl QuerySourceMapping<'_> {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `id` to `replacement`, returning any previous entry at this level.
    pub fn insert(&mut self, id: SourceId, replacement: ExprRef) -> Option<ExprRef> {
        self.entries.insert(id, replacement)
    }

    /// Marks `id` as mapping to itself.
    pub fn retain(&mut self, id: SourceId) {
        self.retained.insert(id);
    }

    /// Replacement for `id`, searching enclosing mappings too.
    pub fn get(&self, id: SourceId) -> Option<&ExprRef> {
        match self.entries.get(&id) {
            Some(replacement) => Some(replacement),
            None => self.parent.and_then(|parent| parent.get(id)),
        }
    }

    /// Whether `id` maps to itself at this or an enclosing level.
    pub fn is_retained(&self, id: SourceId) -> bool {
        self.retained.contains(&id) || self.parent.is_some_and(|parent| parent.is_retained(id))
    }

    /// Whether `id` is known at this or an enclosing level.
    pub fn contains(&self, id: SourceId) -> bool {
        self.get(id).is_some() || self.is_retained(id)
    }

    /// Empty mapping whose lookups fall back to `self`.
    pub fn child(&self) -> QuerySourceMapping<'_> {
        QuerySourceMapping {
            entries: FxHashMap::default(),
            retained: FxHashSet::default(),
            parent: Some(self),
        }
    }

    /// Entries at this level.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether this level holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl QueryModel {
    /// Independent copy with fresh identities for every source, nested
    /// subqueries included. References to the outer scope are kept as is.
    pub fn deep_clone(&self) -> Result<QueryModel> {
        let mut mapping = QuerySourceMapping::new();
        for id in &self.outer_scope {
            mapping.retain(*id);
        }
        self.deep_clone_with(&mut mapping)
    }

    /// Clones the model, recording old → new references in `mapping`.
    ///
    /// All of this model's sources are mapped before any expression is
    /// cloned, so references resolve regardless of clause order. References
    /// the mapping (or its parents) cannot resolve fail with
    /// [`QueryModelError::UnmappedReference`].
    pub fn deep_clone_with(&self, mapping: &mut QuerySourceMapping<'_>) -> Result<QueryModel> {
        let sources = self.sources();
        for source in &sources {
            if mapping.contains(source.id()) {
                return Err(QueryModelError::CyclicModel {
                    query_source: format!("{}{}", source.item_name(), source.id()),
                });
            }
        }
        let mut fresh = FxHashMap::default();
        for source in &sources {
            let id = SourceId::next();
            fresh.insert(source.id(), id);
            mapping.insert(
                source.id(),
                Expr::source_ref(id, source.item_name(), source.item_type().clone()),
            );
        }

        let mapping: &QuerySourceMapping<'_> = mapping;
        let mut clone_expr = |expr: &ExprRef| -> Result<ExprRef> {
            ReferenceReplacer::new(mapping, true, SubqueryMode::Clone).replace(expr)
        };

        let mut main_from = self.main_from.map_expressions(&mut clone_expr)?;
        main_from.id = fresh_id(&fresh, main_from.id);
        let mut body = Vec::with_capacity(self.body_clauses.len());
        for clause in &self.body_clauses {
            let cloned = clause.map_expressions(&mut clone_expr)?;
            body.push(match clause.source_id() {
                Some(id) => cloned.with_source_id(fresh_id(&fresh, id)),
                None => cloned,
            });
        }
        let select = self.select.map_expressions(&mut clone_expr)?;
        let mut ops = Vec::with_capacity(self.result_operators.len());
        for op in &self.result_operators {
            ops.push(op.map_expressions(&mut clone_expr)?);
        }
        let outer_scope = self
            .outer_scope
            .iter()
            .map(|id| {
                mapping
                    .get(*id)
                    .and_then(|replacement| replacement.as_source_ref())
                    .map_or(*id, |reference| reference.id)
            })
            .collect();

        let cloned = QueryModel::from_parts(main_from, body, select, ops, outer_scope)?;
        trace!(
            sources = sources.len(),
            body_clauses = cloned.body_clauses.len(),
            result_operators = cloned.result_operators.len(),
            "query.model.clone"
        );
        Ok(cloned)
    }
}

fn fresh_id(fresh: &FxHashMap<SourceId, SourceId>, id: SourceId) -> SourceId {
    fresh.get(&id).copied().unwrap_or(id)
}
