//! Graph store abstraction.
//!
//! Defines the [`GraphStore`] trait the loader writes through, plus the
//! in-memory implementation and (feature `neo4j`) the Neo4j implementation.
//! Stores only ever receive parameterized operations built by [`query`].

pub mod memory;
#[cfg(feature = "neo4j")]
pub mod neo4j;
pub mod query;

use serde::{Deserialize, Serialize};

use crate::edges::{RelationshipType, ResolvedRelationship};
use crate::errors::StoreError;
use crate::nodes::{Label, PropertyValue, StagedNode};

pub use memory::InMemoryGraphStore;
pub use query::{ParameterizedQuery, Predicate, QueryParam};

/// Outcome of one committed write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub written: usize,
    /// Relationships skipped because an endpoint is not in the store.
    pub dangling: usize,
}

/// A property-graph backend.
///
/// Each write call is one transaction: it either commits every item or
/// returns an error and leaves the store unchanged.
#[allow(async_fn_in_trait)]
pub trait GraphStore: Send + Sync {
    /// Health check: verify connectivity to the store.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Upsert nodes by canonical ID. Fails with [`StoreError::Constraint`] if a
    /// canonical ID is already bound to a different fingerprint.
    async fn write_nodes(&self, nodes: &[StagedNode]) -> Result<WriteSummary, StoreError>;

    /// Upsert relationships by `(type, from, to)`, replacing their properties.
    async fn write_relationships(
        &self,
        relationships: &[ResolvedRelationship],
    ) -> Result<WriteSummary, StoreError>;

    async fn count_nodes(&self, label: Option<Label>, filter: &[Predicate]) -> Result<u64, StoreError>;

    async fn count_relationships(&self, rel_type: Option<RelationshipType>) -> Result<u64, StoreError>;

    /// Release connections. Called once at the end of every run.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Value a guarded property ends up with after an upsert.
///
/// An incoming real value always wins; an absent or placeholder incoming
/// value keeps whatever is stored, and only fills an empty slot.
pub fn set_if_better(stored: Option<&PropertyValue>, incoming: Option<&PropertyValue>) -> Option<PropertyValue> {
    match incoming {
        Some(value) if !value.is_placeholder() => Some(value.clone()),
        Some(placeholder) => stored.cloned().or_else(|| Some(placeholder.clone())),
        None => stored.cloned(),
    }
}
