//! In-memory graph store.
//!
//! Applies the same upsert semantics as the Cypher queries in
//! [`super::query`]: merge by canonical ID, set-if-better on guarded fields,
//! wholesale replacement of relationship properties. Used for dry
//! verification runs and throughout the test suite.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

use super::query::{NodeRow, Predicate, RelationshipRow};
use super::{set_if_better, GraphStore, WriteSummary};
use crate::edges::{RelationshipType, ResolvedRelationship};
use crate::errors::StoreError;
use crate::identity::CanonicalId;
use crate::nodes::{Label, Properties, PropertyValue, StagedNode};

/// A node as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub label: Label,
    pub fingerprint: String,
    pub properties: Properties,
}

impl StoredNode {
    pub fn get(&self, field: &str) -> Option<&PropertyValue> {
        self.properties.get(field)
    }
}

type RelationshipKey = (RelationshipType, CanonicalId, CanonicalId);

#[derive(Debug, Default)]
struct Graph {
    nodes: BTreeMap<CanonicalId, StoredNode>,
    relationships: BTreeMap<RelationshipKey, Properties>,
}

#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    graph: RwLock<Graph>,
    write_calls: AtomicUsize,
    pings: AtomicUsize,
    closed: AtomicBool,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &CanonicalId) -> Option<StoredNode> {
        self.graph.read().nodes.get(id).cloned()
    }

    pub fn relationship(
        &self,
        rel_type: RelationshipType,
        from: &CanonicalId,
        to: &CanonicalId,
    ) -> Option<Properties> {
        self.graph
            .read()
            .relationships
            .get(&(rel_type, from.clone(), to.clone()))
            .cloned()
    }

    pub fn node_count(&self) -> usize {
        self.graph.read().nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.graph.read().relationships.len()
    }

    /// Number of write calls that reached the store, successful or not.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl GraphStore for InMemoryGraphStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write_nodes(&self, nodes: &[StagedNode]) -> Result<WriteSummary, StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut graph = self.graph.write();

        // Validate the whole batch before touching anything.
        let mut bound: BTreeMap<&CanonicalId, &str> = BTreeMap::new();
        for node in nodes {
            let stored = graph.nodes.get(&node.canonical_id).map(|n| n.fingerprint.as_str());
            let batch = bound.get(&node.canonical_id).copied();
            if let Some(existing) = stored.or(batch) {
                if existing != node.fingerprint.as_str() {
                    return Err(StoreError::Constraint(format!(
                        "canonical id {} is bound to fingerprint {existing}, not {}",
                        node.canonical_id, node.fingerprint
                    )));
                }
            }
            bound.insert(&node.canonical_id, node.fingerprint.as_str());
        }

        for node in nodes {
            let row = NodeRow::from_node(node);
            let stored = graph
                .nodes
                .entry(node.canonical_id.clone())
                .or_insert_with(|| {
                    let mut properties = Properties::new();
                    properties.insert("canonical_id".into(), row.canonical_id.clone().into());
                    properties.insert("fingerprint".into(), row.fingerprint.clone().into());
                    StoredNode {
                        label: node.label,
                        fingerprint: row.fingerprint.clone(),
                        properties,
                    }
                });
            for (field, value) in row.props {
                stored.properties.insert(field, value);
            }
            for field in node.label.guarded_fields() {
                if let Some(value) = set_if_better(stored.properties.get(*field), row.guarded.get(*field)) {
                    stored.properties.insert(field.to_string(), value);
                }
            }
        }
        debug!(nodes = nodes.len(), "in-memory node batch committed");
        Ok(WriteSummary {
            written: nodes.len(),
            dangling: 0,
        })
    }

    async fn write_relationships(
        &self,
        relationships: &[ResolvedRelationship],
    ) -> Result<WriteSummary, StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut graph = self.graph.write();
        let mut summary = WriteSummary::default();
        for rel in relationships {
            if !graph.nodes.contains_key(&rel.from) || !graph.nodes.contains_key(&rel.to) {
                summary.dangling += 1;
                continue;
            }
            let row = RelationshipRow::from_relationship(rel);
            graph.relationships.insert(rel.key(), row.props);
            summary.written += 1;
        }
        Ok(summary)
    }

    async fn count_nodes(&self, label: Option<Label>, filter: &[Predicate]) -> Result<u64, StoreError> {
        let graph = self.graph.read();
        let count = graph
            .nodes
            .values()
            .filter(|n| label.map_or(true, |l| n.label == l))
            .filter(|n| filter.iter().all(|p| p.matches(&n.properties)))
            .count();
        Ok(count as u64)
    }

    async fn count_relationships(&self, rel_type: Option<RelationshipType>) -> Result<u64, StoreError> {
        let graph = self.graph.read();
        let count = graph
            .relationships
            .keys()
            .filter(|(t, _, _)| rel_type.map_or(true, |want| *t == want))
            .count();
        Ok(count as u64)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
