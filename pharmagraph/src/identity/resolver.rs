//! Merges staged nodes that describe the same entity and resolves relationship endpoints.
//!
//! Field conflicts inside a group are settled per field by a total ranking of
//! the contributing claims, so the merged node is the same whatever order the
//! records arrived in:
//!
//! 1. a real value beats a placeholder,
//! 2. then higher source priority,
//! 3. then the more recently fetched record,
//! 4. then the lexicographically smaller `(source, origin_id)`.
//!
//! List-valued properties are unioned instead of ranked.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

use super::{CanonicalId, Fingerprint, SourcePriorities};
use crate::edges::{NodeRef, RelationshipType, ResolvedRelationship, StagedRelationship};
use crate::nodes::{Label, Properties, PropertyValue, Provenance, StagedNode};
use crate::transform::TransformOutput;

/// Emitted for every canonical node built from more than one contributor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub canonical_id: CanonicalId,
    pub label: Label,
    /// Origin IDs of the contributing records, in provenance order.
    pub merged_from: Vec<String>,
    pub sources: Vec<String>,
}

/// A staged endpoint that matched no node emitted in this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    pub rel_type: RelationshipType,
    pub reference: String,
    /// Record references of the relationship's contributors.
    pub origins: Vec<String>,
}

/// A node whose canonical ID is shared with a node of a different fingerprint.
/// Neither node is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdCollision {
    pub canonical_id: CanonicalId,
    pub fingerprint: Fingerprint,
    /// Record references of the node's contributors.
    pub origins: Vec<String>,
}

/// Output of [`IdentityResolver::finish`], sorted by canonical ID.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub nodes: Vec<StagedNode>,
    pub relationships: Vec<ResolvedRelationship>,
    pub merges: Vec<MergeRecord>,
    pub unresolved: Vec<UnresolvedReference>,
    pub collisions: Vec<IdCollision>,
    /// Relationships left out because an endpoint is a colliding canonical ID.
    pub dropped_relationships: usize,
}

// ── Claim ranking ────────────────────────────────────────────────────────────

/// Derived `Ord` compares fields in declaration order; greater wins.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    informative: bool,
    priority: u32,
    fetched_at: DateTime<Utc>,
    source: Reverse<String>,
    origin_id: Reverse<String>,
}

/// The strongest provenance entry of a staged item, without the value part.
#[derive(Debug, Clone)]
struct Origin {
    priority: u32,
    fetched_at: DateTime<Utc>,
    source: String,
    origin_id: String,
}

impl Origin {
    fn best_of(provenance: &[Provenance], priorities: &SourcePriorities) -> Self {
        provenance
            .iter()
            .map(|p| Origin {
                priority: priorities.priority(&p.source),
                fetched_at: p.fetched_at,
                source: p.source.clone(),
                origin_id: p.origin_id.clone(),
            })
            .max_by(|a, b| a.rank(true).cmp(&b.rank(true)))
            .unwrap_or(Origin {
                priority: 0,
                fetched_at: DateTime::<Utc>::MIN_UTC,
                source: String::new(),
                origin_id: String::new(),
            })
    }

    fn rank(&self, informative: bool) -> Rank {
        Rank {
            informative,
            priority: self.priority,
            fetched_at: self.fetched_at,
            source: Reverse(self.source.clone()),
            origin_id: Reverse(self.origin_id.clone()),
        }
    }
}

#[derive(Debug, Clone)]
enum Claim {
    Scalar { value: PropertyValue, rank: Rank },
    List(Vec<PropertyValue>),
}

impl Claim {
    fn new(value: PropertyValue, origin: &Origin) -> Self {
        match value {
            PropertyValue::List(items) => Claim::List(union(items, Vec::new())),
            value => {
                let rank = origin.rank(!value.is_placeholder());
                Claim::Scalar { value, rank }
            }
        }
    }

    fn absorb(&mut self, incoming: Claim) {
        let current = std::mem::replace(self, Claim::List(Vec::new()));
        *self = match (current, incoming) {
            (Claim::Scalar { value, rank }, Claim::Scalar { value: other, rank: other_rank }) => {
                // Equal ranks only happen for one record claiming twice; the value decides.
                let keep_current = (&rank, Reverse(value.sort_key()))
                    >= (&other_rank, Reverse(other.sort_key()));
                if keep_current {
                    Claim::Scalar { value, rank }
                } else {
                    Claim::Scalar { value: other, rank: other_rank }
                }
            }
            (a, b) => Claim::List(union(a.into_items(), b.into_items())),
        };
    }

    fn into_items(self) -> Vec<PropertyValue> {
        match self {
            Claim::List(items) => items,
            Claim::Scalar { value, .. } if value.is_placeholder() => Vec::new(),
            Claim::Scalar { value, .. } => vec![value],
        }
    }

    fn into_value(self) -> PropertyValue {
        match self {
            Claim::Scalar { value, .. } => value,
            Claim::List(items) => PropertyValue::List(items),
        }
    }
}

/// Deduplicated union sorted by canonical rendering.
fn union(a: Vec<PropertyValue>, b: Vec<PropertyValue>) -> Vec<PropertyValue> {
    let mut keyed: Vec<(String, PropertyValue)> =
        a.into_iter().chain(b).map(|v| (v.sort_key(), v)).collect();
    keyed.sort_by(|x, y| x.0.cmp(&y.0));
    keyed.dedup_by(|x, y| x.0 == y.0);
    keyed.into_iter().map(|(_, v)| v).collect()
}

#[derive(Debug, Clone, Default)]
struct MergedProperties(BTreeMap<String, Claim>);

impl MergedProperties {
    fn absorb(&mut self, properties: Properties, origin: &Origin) {
        for (field, value) in properties {
            let claim = Claim::new(value, origin);
            match self.0.get_mut(&field) {
                Some(existing) => existing.absorb(claim),
                None => {
                    self.0.insert(field, claim);
                }
            }
        }
    }

    fn merge(&mut self, other: MergedProperties) {
        for (field, claim) in other.0 {
            match self.0.get_mut(&field) {
                Some(existing) => existing.absorb(claim),
                None => {
                    self.0.insert(field, claim);
                }
            }
        }
    }

    fn into_properties(self) -> Properties {
        self.0
            .into_iter()
            .map(|(field, claim)| (field, claim.into_value()))
            .collect()
    }
}

// ── Groups ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct NodeGroup {
    canonical_key_fields: Vec<String>,
    properties: MergedProperties,
    provenance: BTreeSet<Provenance>,
    contributors: usize,
}

#[derive(Debug, Default)]
struct RelationshipGroup {
    properties: MergedProperties,
    provenance: BTreeSet<Provenance>,
}

impl RelationshipGroup {
    fn merge(&mut self, other: RelationshipGroup) {
        self.properties.merge(other.properties);
        self.provenance.extend(other.provenance);
    }
}

type NodeKey = (Label, Fingerprint);
type RelationshipKey = (RelationshipType, NodeRef, NodeRef);

/// Groups staged nodes by `(label, fingerprint)` and merges each group into
/// one canonical node.
///
/// `ingest` takes `&self` and may be called from several tasks at once; the
/// groups live in a sharded concurrent map.
pub struct IdentityResolver {
    priorities: SourcePriorities,
    nodes: DashMap<NodeKey, NodeGroup>,
    relationships: DashMap<RelationshipKey, RelationshipGroup>,
}

impl IdentityResolver {
    pub fn new(priorities: SourcePriorities) -> Self {
        Self {
            priorities,
            nodes: DashMap::new(),
            relationships: DashMap::new(),
        }
    }

    /// Add everything one record produced.
    pub fn ingest(&self, output: TransformOutput) {
        for node in output.nodes {
            self.ingest_node(node);
        }
        for rel in output.relationships {
            self.ingest_relationship(rel);
        }
    }

    pub fn ingest_node(&self, node: StagedNode) {
        let origin = Origin::best_of(&node.provenance, &self.priorities);
        let mut group = self
            .nodes
            .entry((node.label, node.fingerprint.clone()))
            .or_insert_with(|| NodeGroup {
                canonical_key_fields: node.canonical_key_fields.clone(),
                properties: MergedProperties::default(),
                provenance: BTreeSet::new(),
                contributors: 0,
            });
        group.properties.absorb(node.properties, &origin);
        group.provenance.extend(node.provenance);
        group.contributors += 1;
    }

    pub fn ingest_relationship(&self, rel: StagedRelationship) {
        let origin = Origin::best_of(&rel.provenance, &self.priorities);
        let mut group = self
            .relationships
            .entry((rel.rel_type, rel.from, rel.to))
            .or_default();
        group.properties.absorb(rel.properties, &origin);
        group.provenance.extend(rel.provenance);
    }

    /// Number of distinct node groups so far.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Emit one node per group, merge records, and relationships with
    /// canonical endpoints deduplicated by `(type, from, to)`.
    pub fn finish(self) -> Resolution {
        let mut resolution = Resolution::default();
        let mut known: HashSet<NodeKey> = HashSet::with_capacity(self.nodes.len());

        for ((label, fingerprint), group) in self.nodes.into_iter() {
            let canonical_id = CanonicalId::new(label, &fingerprint);
            let provenance: Vec<Provenance> = group.provenance.into_iter().collect();
            let node = StagedNode {
                label,
                canonical_id: canonical_id.clone(),
                fingerprint: fingerprint.clone(),
                canonical_key_fields: group.canonical_key_fields,
                properties: group.properties.into_properties(),
                provenance,
            };
            if group.contributors > 1 {
                debug!(canonical_id = %canonical_id, contributors = group.contributors, "merged node group");
                resolution.merges.push(MergeRecord {
                    canonical_id,
                    label,
                    merged_from: node.provenance.iter().map(|p| p.origin_id.clone()).collect(),
                    sources: node.sources(),
                });
            }
            known.insert((label, fingerprint));
            resolution.nodes.push(node);
        }

        let mut resolved: BTreeMap<(RelationshipType, CanonicalId, CanonicalId), RelationshipGroup> =
            BTreeMap::new();
        for ((rel_type, from, to), group) in self.relationships.into_iter() {
            let missing: Vec<&NodeRef> = [&from, &to]
                .into_iter()
                .filter(|r| match r {
                    NodeRef::Staged { label, fingerprint } => {
                        !known.contains(&(*label, fingerprint.clone()))
                    }
                    NodeRef::Canonical(_) => false,
                })
                .collect();
            if !missing.is_empty() {
                let origins: Vec<String> = group.provenance.iter().map(Provenance::record_ref).collect();
                for reference in missing {
                    warn!(rel_type = %rel_type, reference = %reference, "unresolved staged reference");
                    resolution.unresolved.push(UnresolvedReference {
                        rel_type,
                        reference: reference.to_string(),
                        origins: origins.clone(),
                    });
                }
                continue;
            }
            let key = (rel_type, from.canonical_id(), to.canonical_id());
            match resolved.get_mut(&key) {
                Some(existing) => existing.merge(group),
                None => {
                    resolved.insert(key, group);
                }
            }
        }

        resolution.relationships = resolved
            .into_iter()
            .map(|((rel_type, from, to), group)| ResolvedRelationship {
                rel_type,
                from,
                to,
                properties: group.properties.into_properties(),
                provenance: group.provenance.into_iter().collect(),
            })
            .collect();

        resolution.split_collisions();
        resolution.nodes.sort_by(|a, b| a.canonical_id.cmp(&b.canonical_id));
        resolution.merges.sort_by(|a, b| a.canonical_id.cmp(&b.canonical_id));
        resolution.unresolved.sort_by(|a, b| a.origins.cmp(&b.origins));
        resolution
    }
}

impl Resolution {
    /// Move nodes whose canonical ID is claimed by more than one fingerprint
    /// into `collisions`, along with the relationships touching them.
    fn split_collisions(&mut self) {
        let mut fingerprints: BTreeMap<&CanonicalId, BTreeSet<&Fingerprint>> = BTreeMap::new();
        for node in &self.nodes {
            fingerprints.entry(&node.canonical_id).or_default().insert(&node.fingerprint);
        }
        let colliding: HashSet<CanonicalId> = fingerprints
            .into_iter()
            .filter(|(_, fps)| fps.len() > 1)
            .map(|(id, _)| id.clone())
            .collect();
        if colliding.is_empty() {
            return;
        }

        let (collided, nodes): (Vec<StagedNode>, Vec<StagedNode>) = std::mem::take(&mut self.nodes)
            .into_iter()
            .partition(|n| colliding.contains(&n.canonical_id));
        self.nodes = nodes;
        for node in collided {
            warn!(
                canonical_id = %node.canonical_id,
                fingerprint = %node.fingerprint,
                "canonical id shared by distinct fingerprints"
            );
            self.collisions.push(IdCollision {
                canonical_id: node.canonical_id.clone(),
                fingerprint: node.fingerprint.clone(),
                origins: node.origins(),
            });
        }
        self.collisions
            .sort_by(|a, b| (&a.canonical_id, &a.fingerprint).cmp(&(&b.canonical_id, &b.fingerprint)));
        self.merges.retain(|m| !colliding.contains(&m.canonical_id));

        let before = self.relationships.len();
        self.relationships
            .retain(|r| !colliding.contains(&r.from) && !colliding.contains(&r.to));
        self.dropped_relationships = before - self.relationships.len();
    }
}
