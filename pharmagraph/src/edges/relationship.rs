//! Staged and resolved relationships.

use serde::{Deserialize, Serialize};

use super::RelationshipType;
use crate::identity::{CanonicalId, Fingerprint};
use crate::nodes::{Label, Properties, Provenance};

/// Endpoint of a staged relationship.
///
/// `Staged` points at a node emitted in the same run, known only by fingerprint
/// until resolution. `Canonical` points at an external entity by its stable ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeRef {
    Staged { label: Label, fingerprint: Fingerprint },
    Canonical(CanonicalId),
}

impl NodeRef {
    pub fn label(&self) -> Label {
        match self {
            NodeRef::Staged { label, .. } => *label,
            NodeRef::Canonical(id) => id.label(),
        }
    }

    /// Canonical ID this reference will resolve to, if its target exists.
    pub fn canonical_id(&self) -> CanonicalId {
        match self {
            NodeRef::Staged { label, fingerprint } => CanonicalId::new(*label, fingerprint),
            NodeRef::Canonical(id) => id.clone(),
        }
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRef::Staged { label, fingerprint } => write!(f, "{label}#{}", fingerprint.short()),
            NodeRef::Canonical(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRelationship {
    pub rel_type: RelationshipType,
    pub from: NodeRef,
    pub to: NodeRef,
    pub properties: Properties,
    pub provenance: Vec<Provenance>,
}

impl StagedRelationship {
    pub fn new(rel_type: RelationshipType, from: NodeRef, to: NodeRef, provenance: Provenance) -> Self {
        Self {
            rel_type,
            from,
            to,
            properties: Properties::new(),
            provenance: vec![provenance],
        }
    }
}

/// A relationship whose endpoints are both canonical IDs; the unit the loader writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRelationship {
    pub rel_type: RelationshipType,
    pub from: CanonicalId,
    pub to: CanonicalId,
    pub properties: Properties,
    pub provenance: Vec<Provenance>,
}

impl ResolvedRelationship {
    /// Identity of the relationship in the store.
    pub fn key(&self) -> (RelationshipType, CanonicalId, CanonicalId) {
        (self.rel_type, self.from.clone(), self.to.clone())
    }

    /// Printable `(from)-[TYPE]->(to)` reference.
    pub fn describe(&self) -> String {
        format!("({})-[{}]->({})", self.from, self.rel_type, self.to)
    }

    pub fn origins(&self) -> Vec<String> {
        self.provenance.iter().map(Provenance::record_ref).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::PropertyValue;

    #[test]
    fn test_staged_ref_resolves_to_same_id_as_node() {
        let mut props = Properties::new();
        props.insert("normalized_name".into(), PropertyValue::from("pfizer inc."));
        let fingerprint = Fingerprint::of(Label::Organization, &props);
        let node_ref = NodeRef::Staged {
            label: Label::Organization,
            fingerprint: fingerprint.clone(),
        };
        assert_eq!(node_ref.label(), Label::Organization);
        assert_eq!(node_ref.canonical_id(), CanonicalId::new(Label::Organization, &fingerprint));
    }

    #[test]
    fn test_describe_relationship() {
        let from: CanonicalId = "DOC-0123abcd".parse().expect("valid id");
        let to: CanonicalId = "CMP-89abcdef".parse().expect("valid id");
        let rel = ResolvedRelationship {
            rel_type: RelationshipType::Mentions,
            from,
            to,
            properties: Properties::new(),
            provenance: vec![],
        };
        assert_eq!(rel.describe(), "(DOC-0123abcd)-[MENTIONS]->(CMP-89abcdef)");
    }
}
