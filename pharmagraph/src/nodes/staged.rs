//! StagedNode: a node ready for identity resolution and loading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Label, Properties, PropertyValue};
use crate::identity::{CanonicalId, Fingerprint};

/// Where a staged item came from. Ordered by source, then origin ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub origin_id: String,
    pub fetched_at: DateTime<Utc>,
}

impl Provenance {
    /// Printable record reference, `source:origin_id`.
    pub fn record_ref(&self) -> String {
        format!("{}:{}", self.source, self.origin_id)
    }
}

/// A node in canonical form, identified by fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedNode {
    pub label: Label,
    pub canonical_id: CanonicalId,
    pub fingerprint: Fingerprint,
    pub canonical_key_fields: Vec<String>,
    pub properties: Properties,
    pub provenance: Vec<Provenance>,
}

impl StagedNode {
    /// Build a node, deriving fingerprint and canonical ID from the key fields
    /// present in `properties`.
    pub fn new(label: Label, properties: Properties, provenance: Provenance) -> Self {
        let fingerprint = Fingerprint::of(label, &properties);
        Self {
            label,
            canonical_id: CanonicalId::new(label, &fingerprint),
            fingerprint,
            canonical_key_fields: label.key_fields().iter().map(|f| f.to_string()).collect(),
            properties,
            provenance: vec![provenance],
        }
    }

    pub fn get(&self, field: &str) -> Option<&PropertyValue> {
        self.properties.get(field)
    }

    /// Distinct contributing sources, sorted.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.provenance.iter().map(|p| p.source.clone()).collect();
        sources.sort();
        sources.dedup();
        sources
    }

    /// Record references of every contributor, in provenance order.
    pub fn origins(&self) -> Vec<String> {
        self.provenance.iter().map(Provenance::record_ref).collect()
    }
}
