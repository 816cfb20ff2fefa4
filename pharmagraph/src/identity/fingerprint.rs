//! Deterministic entity fingerprints and the canonical IDs derived from them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::nodes::{Label, Properties};
use crate::utils::text::{normalize_key, normalize_path};

/// ASCII unit separator between label and key values in the hashed input.
const UNIT_SEPARATOR: &[u8] = b"\x1f";

/// Lowercase hex SHA-256 identifying one real-world entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash `label` together with already-normalised key values.
    pub fn compute(label: Label, key_values: &[String]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(label.as_str().as_bytes());
        for value in key_values {
            hasher.update(UNIT_SEPARATOR);
            hasher.update(value.as_bytes());
        }
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    /// Fingerprint of a node of `label` with the given properties.
    pub fn of(label: Label, properties: &Properties) -> Self {
        Fingerprint::compute(label, &key_values(label, properties))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex digits, as used in canonical IDs.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalised key values of `label` drawn from `properties`, in
/// [`Label::key_fields`] order. An absent key field contributes `""`.
pub fn key_values(label: Label, properties: &Properties) -> Vec<String> {
    label
        .key_fields()
        .iter()
        .map(|field| {
            let raw = properties.get(*field).map(|v| v.key_text()).unwrap_or_default();
            match *field {
                "file_path" => normalize_path(&raw),
                _ => normalize_key(&raw),
            }
        })
        .collect()
}

/// Stable, human-readable node identifier: `PREFIX-xxxxxxxx`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalId {
    label: Label,
    short: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid canonical id '{0}'")]
pub struct InvalidCanonicalId(pub String);

impl CanonicalId {
    pub fn new(label: Label, fingerprint: &Fingerprint) -> Self {
        Self {
            label,
            short: fingerprint.short().to_string(),
        }
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn prefix(&self) -> &'static str {
        self.label.prefix()
    }

    /// Canonical ID for an external entity referenced only by its key values,
    /// e.g. a compound named by ChEMBL ID inside a document.
    pub fn for_key(label: Label, properties: &Properties) -> Self {
        CanonicalId::new(label, &Fingerprint::of(label, properties))
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.label.prefix(), self.short)
    }
}

impl FromStr for CanonicalId {
    type Err = InvalidCanonicalId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidCanonicalId(s.to_string());
        let (prefix, short) = s.split_once('-').ok_or_else(invalid)?;
        let label = Label::from_prefix(prefix).ok_or_else(invalid)?;
        let well_formed = short.len() == 8
            && short.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
        if !well_formed {
            return Err(invalid());
        }
        Ok(Self {
            label,
            short: short.to_string(),
        })
    }
}

impl TryFrom<String> for CanonicalId {
    type Error = InvalidCanonicalId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CanonicalId> for String {
    fn from(id: CanonicalId) -> Self {
        id.to_string()
    }
}
