//! The closed set of node labels and their identity rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Node label. Each label carries its canonical ID prefix, the properties that
/// form its identity, and the name-like properties guarded by set-if-better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    Document,
    Compound,
    Target,
    ClinicalTrial,
    RegulatoryLetter,
    Organization,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown node label '{0}'")]
pub struct UnknownLabel(pub String);

impl Label {
    pub const ALL: [Label; 6] = [
        Label::Document,
        Label::Compound,
        Label::Target,
        Label::ClinicalTrial,
        Label::RegulatoryLetter,
        Label::Organization,
    ];

    /// Label name as written in the graph.
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Document => "Document",
            Label::Compound => "Compound",
            Label::Target => "Target",
            Label::ClinicalTrial => "ClinicalTrial",
            Label::RegulatoryLetter => "RegulatoryLetter",
            Label::Organization => "Organization",
        }
    }

    /// Canonical ID prefix, e.g. `DOC` in `DOC-3f9a01be`.
    pub fn prefix(&self) -> &'static str {
        match self {
            Label::Document => "DOC",
            Label::Compound => "CMP",
            Label::Target => "TGT",
            Label::ClinicalTrial => "TRL",
            Label::RegulatoryLetter => "REG",
            Label::Organization => "ORG",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Label> {
        Label::ALL.into_iter().find(|l| l.prefix() == prefix)
    }

    /// Properties whose normalised values make up the fingerprint, in hashing order.
    pub fn key_fields(&self) -> &'static [&'static str] {
        match self {
            Label::Document => &["file_path", "content_hash"],
            Label::Compound => &["external_id"],
            Label::Target => &["uniprot_id"],
            Label::ClinicalTrial => &["nct_id"],
            Label::RegulatoryLetter => &["title", "issued_date", "company", "application_number"],
            Label::Organization => &["normalized_name"],
        }
    }

    /// Name-like properties where a stored real value is never replaced by a placeholder.
    pub fn guarded_fields(&self) -> &'static [&'static str] {
        match self {
            Label::Document => &["title"],
            Label::Compound => &["name"],
            Label::Target => &["name", "gene_symbol"],
            Label::ClinicalTrial => &["title", "overall_status"],
            Label::RegulatoryLetter => &["subject"],
            Label::Organization => &["name"],
        }
    }

    pub fn is_guarded(&self, field: &str) -> bool {
        self.guarded_fields().contains(&field)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = UnknownLabel;

    /// Accepts the label name in any case, with or without underscores
    /// (`clinical_trial`, `ClinicalTrial`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .collect::<String>()
            .to_lowercase();
        Label::ALL
            .into_iter()
            .find(|l| l.as_str().to_lowercase() == folded)
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}
