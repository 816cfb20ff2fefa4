//! The closed set of relationship types and their endpoint rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::nodes::Label;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// Document → Compound
    Mentions,
    /// Compound → Target
    Targets,
    /// ClinicalTrial → Compound
    Studies,
    /// ClinicalTrial → Organization
    SponsoredBy,
    /// RegulatoryLetter → Organization
    IssuedTo,
    /// RegulatoryLetter → Compound
    Concerns,
    /// Document → Organization
    PublishedBy,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown relationship type '{0}'")]
pub struct UnknownRelationshipType(pub String);

impl RelationshipType {
    pub const ALL: [RelationshipType; 7] = [
        RelationshipType::Mentions,
        RelationshipType::Targets,
        RelationshipType::Studies,
        RelationshipType::SponsoredBy,
        RelationshipType::IssuedTo,
        RelationshipType::Concerns,
        RelationshipType::PublishedBy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Mentions => "MENTIONS",
            RelationshipType::Targets => "TARGETS",
            RelationshipType::Studies => "STUDIES",
            RelationshipType::SponsoredBy => "SPONSORED_BY",
            RelationshipType::IssuedTo => "ISSUED_TO",
            RelationshipType::Concerns => "CONCERNS",
            RelationshipType::PublishedBy => "PUBLISHED_BY",
        }
    }

    /// Allowed `(from, to)` labels.
    pub fn endpoints(&self) -> (Label, Label) {
        match self {
            RelationshipType::Mentions => (Label::Document, Label::Compound),
            RelationshipType::Targets => (Label::Compound, Label::Target),
            RelationshipType::Studies => (Label::ClinicalTrial, Label::Compound),
            RelationshipType::SponsoredBy => (Label::ClinicalTrial, Label::Organization),
            RelationshipType::IssuedTo => (Label::RegulatoryLetter, Label::Organization),
            RelationshipType::Concerns => (Label::RegulatoryLetter, Label::Compound),
            RelationshipType::PublishedBy => (Label::Document, Label::Organization),
        }
    }

    pub fn allows(&self, from: Label, to: Label) -> bool {
        self.endpoints() == (from, to)
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = UnknownRelationshipType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        RelationshipType::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or_else(|| UnknownRelationshipType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_uses_graph_names() {
        let json = serde_json::to_string(&RelationshipType::SponsoredBy).expect("serialize");
        assert_eq!(json, "\"SPONSORED_BY\"");
        for t in RelationshipType::ALL {
            assert_eq!(t.as_str().parse::<RelationshipType>(), Ok(t));
        }
    }

    #[test]
    fn test_endpoint_rules() {
        assert!(RelationshipType::Mentions.allows(Label::Document, Label::Compound));
        assert!(!RelationshipType::Mentions.allows(Label::Compound, Label::Document));
        assert!(RelationshipType::IssuedTo.allows(Label::RegulatoryLetter, Label::Organization));
    }
}
