//! Quality gate between identity resolution and loading.
//!
//! Nodes are checked against a per-label rule table, relationships against
//! their type's endpoint rules. Anything with a violation is held back, and so
//! is every relationship touching a held-back node.

pub mod rules;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ops::Bound;
use tracing::debug;

use crate::edges::ResolvedRelationship;
use crate::identity::CanonicalId;
use crate::nodes::{Label, StagedNode};

pub use rules::{Rule, ValueKind};

/// One failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{rule} violation on '{field}': {message}")]
pub struct Violation {
    pub rule: String,
    pub field: String,
    pub message: String,
}

pub const DOCUMENT_STATUSES: &[&str] = &["active", "draft", "superseded", "withdrawn"];

pub const TRIAL_PHASES: &[&str] = &[
    "EARLY_PHASE1",
    "PHASE0",
    "PHASE1",
    "PHASE1/PHASE2",
    "PHASE2",
    "PHASE2/PHASE3",
    "PHASE3",
    "PHASE4",
    "NA",
];

/// UniProtKB accession format.
pub const UNIPROT_PATTERN: &str =
    r"^([OPQ][0-9][A-Z0-9]{3}[0-9]|[A-NR-Z][0-9]([A-Z][A-Z0-9]{2}[0-9]){1,2})$";

/// Items split by the checker.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub nodes: Vec<StagedNode>,
    pub relationships: Vec<ResolvedRelationship>,
    pub rejected_nodes: Vec<(StagedNode, Vec<Violation>)>,
    pub rejected_relationships: Vec<(ResolvedRelationship, Vec<Violation>)>,
    /// Relationships dropped because an endpoint was rejected. They are
    /// reported through that node, not on their own.
    pub cascaded: Vec<ResolvedRelationship>,
}

impl ValidationOutcome {
    pub fn has_rejections(&self) -> bool {
        !self.rejected_nodes.is_empty() || !self.rejected_relationships.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct QualityChecker {
    rules: HashMap<Label, Vec<Rule>>,
}

impl Default for QualityChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityChecker {
    /// Checker with the default rule table.
    pub fn new() -> Self {
        let mut rules: HashMap<Label, Vec<Rule>> = HashMap::new();
        rules.insert(
            Label::Document,
            vec![
                Rule::required("title"),
                Rule::required("file_path"),
                Rule::one_of("status", DOCUMENT_STATUSES),
                Rule::pattern("language", r"^[a-z]{2}$"),
                Rule::of_type("published_date", ValueKind::Date),
            ],
        );
        rules.insert(
            Label::Compound,
            vec![
                Rule::required("name"),
                Rule::required("external_id"),
                Rule::of_type("molecular_weight", ValueKind::Number),
                Rule::range("molecular_weight", Bound::Excluded(0.0), Bound::Included(5000.0)),
            ],
        );
        rules.insert(
            Label::Target,
            vec![
                Rule::required("uniprot_id"),
                Rule::required("name"),
                Rule::pattern("uniprot_id", UNIPROT_PATTERN),
            ],
        );
        rules.insert(
            Label::ClinicalTrial,
            vec![
                Rule::required("nct_id"),
                Rule::required("title"),
                Rule::pattern("nct_id", r"^NCT\d{8}$"),
                Rule::one_of("phase", TRIAL_PHASES),
                Rule::of_type("enrollment", ValueKind::Integer),
                Rule::range("enrollment", Bound::Included(0.0), Bound::Unbounded),
                Rule::date_order("start_date", "completion_date"),
            ],
        );
        rules.insert(
            Label::RegulatoryLetter,
            vec![
                Rule::required("title"),
                Rule::required("issued_date"),
                Rule::required("company"),
                Rule::date_order("effective_date", "repeal_date"),
            ],
        );
        rules.insert(Label::Organization, vec![Rule::required("name")]);
        Self { rules }
    }

    /// Checker with no node rules; relationship rules still apply.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn with_rule(mut self, label: Label, rule: Rule) -> Self {
        self.rules.entry(label).or_default().push(rule);
        self
    }

    pub fn rules_for(&self, label: Label) -> &[Rule] {
        self.rules.get(&label).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn validate_node(&self, node: &StagedNode) -> Vec<Violation> {
        self.rules_for(node.label)
            .iter()
            .filter_map(|rule| rule.check(&node.properties))
            .collect()
    }

    pub fn validate_relationship(&self, rel: &ResolvedRelationship) -> Vec<Violation> {
        let mut violations = Vec::new();
        let (from, to) = (rel.from.label(), rel.to.label());
        if !rel.rel_type.allows(from, to) {
            let (want_from, want_to) = rel.rel_type.endpoints();
            violations.push(Violation {
                rule: "endpoints".to_string(),
                field: rel.rel_type.to_string(),
                message: format!("{from} -> {to} is not allowed, expected {want_from} -> {want_to}"),
            });
        }
        if let Some(confidence) = rel.properties.get("confidence") {
            match confidence.as_f64() {
                Some(c) if (0.0..=1.0).contains(&c) => {}
                _ => violations.push(Violation {
                    rule: "range".to_string(),
                    field: "confidence".to_string(),
                    message: format!("'{confidence}' is outside [0, 1]"),
                }),
            }
        }
        if rel.from == rel.to {
            violations.push(Violation {
                rule: "self_loop".to_string(),
                field: rel.rel_type.to_string(),
                message: format!("{} points at itself", rel.from),
            });
        }
        violations
    }

    /// Split resolved items into loadable and rejected.
    pub fn partition(
        &self,
        nodes: Vec<StagedNode>,
        relationships: Vec<ResolvedRelationship>,
    ) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();
        let mut excluded: HashSet<CanonicalId> = HashSet::new();

        for node in nodes {
            let violations = self.validate_node(&node);
            if violations.is_empty() {
                outcome.nodes.push(node);
            } else {
                debug!(canonical_id = %node.canonical_id, violations = violations.len(), "node rejected");
                excluded.insert(node.canonical_id.clone());
                outcome.rejected_nodes.push((node, violations));
            }
        }

        for rel in relationships {
            if excluded.contains(&rel.from) || excluded.contains(&rel.to) {
                debug!(relationship = %rel.describe(), "endpoint rejected, relationship dropped");
                outcome.cascaded.push(rel);
                continue;
            }
            let violations = self.validate_relationship(&rel);
            if violations.is_empty() {
                outcome.relationships.push(rel);
            } else {
                outcome.rejected_relationships.push((rel, violations));
            }
        }
        outcome
    }
}
