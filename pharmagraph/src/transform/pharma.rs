//! Transformer for pharmaceutical records: documents, compounds, targets,
//! clinical trials and regulatory letters.

use std::collections::HashMap;

use super::payload::{
    normalize_compound_id, ClinicalTrialPayload, CompoundPayload, DecodedPayload, DocumentPayload,
    EntityMention, EntityPayload, RecordKind, RegulatoryLetterPayload, TargetPayload,
};
use super::{TransformOutput, Transformer, FULL_TEXT_MAX_CHARS, SNIPPET_MAX_CHARS, TITLE_MAX_CHARS};
use crate::edges::{NodeRef, RelationshipType, StagedRelationship};
use crate::errors::TransformError;
use crate::identity::CanonicalId;
use crate::nodes::{Label, Properties, PropertyValue, Provenance, StagedNode};
use crate::source::SourceRecord;
use crate::utils::{format_timestamp, is_placeholder, normalize_key, snippet, truncate_chars, truncate_with_ellipsis};

/// Maps pharmaceutical source records to staged nodes and relationships.
///
/// The record kind comes from the payload's `record_type` field, or else from
/// the default kind registered for the record's source.
#[derive(Debug, Clone, Default)]
pub struct PharmaTransformer {
    default_kinds: HashMap<String, RecordKind>,
}

impl PharmaTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_kind(mut self, source: impl Into<String>, kind: RecordKind) -> Self {
        self.default_kinds.insert(source.into(), kind);
        self
    }

    fn kind_of(&self, record: &SourceRecord) -> Result<RecordKind, TransformError> {
        match record.payload.get("record_type") {
            Some(serde_json::Value::String(kind)) => kind.parse(),
            Some(serde_json::Value::Null) | None => {
                self.default_kinds.get(&record.source).copied().ok_or_else(|| {
                    TransformError::malformed(
                        "record_type",
                        format!("absent, and source '{}' has no default kind", record.source),
                    )
                })
            }
            Some(other) => Err(TransformError::malformed(
                "record_type",
                format!("expected a string, got {other}"),
            )),
        }
    }
}

impl Transformer for PharmaTransformer {
    fn transform(&self, record: &SourceRecord) -> Result<TransformOutput, TransformError> {
        let kind = self.kind_of(record)?;
        let DecodedPayload { entity, extras } = EntityPayload::decode(kind, &record.payload)?;
        let mut out = OutputBuilder::new(record, extras);
        match entity {
            EntityPayload::Document(doc) => out.document(doc),
            EntityPayload::Compound(compound) => out.compound(compound),
            EntityPayload::Target(target) => out.target(target),
            EntityPayload::ClinicalTrial(trial) => out.clinical_trial(trial),
            EntityPayload::RegulatoryLetter(letter) => out.regulatory_letter(letter),
        }
        Ok(out.finish())
    }
}

// ── Output assembly ──────────────────────────────────────────────────────────

fn put(props: &mut Properties, field: &str, value: impl Into<PropertyValue>) {
    props.insert(field.to_string(), value.into());
}

fn put_opt<T: Into<PropertyValue>>(props: &mut Properties, field: &str, value: Option<T>) {
    if let Some(value) = value {
        put(props, field, value);
    }
}

fn put_list(props: &mut Properties, field: &str, values: Vec<String>) {
    if !values.is_empty() {
        put(props, field, values);
    }
}

fn bounded_title(title: Option<String>) -> Option<String> {
    title.map(|t| truncate_with_ellipsis(&t, TITLE_MAX_CHARS))
}

fn put_text_body(props: &mut Properties, full_text: Option<String>) {
    if let Some(text) = full_text {
        put(props, "snippet", snippet(&text, SNIPPET_MAX_CHARS));
        put(props, "full_text", truncate_chars(&text, FULL_TEXT_MAX_CHARS));
    }
}

struct OutputBuilder {
    provenance: Provenance,
    ingested_at: String,
    extras: Option<Properties>,
    output: TransformOutput,
}

impl OutputBuilder {
    fn new(record: &SourceRecord, extras: Properties) -> Self {
        Self {
            provenance: record.provenance(),
            ingested_at: format_timestamp(&record.fetched_at),
            extras: Some(extras),
            output: TransformOutput::default(),
        }
    }

    fn finish(self) -> TransformOutput {
        self.output
    }

    /// The record's own node. Receives the payload extras where they do not
    /// clash with mapped fields.
    fn primary(&mut self, label: Label, mut props: Properties) -> NodeRef {
        for (key, value) in self.extras.take().unwrap_or_default() {
            props.entry(key).or_insert(value);
        }
        self.push_node(label, props)
    }

    fn push_node(&mut self, label: Label, mut props: Properties) -> NodeRef {
        put(&mut props, "ingested_at", self.ingested_at.clone());
        let node = StagedNode::new(label, props, self.provenance.clone());
        let node_ref = NodeRef::Staged {
            label,
            fingerprint: node.fingerprint.clone(),
        };
        self.output.nodes.push(node);
        node_ref
    }

    /// Organization named by this record. Placeholder names yield nothing.
    fn organization(&mut self, name: Option<&str>) -> Option<NodeRef> {
        let name = name.filter(|n| !is_placeholder(n))?;
        let mut props = Properties::new();
        put(&mut props, "name", name);
        put(&mut props, "normalized_name", normalize_key(name));
        Some(self.push_node(Label::Organization, props))
    }

    fn relate(&mut self, rel_type: RelationshipType, from: &NodeRef, to: NodeRef, confidence: Option<f64>) {
        let mut rel = StagedRelationship::new(rel_type, from.clone(), to, self.provenance.clone());
        put_opt(&mut rel.properties, "confidence", confidence);
        self.output.relationships.push(rel);
    }

    fn compound_mentions(&mut self, rel_type: RelationshipType, from: &NodeRef, mentions: &[EntityMention]) {
        for mention in mentions {
            if let Some(external_id) = normalize_compound_id(&mention.id) {
                let mut key = Properties::new();
                put(&mut key, "external_id", external_id);
                let to = NodeRef::Canonical(CanonicalId::for_key(Label::Compound, &key));
                self.relate(rel_type, from, to, mention.confidence);
            }
        }
    }

    fn document(&mut self, doc: DocumentPayload) {
        let mut props = Properties::new();
        put(&mut props, "file_path", doc.file_path);
        put_opt(&mut props, "content_hash", doc.content_hash.map(|h| h.to_lowercase()));
        put_opt(&mut props, "title", bounded_title(doc.title));
        put_text_body(&mut props, doc.full_text);
        put(&mut props, "language", doc.language.map_or_else(|| "en".to_string(), |l| l.to_lowercase()));
        put(&mut props, "status", doc.status.map_or_else(|| "active".to_string(), |s| s.to_lowercase()));
        put(&mut props, "doc_type", doc.doc_type.unwrap_or_else(|| "document".to_string()));
        put_opt(&mut props, "published_date", doc.published_date);
        put_opt(&mut props, "company", doc.company.clone());
        put_list(&mut props, "keywords", doc.keywords);

        let doc_ref = self.primary(Label::Document, props);
        if let Some(org) = self.organization(doc.company.as_deref()) {
            self.relate(RelationshipType::PublishedBy, &doc_ref, org, None);
        }
        self.compound_mentions(RelationshipType::Mentions, &doc_ref, &doc.compounds);
    }

    fn compound(&mut self, compound: CompoundPayload) {
        let mut props = Properties::new();
        put(&mut props, "external_id", compound.external_id);
        put_opt(&mut props, "name", compound.name);
        put_opt(&mut props, "molecular_weight", compound.molecular_weight);
        put_opt(&mut props, "molecular_formula", compound.molecular_formula);
        put_opt(&mut props, "smiles", compound.smiles);
        put_opt(&mut props, "inchi_key", compound.inchi_key);
        put_opt(&mut props, "max_phase", compound.max_phase);
        put(&mut props, "status", compound.status.map_or_else(|| "active".to_string(), |s| s.to_lowercase()));
        put_list(&mut props, "synonyms", compound.synonyms);

        let compound_ref = self.primary(Label::Compound, props);
        for target in &compound.targets {
            let mut key = Properties::new();
            put(&mut key, "uniprot_id", target.id.to_uppercase());
            let to = NodeRef::Canonical(CanonicalId::for_key(Label::Target, &key));
            self.relate(RelationshipType::Targets, &compound_ref, to, target.confidence);
        }
    }

    fn target(&mut self, target: TargetPayload) {
        let mut props = Properties::new();
        put(&mut props, "uniprot_id", target.uniprot_id);
        put_opt(&mut props, "name", target.name);
        put_opt(&mut props, "gene_symbol", target.gene_symbol);
        put_opt(&mut props, "organism", target.organism);
        put_opt(&mut props, "target_type", target.target_type);
        self.primary(Label::Target, props);
    }

    fn clinical_trial(&mut self, trial: ClinicalTrialPayload) {
        let mut props = Properties::new();
        put(&mut props, "nct_id", trial.nct_id);
        put_opt(&mut props, "title", bounded_title(trial.title));
        put_opt(&mut props, "overall_status", trial.overall_status);
        put_opt(&mut props, "phase", trial.phase);
        put_opt(&mut props, "enrollment", trial.enrollment);
        put_opt(&mut props, "start_date", trial.start_date);
        put_opt(&mut props, "completion_date", trial.completion_date);
        put_list(&mut props, "conditions", trial.conditions);
        put_opt(&mut props, "sponsor", trial.sponsor.clone());

        let trial_ref = self.primary(Label::ClinicalTrial, props);
        if let Some(org) = self.organization(trial.sponsor.as_deref()) {
            self.relate(RelationshipType::SponsoredBy, &trial_ref, org, None);
        }
        self.compound_mentions(RelationshipType::Studies, &trial_ref, &trial.compounds);
    }

    fn regulatory_letter(&mut self, letter: RegulatoryLetterPayload) {
        let mut props = Properties::new();
        put(&mut props, "title", truncate_with_ellipsis(&letter.title, TITLE_MAX_CHARS));
        put_opt(&mut props, "issued_date", letter.issued_date);
        put_opt(&mut props, "company", letter.company.clone());
        put_opt(&mut props, "application_number", letter.application_number);
        put_opt(&mut props, "subject", letter.subject);
        put_opt(&mut props, "letter_type", letter.letter_type);
        put_opt(&mut props, "effective_date", letter.effective_date);
        put_opt(&mut props, "repeal_date", letter.repeal_date);
        put_text_body(&mut props, letter.full_text);

        let letter_ref = self.primary(Label::RegulatoryLetter, props);
        if let Some(org) = self.organization(letter.company.as_deref()) {
            self.relate(RelationshipType::IssuedTo, &letter_ref, org, None);
        }
        self.compound_mentions(RelationshipType::Concerns, &letter_ref, &letter.compounds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Fingerprint;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    fn record(source: &str, payload: Value) -> SourceRecord {
        let Value::Object(payload) = payload else {
            panic!("payload must be an object");
        };
        SourceRecord {
            source: source.into(),
            origin_id: "rec-1".into(),
            payload,
            fetched_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    fn transformer() -> PharmaTransformer {
        PharmaTransformer::new().with_default_kind("fda", RecordKind::RegulatoryLetter)
    }

    #[test]
    fn test_document_defaults_and_relationships() {
        let rec = record(
            "labels",
            json!({
                "record_type": "document",
                "file_path": "/x/asa.pdf",
                "title": "Aspirin   Label",
                "full_text": "Aspirin is indicated for pain.",
                "company": "Bayer AG",
                "compounds": ["CHEMBL25"]
            }),
        );
        let out = transformer().transform(&rec).expect("transform");
        assert_eq!(out.nodes.len(), 2);
        let doc = &out.nodes[0];
        assert_eq!(doc.label, Label::Document);
        assert_eq!(doc.get("title"), Some(&PropertyValue::from("Aspirin Label")));
        assert_eq!(doc.get("language"), Some(&PropertyValue::from("en")));
        assert_eq!(doc.get("status"), Some(&PropertyValue::from("active")));
        assert_eq!(doc.get("doc_type"), Some(&PropertyValue::from("document")));
        assert_eq!(doc.get("snippet"), Some(&PropertyValue::from("Aspirin is indicated for pain.")));
        assert_eq!(
            doc.get("ingested_at"),
            Some(&PropertyValue::from("2024-05-01T12:00:00.000000000Z"))
        );

        let types: Vec<RelationshipType> = out.relationships.iter().map(|r| r.rel_type).collect();
        assert_eq!(types, vec![RelationshipType::PublishedBy, RelationshipType::Mentions]);
        let mention = &out.relationships[1];
        let mut key = Properties::new();
        key.insert("external_id".into(), "CHEMBL:CHEMBL25".into());
        assert_eq!(mention.to, NodeRef::Canonical(CanonicalId::for_key(Label::Compound, &key)));
    }

    /// Verify that explicit values are never overwritten by defaults.
    #[test]
    fn test_defaults_only_fill_absent_fields() {
        let rec = record(
            "labels",
            json!({"record_type": "document", "file_path": "/a", "language": "DE", "status": "Draft"}),
        );
        let out = transformer().transform(&rec).expect("transform");
        assert_eq!(out.nodes[0].get("language"), Some(&PropertyValue::from("de")));
        assert_eq!(out.nodes[0].get("status"), Some(&PropertyValue::from("draft")));
    }

    #[test]
    fn test_truncation_limits() {
        let long_title = "t".repeat(TITLE_MAX_CHARS + 50);
        let long_text = "word ".repeat(30000);
        let rec = record(
            "labels",
            json!({"record_type": "document", "file_path": "/a", "title": long_title, "full_text": long_text}),
        );
        let out = transformer().transform(&rec).expect("transform");
        let doc = &out.nodes[0];
        let title = doc.get("title").and_then(PropertyValue::as_str).expect("title");
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS);
        assert!(title.ends_with("..."));
        let text = doc.get("full_text").and_then(PropertyValue::as_str).expect("full_text");
        assert_eq!(text.chars().count(), FULL_TEXT_MAX_CHARS);
        let snippet = doc.get("snippet").and_then(PropertyValue::as_str).expect("snippet");
        assert_eq!(snippet.chars().count(), SNIPPET_MAX_CHARS);
    }

    #[test]
    fn test_transform_is_deterministic() {
        let rec = record("fda", json!({"title": "Warning Letter", "company": "Acme", "issued_date": "03/02/2021"}));
        let a = transformer().transform(&rec).expect("transform");
        let b = transformer().transform(&rec).expect("transform");
        assert_eq!(a, b);
        assert_eq!(a.nodes[0].get("issued_date"), Some(&PropertyValue::from("2021-03-02")));
    }

    #[test]
    fn test_placeholder_sponsor_creates_no_organization() {
        let rec = record(
            "ctgov",
            json!({"record_type": "clinical_trial", "nct_id": "NCT01234567", "sponsor": "Unknown"}),
        );
        let out = transformer().transform(&rec).expect("transform");
        assert_eq!(out.nodes.len(), 1);
        assert!(out.relationships.is_empty());
    }

    #[test]
    fn test_organization_identity_is_case_insensitive() {
        let a = transformer()
            .transform(&record("fda", json!({"title": "L1", "company": "Pfizer  Inc."})))
            .expect("transform");
        let b = transformer()
            .transform(&record("fda", json!({"title": "L2", "company": "PFIZER INC."})))
            .expect("transform");
        let org_fp = |out: &TransformOutput| -> Fingerprint {
            out.nodes
                .iter()
                .find(|n| n.label == Label::Organization)
                .map(|n| n.fingerprint.clone())
                .expect("organization node")
        };
        assert_eq!(org_fp(&a), org_fp(&b));
    }

    #[test]
    fn test_unknown_kind_without_default() {
        let err = transformer()
            .transform(&record("mystery", json!({"title": "x"})))
            .expect_err("no kind");
        assert_eq!(err.field, "record_type");
    }

    #[test]
    fn test_compound_targets_use_canonical_refs() {
        let rec = record(
            "chembl",
            json!({"record_type": "compound", "chembl_id": "CHEMBL25", "name": "Aspirin",
                   "targets": [{"id": "p23219", "confidence": 0.9}]}),
        );
        let out = transformer().transform(&rec).expect("transform");
        assert_eq!(out.relationships.len(), 1);
        let rel = &out.relationships[0];
        assert_eq!(rel.rel_type, RelationshipType::Targets);
        assert_eq!(rel.to.label(), Label::Target);
        assert_eq!(rel.properties.get("confidence"), Some(&PropertyValue::Float(0.9)));
    }
}
