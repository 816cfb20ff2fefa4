//! Typed decoding of raw source payloads.
//!
//! Each record kind has a payload struct naming the fields the graph model
//! understands. [`PayloadReader`] tracks which raw fields were consumed; the
//! rest travel on as extra properties under sanitised keys.

use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::errors::TransformError;
use crate::nodes::{Properties, PropertyValue};
use crate::source::RawPayload;
use crate::utils::{normalize_date, normalize_whitespace, sanitize_key};

/// What a source record describes. Organizations are never records of their
/// own; they are derived from the records that name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Document,
    Compound,
    Target,
    ClinicalTrial,
    RegulatoryLetter,
}

impl FromStr for RecordKind {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "document" | "doc" | "label" => Ok(RecordKind::Document),
            "compound" | "molecule" | "drug" => Ok(RecordKind::Compound),
            "target" | "protein" => Ok(RecordKind::Target),
            "clinical_trial" | "clinicaltrial" | "trial" => Ok(RecordKind::ClinicalTrial),
            "regulatory_letter" | "regulatoryletter" | "warning_letter" | "letter" => {
                Ok(RecordKind::RegulatoryLetter)
            }
            other => Err(TransformError::malformed(
                "record_type",
                format!("unknown record type '{other}'"),
            )),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Document => "document",
            RecordKind::Compound => "compound",
            RecordKind::Target => "target",
            RecordKind::ClinicalTrial => "clinical_trial",
            RecordKind::RegulatoryLetter => "regulatory_letter",
        };
        f.write_str(name)
    }
}

/// Reference to an external entity inside a payload, e.g. one element of a
/// document's `compounds` list. Either a bare ID string or `{"id", "confidence"}`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMention {
    pub id: String,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentPayload {
    pub file_path: String,
    pub content_hash: Option<String>,
    pub title: Option<String>,
    pub full_text: Option<String>,
    pub language: Option<String>,
    pub status: Option<String>,
    pub doc_type: Option<String>,
    pub published_date: Option<String>,
    pub company: Option<String>,
    pub compounds: Vec<EntityMention>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompoundPayload {
    /// Namespaced, upper-case identifier such as `CHEMBL:CHEMBL25`.
    pub external_id: String,
    pub name: Option<String>,
    pub molecular_weight: Option<f64>,
    pub molecular_formula: Option<String>,
    pub smiles: Option<String>,
    pub inchi_key: Option<String>,
    pub max_phase: Option<i64>,
    pub status: Option<String>,
    pub synonyms: Vec<String>,
    pub targets: Vec<EntityMention>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TargetPayload {
    pub uniprot_id: String,
    pub name: Option<String>,
    pub gene_symbol: Option<String>,
    pub organism: Option<String>,
    pub target_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClinicalTrialPayload {
    pub nct_id: String,
    pub title: Option<String>,
    pub overall_status: Option<String>,
    pub phase: Option<String>,
    pub enrollment: Option<i64>,
    pub start_date: Option<String>,
    pub completion_date: Option<String>,
    pub conditions: Vec<String>,
    pub sponsor: Option<String>,
    pub compounds: Vec<EntityMention>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegulatoryLetterPayload {
    pub title: String,
    pub issued_date: Option<String>,
    pub company: Option<String>,
    pub application_number: Option<String>,
    pub subject: Option<String>,
    pub letter_type: Option<String>,
    pub effective_date: Option<String>,
    pub repeal_date: Option<String>,
    pub full_text: Option<String>,
    pub compounds: Vec<EntityMention>,
}

/// A decoded payload, one variant per record kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityPayload {
    Document(DocumentPayload),
    Compound(CompoundPayload),
    Target(TargetPayload),
    ClinicalTrial(ClinicalTrialPayload),
    RegulatoryLetter(RegulatoryLetterPayload),
}

/// Decoded payload plus the unmapped fields that survived as properties.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub entity: EntityPayload,
    pub extras: Properties,
}

impl EntityPayload {
    pub fn decode(kind: RecordKind, raw: &RawPayload) -> Result<DecodedPayload, TransformError> {
        let mut reader = PayloadReader::new(raw);
        reader.consume("record_type");
        let entity = match kind {
            RecordKind::Document => EntityPayload::Document(DocumentPayload {
                file_path: reader.required_text(&["file_path", "file", "path", "url"])?,
                content_hash: reader.text(&["content_hash", "sha256", "checksum"])?,
                title: reader.text(&["title", "name"])?,
                full_text: reader.raw_text(&["full_text", "text", "content"])?,
                language: reader.text(&["language", "lang"])?,
                status: reader.text(&["status"])?,
                doc_type: reader.text(&["doc_type", "document_type"])?,
                published_date: reader.date(&["published_date", "publication_date", "date"])?,
                company: reader.text(&["company", "publisher", "manufacturer"])?,
                compounds: reader.mentions(&["compounds", "compound_ids"])?,
                keywords: reader.string_list(&["keywords", "tags"])?,
            }),
            RecordKind::Compound => EntityPayload::Compound(CompoundPayload {
                external_id: reader.compound_id()?,
                name: reader.text(&["name", "pref_name", "preferred_name"])?,
                molecular_weight: reader.number(&["molecular_weight", "mw"])?,
                molecular_formula: reader.text(&["molecular_formula", "formula"])?,
                smiles: reader.text(&["smiles", "canonical_smiles"])?,
                inchi_key: reader.text(&["inchi_key", "standard_inchi_key"])?,
                max_phase: reader.integer(&["max_phase"])?,
                status: reader.text(&["status"])?,
                synonyms: reader.string_list(&["synonyms"])?,
                targets: reader.mentions(&["targets", "target_ids"])?,
            }),
            RecordKind::Target => EntityPayload::Target(TargetPayload {
                uniprot_id: reader.required_text(&["uniprot_id", "accession"])?.to_uppercase(),
                name: reader.text(&["name", "pref_name", "protein_name"])?,
                gene_symbol: reader.text(&["gene_symbol", "gene"])?,
                organism: reader.text(&["organism"])?,
                target_type: reader.text(&["target_type"])?,
            }),
            RecordKind::ClinicalTrial => EntityPayload::ClinicalTrial(ClinicalTrialPayload {
                nct_id: reader.required_text(&["nct_id", "nctid"])?.to_uppercase(),
                title: reader.text(&["title", "brief_title", "official_title"])?,
                overall_status: reader.text(&["overall_status", "status"])?,
                phase: reader.text(&["phase"])?,
                enrollment: reader.integer(&["enrollment", "enrollment_count"])?,
                start_date: reader.date(&["start_date"])?,
                completion_date: reader.date(&["completion_date", "primary_completion_date"])?,
                conditions: reader.string_list(&["conditions"])?,
                sponsor: reader.text(&["sponsor", "lead_sponsor"])?,
                compounds: reader.mentions(&["compounds", "interventions"])?,
            }),
            RecordKind::RegulatoryLetter => EntityPayload::RegulatoryLetter(RegulatoryLetterPayload {
                title: reader.required_text(&["title", "letter_title"])?,
                issued_date: reader.date(&["issued_date", "letter_date", "date"])?,
                company: reader.text(&["company", "recipient", "company_name"])?,
                application_number: reader.text(&["application_number", "application_no"])?,
                subject: reader.text(&["subject"])?,
                letter_type: reader.text(&["letter_type"])?,
                effective_date: reader.date(&["effective_date"])?,
                repeal_date: reader.date(&["repeal_date"])?,
                full_text: reader.raw_text(&["full_text", "text", "content"])?,
                compounds: reader.mentions(&["compounds", "products"])?,
            }),
        };
        Ok(DecodedPayload {
            entity,
            extras: reader.into_extras(),
        })
    }
}

/// Normalise a compound identifier to `NAMESPACE:ID`, upper-case.
///
/// Already-namespaced IDs are only upper-cased. Bare IDs are namespaced by
/// shape: `CHEMBL…` → ChEMBL, `DB` + digits → DrugBank, all digits → PubChem.
pub fn normalize_compound_id(raw: &str) -> Option<String> {
    let id = raw.trim().to_uppercase();
    if id.is_empty() {
        return None;
    }
    if id.contains(':') {
        return Some(id);
    }
    let namespace = if id.starts_with("CHEMBL") {
        "CHEMBL"
    } else if id.len() > 2 && id.starts_with("DB") && id[2..].chars().all(|c| c.is_ascii_digit()) {
        "DRUGBANK"
    } else if id.chars().all(|c| c.is_ascii_digit()) {
        "PUBCHEM"
    } else {
        "COMPOUND"
    };
    Some(format!("{namespace}:{id}"))
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Field access over a raw payload with alias lookup and consumption tracking.
pub struct PayloadReader<'a> {
    raw: &'a RawPayload,
    consumed: HashSet<String>,
}

impl<'a> PayloadReader<'a> {
    pub fn new(raw: &'a RawPayload) -> Self {
        Self {
            raw,
            consumed: HashSet::new(),
        }
    }

    pub fn consume(&mut self, field: &str) {
        self.consumed.insert(field.to_string());
    }

    /// First non-null value among `aliases`; every alias counts as consumed.
    fn lookup(&mut self, aliases: &[&str]) -> Option<(&'a str, &'a Value)> {
        for alias in aliases {
            self.consume(alias);
        }
        let raw = self.raw;
        aliases.iter().find_map(|alias| match raw.get_key_value(*alias) {
            Some((key, value)) if !value.is_null() => Some((key.as_str(), value)),
            _ => None,
        })
    }

    fn scalar_text(field: &str, value: &Value) -> Result<String, TransformError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(TransformError::malformed(
                field,
                format!("expected text, got {}", kind_name(other)),
            )),
        }
    }

    /// Whitespace-normalised text; empty becomes `None`.
    pub fn text(&mut self, aliases: &[&str]) -> Result<Option<String>, TransformError> {
        match self.lookup(aliases) {
            Some((field, value)) => {
                let text = normalize_whitespace(&Self::scalar_text(field, value)?);
                Ok((!text.is_empty()).then_some(text))
            }
            None => Ok(None),
        }
    }

    /// Text with internal layout preserved, for long bodies.
    pub fn raw_text(&mut self, aliases: &[&str]) -> Result<Option<String>, TransformError> {
        match self.lookup(aliases) {
            Some((field, value)) => {
                let text = Self::scalar_text(field, value)?;
                Ok((!text.trim().is_empty()).then_some(text))
            }
            None => Ok(None),
        }
    }

    pub fn required_text(&mut self, aliases: &[&str]) -> Result<String, TransformError> {
        self.text(aliases)?
            .ok_or_else(|| TransformError::missing(aliases.first().copied().unwrap_or_default()))
    }

    /// Number, or a string holding one.
    pub fn number(&mut self, aliases: &[&str]) -> Result<Option<f64>, TransformError> {
        match self.lookup(aliases) {
            Some((_, Value::Number(n))) => Ok(n.as_f64()),
            Some((field, Value::String(s))) => {
                if s.trim().is_empty() {
                    return Ok(None);
                }
                s.trim()
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| TransformError::malformed(field, format!("not a number: '{s}'")))
            }
            Some((field, other)) => Err(TransformError::malformed(
                field,
                format!("expected a number, got {}", kind_name(other)),
            )),
            None => Ok(None),
        }
    }

    pub fn integer(&mut self, aliases: &[&str]) -> Result<Option<i64>, TransformError> {
        match self.lookup(aliases) {
            Some((_, Value::Number(n))) if n.is_i64() => Ok(n.as_i64()),
            Some((field, Value::String(s))) => {
                if s.trim().is_empty() {
                    return Ok(None);
                }
                s.trim()
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|_| TransformError::malformed(field, format!("not an integer: '{s}'")))
            }
            Some((field, other)) => Err(TransformError::malformed(
                field,
                format!("expected an integer, got {other}"),
            )),
            None => Ok(None),
        }
    }

    /// Date normalised to `YYYY-MM-DD`.
    pub fn date(&mut self, aliases: &[&str]) -> Result<Option<String>, TransformError> {
        let Some((field, value)) = self.lookup(aliases) else {
            return Ok(None);
        };
        let text = Self::scalar_text(field, value)?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        normalize_date(&text)
            .map(Some)
            .ok_or_else(|| TransformError::malformed(field, format!("unrecognised date '{text}'")))
    }

    /// List of strings. A single string is a one-element list.
    pub fn string_list(&mut self, aliases: &[&str]) -> Result<Vec<String>, TransformError> {
        let Some((field, value)) = self.lookup(aliases) else {
            return Ok(Vec::new());
        };
        let items: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let text = normalize_whitespace(&Self::scalar_text(field, item)?);
            if !text.is_empty() {
                out.push(text);
            }
        }
        Ok(out)
    }

    /// Entity mentions: strings, or objects with `id` and optional `confidence`.
    pub fn mentions(&mut self, aliases: &[&str]) -> Result<Vec<EntityMention>, TransformError> {
        let Some((field, value)) = self.lookup(aliases) else {
            return Ok(Vec::new());
        };
        let items: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let mention = match item {
                Value::Object(obj) => {
                    let id = obj
                        .get("id")
                        .map(|v| Self::scalar_text(field, v))
                        .transpose()?
                        .unwrap_or_default();
                    let confidence = match obj.get("confidence") {
                        None | Some(Value::Null) => None,
                        Some(Value::Number(n)) => n.as_f64(),
                        Some(other) => {
                            return Err(TransformError::malformed(
                                field,
                                format!("confidence must be a number, got {other}"),
                            ))
                        }
                    };
                    EntityMention { id, confidence }
                }
                scalar => EntityMention {
                    id: Self::scalar_text(field, scalar)?,
                    confidence: None,
                },
            };
            if !mention.id.trim().is_empty() {
                out.push(EntityMention {
                    id: mention.id.trim().to_string(),
                    ..mention
                });
            }
        }
        Ok(out)
    }

    /// External compound ID from the first identifier field present.
    pub fn compound_id(&mut self) -> Result<String, TransformError> {
        for field in ["chembl_id", "drugbank_id", "pubchem_cid", "compound_id", "external_id"] {
            self.consume(field);
        }
        let namespaced: [(&str, &str); 3] = [
            ("chembl_id", "CHEMBL"),
            ("drugbank_id", "DRUGBANK"),
            ("pubchem_cid", "PUBCHEM"),
        ];
        for (field, namespace) in namespaced {
            if let Some(id) = self.text(&[field])? {
                return Ok(format!("{namespace}:{}", id.to_uppercase()));
            }
        }
        self.text(&["compound_id", "external_id"])?
            .as_deref()
            .and_then(normalize_compound_id)
            .ok_or_else(|| TransformError::missing("chembl_id"))
    }

    /// Unconsumed fields as properties under sanitised keys. Nested objects
    /// have no property form and are dropped.
    pub fn into_extras(self) -> Properties {
        let mut extras = Properties::new();
        for (key, value) in self.raw {
            if self.consumed.contains(key) {
                continue;
            }
            let Some(name) = sanitize_key(key) else {
                debug!(field = %key, "dropping payload field with unusable name");
                continue;
            };
            match PropertyValue::from_json(value) {
                Some(PropertyValue::Null) => {}
                Some(property) => {
                    extras.insert(name, property);
                }
                None => debug!(field = %key, "dropping nested payload field"),
            }
        }
        extras
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
