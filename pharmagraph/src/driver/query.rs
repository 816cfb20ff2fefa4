//! Parameterized query construction.
//!
//! Every value reaches the store as a query parameter. Labels, relationship
//! types and property names are the only text spliced into a query; they come
//! from closed enums or fixed tables and are still checked by
//! [`validate_identifier`] before use.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::edges::{RelationshipType, ResolvedRelationship};
use crate::errors::StoreError;
use crate::nodes::{Label, Properties, PropertyValue, Provenance, StagedNode};
use crate::utils::text::PLACEHOLDERS;

static IDENTIFIER_RE: OnceLock<Regex> = OnceLock::new();

fn identifier_re() -> &'static Regex {
    IDENTIFIER_RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex is valid"))
}

/// Reject anything that is not a plain identifier.
pub fn validate_identifier(name: &str) -> Result<&str, StoreError> {
    if identifier_re().is_match(name) {
        Ok(name)
    } else {
        Err(StoreError::Fatal(format!("invalid identifier '{name}'")))
    }
}

/// A query parameter: a property value or a structure of them.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Value(PropertyValue),
    Map(BTreeMap<String, QueryParam>),
    List(Vec<QueryParam>),
}

impl From<PropertyValue> for QueryParam {
    fn from(value: PropertyValue) -> Self {
        QueryParam::Value(value)
    }
}

impl From<&str> for QueryParam {
    fn from(s: &str) -> Self {
        QueryParam::Value(PropertyValue::from(s))
    }
}

impl From<Properties> for QueryParam {
    fn from(props: Properties) -> Self {
        QueryParam::Map(props.into_iter().map(|(k, v)| (k, QueryParam::Value(v))).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterizedQuery {
    pub text: String,
    pub params: BTreeMap<String, QueryParam>,
}

impl ParameterizedQuery {
    fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: BTreeMap::new(),
        }
    }

    fn param(mut self, name: &str, value: impl Into<QueryParam>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }
}

// ── Filters ──────────────────────────────────────────────────────────────────

/// Typed filter on a node property.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, PropertyValue),
    In(String, Vec<PropertyValue>),
    IsNull(String),
    NotNull(String),
    Gte(String, PropertyValue),
    Lte(String, PropertyValue),
}

impl Predicate {
    pub fn field(&self) -> &str {
        match self {
            Predicate::Eq(f, _)
            | Predicate::In(f, _)
            | Predicate::IsNull(f)
            | Predicate::NotNull(f)
            | Predicate::Gte(f, _)
            | Predicate::Lte(f, _) => f,
        }
    }

    /// Evaluate against properties held in memory, with the store's semantics:
    /// comparisons against an absent property are false.
    pub fn matches(&self, props: &Properties) -> bool {
        let value = props.get(self.field()).filter(|v| **v != PropertyValue::Null);
        match self {
            Predicate::Eq(_, expected) => value == Some(expected),
            Predicate::In(_, options) => value.is_some_and(|v| options.contains(v)),
            Predicate::IsNull(_) => value.is_none(),
            Predicate::NotNull(_) => value.is_some(),
            Predicate::Gte(_, bound) => value.is_some_and(|v| compare(v, bound).is_some_and(|o| o.is_ge())),
            Predicate::Lte(_, bound) => value.is_some_and(|v| compare(v, bound).is_some_and(|o| o.is_le())),
        }
    }

    fn render(&self, param: &str) -> Result<String, StoreError> {
        let field = validate_identifier(self.field())?;
        Ok(match self {
            Predicate::Eq(..) => format!("n.{field} = ${param}"),
            Predicate::In(..) => format!("n.{field} IN ${param}"),
            Predicate::IsNull(_) => format!("n.{field} IS NULL"),
            Predicate::NotNull(_) => format!("n.{field} IS NOT NULL"),
            Predicate::Gte(..) => format!("n.{field} >= ${param}"),
            Predicate::Lte(..) => format!("n.{field} <= ${param}"),
        })
    }

    fn param_value(&self) -> Option<QueryParam> {
        match self {
            Predicate::Eq(_, v) | Predicate::Gte(_, v) | Predicate::Lte(_, v) => Some(v.clone().into()),
            Predicate::In(_, vs) => Some(QueryParam::List(vs.iter().cloned().map(QueryParam::Value).collect())),
            Predicate::IsNull(_) | Predicate::NotNull(_) => None,
        }
    }
}

fn compare(a: &PropertyValue, b: &PropertyValue) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (PropertyValue::Text(x), PropertyValue::Text(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// `MATCH (n[:Label]) WHERE … RETURN count(n) AS count`.
pub fn count_nodes(label: Option<Label>, filter: &[Predicate]) -> Result<ParameterizedQuery, StoreError> {
    let pattern = match label {
        Some(label) => format!("(n:{})", validate_identifier(label.as_str())?),
        None => "(n)".to_string(),
    };
    let mut clauses = Vec::with_capacity(filter.len());
    let mut query = ParameterizedQuery::new("");
    for (i, predicate) in filter.iter().enumerate() {
        let param = format!("p{i}");
        clauses.push(predicate.render(&param)?);
        if let Some(value) = predicate.param_value() {
            query = query.param(&param, value);
        }
    }
    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    query.text = format!("MATCH {pattern}{where_clause} RETURN count(n) AS count");
    Ok(query)
}

pub fn count_relationships(rel_type: Option<RelationshipType>) -> Result<ParameterizedQuery, StoreError> {
    let pattern = match rel_type {
        Some(t) => format!("[r:{}]", validate_identifier(t.as_str())?),
        None => "[r]".to_string(),
    };
    Ok(ParameterizedQuery::new(format!("MATCH ()-{pattern}->() RETURN count(r) AS count")))
}

// ── Upserts ──────────────────────────────────────────────────────────────────

fn sources(provenance: &[Provenance]) -> PropertyValue {
    let mut names: Vec<String> = provenance.iter().map(|p| p.source.clone()).collect();
    names.sort();
    names.dedup();
    PropertyValue::from(names)
}

/// One node as written: overwrite properties, guarded properties and identity.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub canonical_id: String,
    pub fingerprint: String,
    /// Last-writer-wins properties, including `sources`. Nulls are dropped.
    pub props: Properties,
    /// Set-if-better properties.
    pub guarded: Properties,
}

impl NodeRow {
    pub fn from_node(node: &StagedNode) -> Self {
        let mut props = Properties::new();
        let mut guarded = Properties::new();
        for (field, value) in &node.properties {
            if *value == PropertyValue::Null || field == "canonical_id" || field == "fingerprint" {
                continue;
            }
            if node.label.is_guarded(field) {
                guarded.insert(field.clone(), value.clone());
            } else {
                props.insert(field.clone(), value.clone());
            }
        }
        props.insert("sources".to_string(), sources(&node.provenance));
        Self {
            canonical_id: node.canonical_id.to_string(),
            fingerprint: node.fingerprint.to_string(),
            props,
            guarded,
        }
    }

    fn into_param(self) -> QueryParam {
        let mut row = BTreeMap::new();
        row.insert("canonical_id".to_string(), QueryParam::from(self.canonical_id.as_str()));
        row.insert("fingerprint".to_string(), QueryParam::from(self.fingerprint.as_str()));
        row.insert("props".to_string(), QueryParam::from(self.props));
        row.insert("guarded".to_string(), QueryParam::from(self.guarded));
        QueryParam::Map(row)
    }
}

/// One relationship as written; `props` replaces the stored properties.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRow {
    pub from: String,
    pub to: String,
    pub props: Properties,
}

impl RelationshipRow {
    pub fn from_relationship(rel: &ResolvedRelationship) -> Self {
        let mut props: Properties = rel
            .properties
            .iter()
            .filter(|(_, v)| **v != PropertyValue::Null)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        props.insert("sources".to_string(), sources(&rel.provenance));
        Self {
            from: rel.from.to_string(),
            to: rel.to.to_string(),
            props,
        }
    }

    fn into_param(self) -> QueryParam {
        let mut row = BTreeMap::new();
        row.insert("from".to_string(), QueryParam::from(self.from.as_str()));
        row.insert("to".to_string(), QueryParam::from(self.to.as_str()));
        row.insert("props".to_string(), QueryParam::from(self.props));
        QueryParam::Map(row)
    }
}

fn placeholder_param() -> QueryParam {
    QueryParam::List(PLACEHOLDERS.iter().map(|p| QueryParam::from(*p)).collect())
}

/// Count stored nodes whose canonical ID is bound to a different fingerprint.
pub fn node_conflicts(label: Label, nodes: &[&StagedNode]) -> Result<ParameterizedQuery, StoreError> {
    let label = validate_identifier(label.as_str())?;
    let rows = nodes
        .iter()
        .map(|n| {
            let mut row = BTreeMap::new();
            row.insert("canonical_id".to_string(), QueryParam::from(n.canonical_id.to_string().as_str()));
            row.insert("fingerprint".to_string(), QueryParam::from(n.fingerprint.as_str()));
            QueryParam::Map(row)
        })
        .collect();
    Ok(ParameterizedQuery::new(format!(
        "UNWIND $rows AS row \
         MATCH (n:{label} {{canonical_id: row.canonical_id}}) \
         WHERE n.fingerprint <> row.fingerprint \
         RETURN count(n) AS conflicts"
    ))
    .param("rows", QueryParam::List(rows)))
}

/// Merge nodes of one label by canonical ID.
///
/// Guarded fields keep a stored value when the incoming one is absent or a
/// placeholder; every other property is overwritten.
pub fn node_upsert(label: Label, nodes: &[&StagedNode]) -> Result<ParameterizedQuery, StoreError> {
    let label_name = validate_identifier(label.as_str())?;
    let mut guarded_sets = Vec::new();
    for field in label.guarded_fields() {
        let field = validate_identifier(field)?;
        guarded_sets.push(format!(
            "n.{field} = CASE \
             WHEN row.guarded.{field} IS NULL \
               OR toLower(trim(toString(row.guarded.{field}))) IN $placeholders \
             THEN coalesce(n.{field}, row.guarded.{field}) \
             ELSE row.guarded.{field} END"
        ));
    }
    let guarded_clause = if guarded_sets.is_empty() {
        String::new()
    } else {
        format!("SET {} ", guarded_sets.join(", "))
    };
    let rows = nodes.iter().map(|n| NodeRow::from_node(n).into_param()).collect();
    Ok(ParameterizedQuery::new(format!(
        "UNWIND $rows AS row \
         MERGE (n:{label_name} {{canonical_id: row.canonical_id}}) \
         ON CREATE SET n.fingerprint = row.fingerprint \
         SET n += row.props \
         {guarded_clause}\
         RETURN count(n) AS written"
    ))
    .param("rows", QueryParam::List(rows))
    .param("placeholders", placeholder_param()))
}

/// Merge relationships of one type between existing nodes. Rows whose
/// endpoints are missing match nothing and are not written.
pub fn relationship_upsert(
    rel_type: RelationshipType,
    rels: &[&ResolvedRelationship],
) -> Result<ParameterizedQuery, StoreError> {
    let (from_label, to_label) = rel_type.endpoints();
    let from_label = validate_identifier(from_label.as_str())?;
    let to_label = validate_identifier(to_label.as_str())?;
    let type_name = validate_identifier(rel_type.as_str())?;
    let rows = rels
        .iter()
        .map(|r| RelationshipRow::from_relationship(r).into_param())
        .collect();
    Ok(ParameterizedQuery::new(format!(
        "UNWIND $rows AS row \
         MATCH (a:{from_label} {{canonical_id: row.from}}) \
         MATCH (b:{to_label} {{canonical_id: row.to}}) \
         MERGE (a)-[r:{type_name}]->(b) \
         SET r = row.props \
         RETURN count(r) AS written"
    ))
    .param("rows", QueryParam::List(rows)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn node(title: &str) -> StagedNode {
        let mut props = Properties::new();
        props.insert("file_path".into(), "/x/asa.pdf".into());
        props.insert("title".into(), title.into());
        props.insert("language".into(), "en".into());
        StagedNode::new(
            Label::Document,
            props,
            Provenance {
                source: "A".into(),
                origin_id: "1".into(),
                fetched_at: Utc::now(),
            },
        )
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("overall_status").is_ok());
        assert!(validate_identifier("_x1").is_ok());
        for bad in ["", "1abc", "a b", "n.name", "x}) DETACH DELETE n //", "a-b"] {
            assert!(validate_identifier(bad).is_err(), "{bad:?}");
        }
    }

    /// Verify that no property value ever appears in query text.
    #[test]
    fn test_node_upsert_never_inlines_values() {
        let hostile = node("x'}) DETACH DELETE n //");
        let query = node_upsert(Label::Document, &[&hostile]).expect("build");
        assert!(!query.text.contains("DETACH"));
        assert!(!query.text.contains("/x/asa.pdf"));
        assert!(query.text.contains("MERGE (n:Document {canonical_id: row.canonical_id})"));
        assert!(query.text.contains("n.title = CASE"));
        assert!(query.params.contains_key("rows"));
        assert!(query.params.contains_key("placeholders"));
    }

    #[test]
    fn test_node_row_splits_guarded_fields() {
        let row = NodeRow::from_node(&node("Aspirin"));
        assert_eq!(row.guarded.get("title"), Some(&"Aspirin".into()));
        assert!(!row.props.contains_key("title"));
        assert_eq!(row.props.get("language"), Some(&"en".into()));
        assert_eq!(row.props.get("sources"), Some(&PropertyValue::from(vec!["A".to_string()])));
    }

    #[test]
    fn test_count_nodes_with_predicates() {
        let filter = vec![
            Predicate::Eq("status".into(), "active".into()),
            Predicate::In("language".into(), vec!["en".into(), "de".into()]),
            Predicate::NotNull("title".into()),
        ];
        let query = count_nodes(Some(Label::Document), &filter).expect("build");
        assert_eq!(
            query.text,
            "MATCH (n:Document) WHERE n.status = $p0 AND n.language IN $p1 AND n.title IS NOT NULL RETURN count(n) AS count"
        );
        assert_eq!(query.params.len(), 2);

        let bad = vec![Predicate::IsNull("title) RETURN 1 //".into())];
        assert!(count_nodes(None, &bad).is_err());
    }

    #[test]
    fn test_predicate_matches_in_memory() {
        let mut props = Properties::new();
        props.insert("enrollment".into(), PropertyValue::Int(100));
        props.insert("phase".into(), "PHASE2".into());
        assert!(Predicate::Gte("enrollment".into(), PropertyValue::Int(50)).matches(&props));
        assert!(!Predicate::Lte("enrollment".into(), PropertyValue::Float(99.5)).matches(&props));
        assert!(Predicate::IsNull("title".into()).matches(&props));
        assert!(!Predicate::Eq("title".into(), "x".into()).matches(&props));
        assert!(Predicate::In("phase".into(), vec!["PHASE2".into()]).matches(&props));
    }

    #[test]
    fn test_relationship_upsert_uses_type_endpoints() {
        let rel = ResolvedRelationship {
            rel_type: RelationshipType::SponsoredBy,
            from: "TRL-0123abcd".parse().expect("id"),
            to: "ORG-89abcdef".parse().expect("id"),
            properties: Properties::new(),
            provenance: vec![],
        };
        let query = relationship_upsert(RelationshipType::SponsoredBy, &[&rel]).expect("build");
        assert!(query.text.contains("MATCH (a:ClinicalTrial {canonical_id: row.from})"));
        assert!(query.text.contains("MERGE (a)-[r:SPONSORED_BY]->(b)"));
        assert!(!query.text.contains("TRL-0123abcd"));
    }
}
