//! Declarative validation rules over node properties.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Bound;

use super::Violation;
use crate::nodes::{Properties, PropertyValue};
use crate::utils::parse_date;

/// Expected property type for [`Rule::Type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    Integer,
    /// Integer or float.
    Number,
    Text,
    List,
    /// Text that parses as a calendar date.
    Date,
}

impl ValueKind {
    pub fn matches(&self, value: &PropertyValue) -> bool {
        match (self, value) {
            (ValueKind::Bool, PropertyValue::Bool(_)) => true,
            (ValueKind::Integer, PropertyValue::Int(_)) => true,
            (ValueKind::Number, PropertyValue::Int(_) | PropertyValue::Float(_)) => true,
            (ValueKind::Text, PropertyValue::Text(_)) => true,
            (ValueKind::List, PropertyValue::List(_)) => true,
            (ValueKind::Date, PropertyValue::Text(s)) => parse_date(s).is_some(),
            _ => false,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ValueKind::Bool => "boolean",
            ValueKind::Integer => "integer",
            ValueKind::Number => "number",
            ValueKind::Text => "text",
            ValueKind::List => "list",
            ValueKind::Date => "date",
        }
    }
}

/// One check against a node's properties.
///
/// Apart from `Required`, rules only look at fields that carry a real value;
/// absent fields and placeholders pass.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Present, not null, not an empty string.
    Required(String),
    Type(String, ValueKind),
    Range {
        field: String,
        min: Bound<f64>,
        max: Bound<f64>,
    },
    /// Case-insensitive membership; spaces, `_` and `-` are ignored.
    OneOf { field: String, values: Vec<String> },
    Pattern { field: String, regex: Regex },
    /// When both dates are present, `earlier` must not be after `later`.
    DateOrder { earlier: String, later: String },
}

fn fold(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_uppercase)
        .collect()
}

fn within(value: f64, min: Bound<f64>, max: Bound<f64>) -> bool {
    let above = match min {
        Bound::Included(m) => value >= m,
        Bound::Excluded(m) => value > m,
        Bound::Unbounded => true,
    };
    let below = match max {
        Bound::Included(m) => value <= m,
        Bound::Excluded(m) => value < m,
        Bound::Unbounded => true,
    };
    above && below
}

fn describe_range(min: Bound<f64>, max: Bound<f64>) -> String {
    let lower = match min {
        Bound::Included(m) => format!("[{m}"),
        Bound::Excluded(m) => format!("({m}"),
        Bound::Unbounded => "(-inf".to_string(),
    };
    let upper = match max {
        Bound::Included(m) => format!("{m}]"),
        Bound::Excluded(m) => format!("{m})"),
        Bound::Unbounded => "inf)".to_string(),
    };
    format!("{lower}, {upper}")
}

impl Rule {
    pub fn required(field: &str) -> Self {
        Rule::Required(field.to_string())
    }

    pub fn of_type(field: &str, kind: ValueKind) -> Self {
        Rule::Type(field.to_string(), kind)
    }

    pub fn range(field: &str, min: Bound<f64>, max: Bound<f64>) -> Self {
        Rule::Range {
            field: field.to_string(),
            min,
            max,
        }
    }

    pub fn one_of(field: &str, values: &[&str]) -> Self {
        Rule::OneOf {
            field: field.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Panics on an invalid pattern; rule tables are built from literals.
    pub fn pattern(field: &str, pattern: &str) -> Self {
        Rule::Pattern {
            field: field.to_string(),
            regex: Regex::new(pattern).expect("rule pattern is a valid regex"),
        }
    }

    pub fn date_order(earlier: &str, later: &str) -> Self {
        Rule::DateOrder {
            earlier: earlier.to_string(),
            later: later.to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rule::Required(_) => "required",
            Rule::Type(..) => "type",
            Rule::Range { .. } => "range",
            Rule::OneOf { .. } => "one_of",
            Rule::Pattern { .. } => "pattern",
            Rule::DateOrder { .. } => "date_order",
        }
    }

    fn violation(&self, field: &str, message: String) -> Violation {
        Violation {
            rule: self.name().to_string(),
            field: field.to_string(),
            message,
        }
    }

    /// Check `props`; `None` means the rule holds.
    pub fn check(&self, props: &Properties) -> Option<Violation> {
        let real = |field: &str| props.get(field).filter(|v| !v.is_placeholder());
        match self {
            Rule::Required(field) => {
                let present = match props.get(field) {
                    None | Some(PropertyValue::Null) => false,
                    Some(PropertyValue::Text(s)) => !s.trim().is_empty(),
                    Some(_) => true,
                };
                (!present).then(|| self.violation(field, "is required".to_string()))
            }
            Rule::Type(field, kind) => {
                let value = real(field.as_str())?;
                (!kind.matches(value))
                    .then(|| self.violation(field, format!("expected {}, got '{value}'", kind.name())))
            }
            Rule::Range { field, min, max } => {
                let value = real(field.as_str())?;
                match value.as_f64() {
                    Some(x) if within(x, *min, *max) => None,
                    Some(x) => Some(self.violation(
                        field,
                        format!("{x} is outside {}", describe_range(*min, *max)),
                    )),
                    None => Some(self.violation(field, format!("'{value}' is not numeric"))),
                }
            }
            Rule::OneOf { field, values } => {
                let value = real(field.as_str())?;
                let folded = fold(&value.to_string());
                (!values.iter().any(|v| fold(v) == folded)).then(|| {
                    self.violation(field, format!("'{value}' is not one of {}", values.join(", ")))
                })
            }
            Rule::Pattern { field, regex } => {
                let value = real(field.as_str())?;
                let text = value.to_string();
                (!regex.is_match(&text))
                    .then(|| self.violation(field, format!("'{text}' does not match {}", regex.as_str())))
            }
            Rule::DateOrder { earlier, later } => {
                let start = real(earlier.as_str()).and_then(PropertyValue::as_str).and_then(parse_date)?;
                let end = real(later.as_str()).and_then(PropertyValue::as_str).and_then(parse_date)?;
                (start > end).then(|| {
                    self.violation(earlier, format!("{earlier} {start} is after {later} {end}"))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, PropertyValue)]) -> Properties {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_required() {
        let rule = Rule::required("title");
        assert!(rule.check(&props(&[("title", "Aspirin".into())])).is_none());
        assert!(rule.check(&props(&[("title", " ".into())])).is_some());
        assert!(rule.check(&props(&[("title", PropertyValue::Null)])).is_some());
        assert!(rule.check(&Properties::new()).is_some());
    }

    #[test]
    fn test_range_bounds() {
        let rule = Rule::range("molecular_weight", Bound::Excluded(0.0), Bound::Included(5000.0));
        assert!(rule.check(&props(&[("molecular_weight", 5000.0.into())])).is_none());
        assert!(rule.check(&props(&[("molecular_weight", 0.0.into())])).is_some());
        assert!(rule.check(&props(&[("molecular_weight", PropertyValue::Int(-3))])).is_some());
        let v = rule
            .check(&props(&[("molecular_weight", "heavy".into())]))
            .expect("text is not numeric");
        assert_eq!(v.rule, "range");
        // Absent values are not this rule's concern.
        assert!(rule.check(&Properties::new()).is_none());
    }

    #[test]
    fn test_one_of_folds_case_and_separators() {
        let rule = Rule::one_of("phase", &["PHASE1", "PHASE2"]);
        assert!(rule.check(&props(&[("phase", "Phase 1".into())])).is_none());
        assert!(rule.check(&props(&[("phase", "phase_2".into())])).is_none());
        assert!(rule.check(&props(&[("phase", "Phase 9".into())])).is_some());
        assert!(rule.check(&props(&[("phase", "Unknown".into())])).is_none());
    }

    #[test]
    fn test_pattern_and_type() {
        let rule = Rule::pattern("nct_id", r"^NCT\d{8}$");
        assert!(rule.check(&props(&[("nct_id", "NCT01234567".into())])).is_none());
        assert!(rule.check(&props(&[("nct_id", "NCT123".into())])).is_some());

        let rule = Rule::of_type("published_date", ValueKind::Date);
        assert!(rule.check(&props(&[("published_date", "2021-03-02".into())])).is_none());
        assert!(rule.check(&props(&[("published_date", "soon".into())])).is_some());
    }

    #[test]
    fn test_date_order() {
        let rule = Rule::date_order("start_date", "completion_date");
        let ok = props(&[("start_date", "2020-01-01".into()), ("completion_date", "2021-01-01".into())]);
        let bad = props(&[("start_date", "2022-01-01".into()), ("completion_date", "2021-01-01".into())]);
        let partial = props(&[("start_date", "2022-01-01".into())]);
        assert!(rule.check(&ok).is_none());
        assert_eq!(rule.check(&bad).map(|v| v.field), Some("start_date".to_string()));
        assert!(rule.check(&partial).is_none());
    }
}
