// Field filters for a definition's `source.filter`
use crate::{Error, FieldPath, FieldValue, ParsedDocument, Result};
use serde_json::Value;

pub trait Filter {
    fn matches(&self, document: &ParsedDocument) -> bool;
}

#[derive(Debug, Clone)]
pub struct SourceFilter {
    condition: FilterCondition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    Equals { field: FieldPath, value: Value },
    NotEquals { field: FieldPath, value: Value },
    GreaterThan { field: FieldPath, value: f64 },
    LessThan { field: FieldPath, value: f64 },
    GreaterEqual { field: FieldPath, value: f64 },
    LessEqual { field: FieldPath, value: f64 },
    Contains { field: FieldPath, value: String },
    Exists { field: FieldPath, expected: bool },
    In { field: FieldPath, values: Vec<Value> },
    And(Vec<FilterCondition>),
    Or(Vec<FilterCondition>),
    Not(Box<FilterCondition>),
}

const OPERATORS: &[&str] = &["eq", "ne", "gt", "gte", "lt", "lte", "contains", "exists", "in"];

impl SourceFilter {
    pub fn new(condition: FilterCondition) -> Self {
        Self { condition }
    }

    /// Build from a config mapping of `path -> rule`.
    ///
    /// A rule is either a plain value (equality, or membership for a
    /// sequence-valued field) or a mapping of operators.
    pub fn from_config(config: &Value) -> Result<Self> {
        let rules = config.as_object().ok_or_else(|| Error::InvalidFilter {
            field: String::new(),
            reason: "filter must be a mapping of field paths to rules".to_string(),
        })?;

        let mut conditions = Vec::with_capacity(rules.len());
        for (path, rule) in rules {
            let field = FieldPath::parse(path).map_err(|e| Error::InvalidFilter {
                field: path.clone(),
                reason: e.to_string(),
            })?;
            conditions.extend(Self::parse_rule(field, rule)?);
        }

        Ok(Self::new(FilterCondition::And(conditions)))
    }

    fn parse_rule(field: FieldPath, rule: &Value) -> Result<Vec<FilterCondition>> {
        let ops = match rule.as_object() {
            Some(map) if !map.is_empty() && map.keys().all(|k| OPERATORS.contains(&k.as_str())) => map,
            _ => {
                return Ok(vec![FilterCondition::Equals {
                    field,
                    value: rule.clone(),
                }])
            }
        };

        let invalid = |field: &FieldPath, reason: String| Error::InvalidFilter {
            field: field.to_string(),
            reason,
        };
        let number = |op: &str, v: &Value| {
            v.as_f64()
                .ok_or_else(|| invalid(&field, format!("'{}' needs a number", op)))
        };

        let mut conditions = Vec::with_capacity(ops.len());
        for (op, operand) in ops {
            let condition = match op.as_str() {
                "eq" => FilterCondition::Equals { field: field.clone(), value: operand.clone() },
                "ne" => FilterCondition::NotEquals { field: field.clone(), value: operand.clone() },
                "gt" => FilterCondition::GreaterThan { field: field.clone(), value: number(op.as_str(), operand)? },
                "gte" => FilterCondition::GreaterEqual { field: field.clone(), value: number(op.as_str(), operand)? },
                "lt" => FilterCondition::LessThan { field: field.clone(), value: number(op.as_str(), operand)? },
                "lte" => FilterCondition::LessEqual { field: field.clone(), value: number(op.as_str(), operand)? },
                "contains" => FilterCondition::Contains {
                    field: field.clone(),
                    value: scalar_text(operand)
                        .ok_or_else(|| invalid(&field, "'contains' needs a scalar".to_string()))?,
                },
                "exists" => FilterCondition::Exists {
                    field: field.clone(),
                    expected: operand
                        .as_bool()
                        .ok_or_else(|| invalid(&field, "'exists' needs a boolean".to_string()))?,
                },
                "in" => FilterCondition::In {
                    field: field.clone(),
                    values: operand
                        .as_array()
                        .cloned()
                        .ok_or_else(|| invalid(&field, "'in' needs a sequence".to_string()))?,
                },
                other => return Err(invalid(&field, format!("unknown operator '{}'", other))),
            };
            conditions.push(condition);
        }
        Ok(conditions)
    }

    #[inline]
    #[must_use]
    pub fn condition(&self) -> &FilterCondition {
        &self.condition
    }

    fn numeric(document: &ParsedDocument, field: &FieldPath) -> Option<f64> {
        document.get(field).as_f64()
    }

    fn matches_condition(condition: &FilterCondition, document: &ParsedDocument) -> bool {
        match condition {
            FilterCondition::Equals { field, value } => match document.get(field) {
                FieldValue::Present(Value::Array(items)) if !value.is_array() => {
                    items.iter().any(|item| loose_eq(item, value))
                }
                FieldValue::Present(v) => loose_eq(&v, value),
                FieldValue::Missing => false,
            },
            FilterCondition::NotEquals { field, value } => !Self::matches_condition(
                &FilterCondition::Equals {
                    field: field.clone(),
                    value: value.clone(),
                },
                document,
            ),
            FilterCondition::GreaterThan { field, value } => {
                Self::numeric(document, field).map(|v| v > *value).unwrap_or(false)
            }
            FilterCondition::LessThan { field, value } => {
                Self::numeric(document, field).map(|v| v < *value).unwrap_or(false)
            }
            FilterCondition::GreaterEqual { field, value } => {
                Self::numeric(document, field).map(|v| v >= *value).unwrap_or(false)
            }
            FilterCondition::LessEqual { field, value } => {
                Self::numeric(document, field).map(|v| v <= *value).unwrap_or(false)
            }
            FilterCondition::Contains { field, value } => match document.get(field) {
                FieldValue::Present(Value::String(s)) => s.contains(value.as_str()),
                FieldValue::Present(Value::Array(items)) => items
                    .iter()
                    .filter_map(scalar_text)
                    .any(|item| item == *value),
                _ => false,
            },
            FilterCondition::Exists { field, expected } => {
                !document.get(field).is_absent() == *expected
            }
            FilterCondition::In { field, values } => match document.get(field) {
                FieldValue::Present(v) => values.iter().any(|candidate| loose_eq(&v, candidate)),
                FieldValue::Missing => false,
            },
            FilterCondition::And(conditions) => {
                conditions.iter().all(|c| Self::matches_condition(c, document))
            }
            FilterCondition::Or(conditions) => {
                conditions.iter().any(|c| Self::matches_condition(c, document))
            }
            FilterCondition::Not(condition) => !Self::matches_condition(condition, document),
        }
    }
}

impl Filter for SourceFilter {
    fn matches(&self, document: &ParsedDocument) -> bool {
        Self::matches_condition(&self.condition, document)
    }
}

/// Equality that treats `8` and `8.0` as the same number
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(metadata: Value) -> ParsedDocument {
        ParsedDocument::new("d", metadata)
    }

    #[test]
    fn test_plain_value_equality() {
        let filter = SourceFilter::from_config(&json!({"status": "done"})).unwrap();
        assert!(filter.matches(&doc(json!({"status": "done"}))));
        assert!(!filter.matches(&doc(json!({"status": "open"}))));
        assert!(!filter.matches(&doc(json!({}))));
    }

    #[test]
    fn test_membership_for_sequence_fields() {
        let filter = SourceFilter::from_config(&json!({"tags": "book"})).unwrap();
        assert!(filter.matches(&doc(json!({"tags": ["film", "book"]}))));
        assert!(!filter.matches(&doc(json!({"tags": ["film"]}))));
    }

    #[test]
    fn test_operators() {
        let filter = SourceFilter::from_config(&json!({
            "rating": {"gte": 5, "lt": 9},
            "title": {"contains": "Rust"},
            "draft": {"exists": false}
        }))
        .unwrap();

        assert!(filter.matches(&doc(json!({"rating": 5, "title": "Rust in Action"}))));
        assert!(filter.matches(&doc(json!({"rating": "8.5", "title": "Rustacean", "draft": null}))));
        assert!(!filter.matches(&doc(json!({"rating": 9, "title": "Rust"}))));
        assert!(!filter.matches(&doc(json!({"rating": 6, "title": "Go"}))));
        assert!(!filter.matches(&doc(json!({"rating": 6, "title": "Rust", "draft": true}))));
    }

    #[test]
    fn test_in_and_ne() {
        let filter = SourceFilter::from_config(&json!({
            "status": {"in": ["done", "archived"]},
            "owner": {"ne": "bot"}
        }))
        .unwrap();
        assert!(filter.matches(&doc(json!({"status": "done", "owner": "ada"}))));
        assert!(filter.matches(&doc(json!({"status": "archived"}))));
        assert!(!filter.matches(&doc(json!({"status": "done", "owner": "bot"}))));
        assert!(!filter.matches(&doc(json!({"status": "open"}))));
    }

    #[test]
    fn test_numeric_equality_is_loose() {
        let filter = SourceFilter::from_config(&json!({"rating": 8.0})).unwrap();
        assert!(filter.matches(&doc(json!({"rating": 8}))));
    }

    #[test]
    fn test_invalid_config() {
        assert!(SourceFilter::from_config(&json!(["a"])).is_err());
        assert!(SourceFilter::from_config(&json!({"rating": {"gt": "high"}})).is_err());
        assert!(SourceFilter::from_config(&json!({"a..b": 1})).is_err());
    }

    #[test]
    fn test_mapping_without_operators_is_equality() {
        let filter = SourceFilter::from_config(&json!({"meta": {"kind": "book"}})).unwrap();
        assert!(filter.matches(&doc(json!({"meta": {"kind": "book"}}))));
    }

    #[test]
    fn test_not_and_or() {
        let a = FilterCondition::Equals { field: FieldPath::parse("a").unwrap(), value: json!(1) };
        let b = FilterCondition::Equals { field: FieldPath::parse("b").unwrap(), value: json!(2) };
        let filter = SourceFilter::new(FilterCondition::Or(vec![
            a.clone(),
            FilterCondition::Not(Box::new(b)),
        ]));
        assert!(filter.matches(&doc(json!({"a": 1, "b": 2}))));
        assert!(filter.matches(&doc(json!({"a": 0, "b": 3}))));
        assert!(!filter.matches(&doc(json!({"a": 0, "b": 2}))));
    }
}
