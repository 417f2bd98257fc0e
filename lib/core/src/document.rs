use crate::{Error, FieldPath, FieldValue, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A source document: its collection-relative id and raw text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: String,
}

impl Document {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
        }
    }

    /// Parse the metadata header with the default extractor
    pub fn parse(&self) -> Result<ParsedDocument> {
        FrontmatterExtractor.parse(self)
    }
}

/// A document whose metadata header has been parsed once and can be
/// queried for any number of paths.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub id: String,
    pub metadata: Value,
}

impl ParsedDocument {
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, metadata: Value) -> Self {
        Self {
            id: id.into(),
            metadata,
        }
    }

    #[inline]
    pub fn get(&self, path: &FieldPath) -> FieldValue {
        path.resolve(&self.metadata)
    }

    /// Batch extraction from the single parse pass
    pub fn get_many(&self, paths: &[FieldPath]) -> Vec<FieldValue> {
        paths.iter().map(|p| p.resolve(&self.metadata)).collect()
    }
}

/// Turns raw document text into queryable metadata.
///
/// The byte-level document format belongs to the embedding application;
/// implement this to plug in a different one.
pub trait FieldExtractor: Send + Sync {
    fn parse(&self, document: &Document) -> Result<ParsedDocument>;
}

/// Default extractor: a `---` fenced YAML header, or the whole text as a
/// YAML/JSON mapping when there is no fence.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontmatterExtractor;

impl FieldExtractor for FrontmatterExtractor {
    fn parse(&self, document: &Document) -> Result<ParsedDocument> {
        let header = split_header(&document.id, &document.source)?;
        let metadata = parse_header(&document.id, header)?;
        Ok(ParsedDocument::new(document.id.clone(), metadata))
    }
}

/// Parse `document` and read one path
pub fn extract(document: &Document, path: &str) -> Result<FieldValue> {
    let path = FieldPath::parse(path)?;
    Ok(document.parse()?.get(&path))
}

fn split_header<'a>(id: &str, source: &'a str) -> Result<&'a str> {
    let text = source.strip_prefix('\u{feff}').unwrap_or(source);
    let mut lines = text.split_inclusive('\n');

    match lines.next() {
        Some(first) if first.trim_end() == "---" => {
            let start = first.len();
            let mut offset = start;
            for line in lines {
                let trimmed = line.trim_end();
                if trimmed == "---" || trimmed == "..." {
                    return Ok(&text[start..offset]);
                }
                offset += line.len();
            }
            Err(Error::MalformedDocument {
                id: id.to_string(),
                reason: "unterminated metadata header".to_string(),
            })
        }
        _ => Ok(text),
    }
}

fn parse_header(id: &str, header: &str) -> Result<Value> {
    if header.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    let value: Value = serde_yaml::from_str(header).map_err(|e| Error::MalformedDocument {
        id: id.to_string(),
        reason: e.to_string(),
    })?;

    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Ok(Value::Object(Map::new())),
        other => Err(Error::MalformedDocument {
            id: id.to_string(),
            reason: format!("metadata header must be a mapping, found {}", kind_name(&other)),
        }),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frontmatter_header() {
        let doc = Document::new(
            "notes/a.md",
            "---\nrating: 8\ntags: [x, y]\n---\n# Body\n\nrating: 99\n",
        );
        let parsed = doc.parse().unwrap();
        assert_eq!(parsed.metadata, json!({"rating": 8, "tags": ["x", "y"]}));
    }

    #[test]
    fn test_whole_text_json() {
        let doc = Document::new("a.json", r#"{"rating": 6, "nested": {"k": [1, 2]}}"#);
        assert_eq!(
            extract(&doc, "nested.k.1").unwrap(),
            FieldValue::Present(json!(2))
        );
    }

    #[test]
    fn test_empty_header_has_no_fields() {
        let doc = Document::new("a.md", "---\n---\nbody");
        assert_eq!(extract(&doc, "rating").unwrap(), FieldValue::Missing);

        let doc = Document::new("b.md", "   \n");
        assert_eq!(extract(&doc, "rating").unwrap(), FieldValue::Missing);
    }

    #[test]
    fn test_malformed_is_error_not_missing() {
        let doc = Document::new("bad.md", "---\nrating: [1, 2\n---\n");
        let err = doc.parse().unwrap_err();
        assert!(err.is_extraction());

        let unterminated = Document::new("open.md", "---\nrating: 1\n");
        assert!(unterminated.parse().is_err());

        let scalar = Document::new("scalar.md", "just some words");
        assert!(scalar.parse().is_err());
    }

    #[test]
    fn test_batch_extraction() {
        let doc = Document::new("a.md", "---\na: 1\nb: {c: 2}\n---\n");
        let parsed = doc.parse().unwrap();
        let paths = vec![
            FieldPath::parse("a").unwrap(),
            FieldPath::parse("b.c").unwrap(),
            FieldPath::parse("z").unwrap(),
        ];
        assert_eq!(
            parsed.get_many(&paths),
            vec![
                FieldValue::Present(json!(1)),
                FieldValue::Present(json!(2)),
                FieldValue::Missing,
            ]
        );
    }
}
