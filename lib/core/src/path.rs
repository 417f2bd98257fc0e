use crate::{Error, FieldValue, Result};
use serde_json::Value;
use smallvec::SmallVec;
use std::fmt;

/// A dot-separated path into a metadata header, e.g. `stats.scores.0`.
///
/// Numeric segments index into sequences; on a mapping they are ordinary
/// keys, so `years.2024` still works.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    raw: String,
    segments: SmallVec<[String; 4]>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidPath {
                path: raw.to_string(),
                reason: "path is empty".to_string(),
            });
        }

        let mut segments = SmallVec::new();
        for segment in trimmed.split('.') {
            if segment.is_empty() {
                return Err(Error::InvalidPath {
                    path: raw.to_string(),
                    reason: "empty path segment".to_string(),
                });
            }
            segments.push(segment.to_string());
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Walk `root` along this path
    pub fn resolve(&self, root: &Value) -> FieldValue {
        let mut current = root;
        for segment in &self.segments {
            let next = match current {
                Value::Object(map) => map.get(segment.as_str()),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| items.get(idx)),
                _ => None,
            };
            match next {
                Some(v) => current = v,
                None => return FieldValue::Missing,
            }
        }
        FieldValue::Present(current.clone())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
