use crate::{Error, Result};
use glob::{MatchOptions, Pattern};

/// Glob over document ids (`notes/**/*.md`).
///
/// `*` stays within one path segment, `**` crosses segments. An empty
/// pattern or a bare `*` selects every document.
#[derive(Debug, Clone)]
pub struct SourcePattern {
    raw: String,
    pattern: Option<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl SourcePattern {
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "*" || trimmed == "**" {
            return Ok(Self {
                raw: trimmed.to_string(),
                pattern: None,
            });
        }

        let pattern = Pattern::new(trimmed).map_err(|e| Error::InvalidPattern {
            pattern: raw.to_string(),
            reason: e.msg.to_string(),
        })?;

        Ok(Self {
            raw: trimmed.to_string(),
            pattern: Some(pattern),
        })
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[inline]
    #[must_use]
    pub fn matches_all(&self) -> bool {
        self.pattern.is_none()
    }

    pub fn matches(&self, id: &str) -> bool {
        match &self.pattern {
            Some(pattern) => pattern.matches_with(id, MATCH_OPTIONS),
            None => true,
        }
    }
}
