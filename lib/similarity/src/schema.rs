//! Dimension definitions
//!
//! A similarity definition is an ordered list of dimensions. Each names a
//! document field, a positive weight, and the comparator that scores two
//! values of that field.

use serde::{Deserialize, Serialize};
use std::fmt;
use vaultlens_core::FieldPath;

pub const SET_OVERLAP: &str = "set-overlap";
pub const PROXIMITY: &str = "proximity";
pub const COSINE: &str = "cosine";

/// One dimension of a similarity definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DimensionSpec {
    /// Dot-notation path into each document's metadata
    pub field: String,

    #[serde(default = "default_weight")]
    pub weight: f64,

    pub method: SimilarityMethod,

    /// Fixed proximity range; the observed range is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<f64>,
}

fn default_weight() -> f64 {
    1.0
}

impl DimensionSpec {
    pub fn new(field: impl Into<String>, weight: f64, method: SimilarityMethod) -> Self {
        Self {
            field: field.into(),
            weight,
            method,
            range: None,
        }
    }

    pub fn set_overlap(field: impl Into<String>, weight: f64) -> Self {
        Self::new(field, weight, SimilarityMethod::SetOverlap)
    }

    pub fn proximity(field: impl Into<String>, weight: f64) -> Self {
        Self::new(field, weight, SimilarityMethod::Proximity)
    }

    pub fn cosine(field: impl Into<String>, weight: f64) -> Self {
        Self::new(field, weight, SimilarityMethod::Cosine)
    }

    #[must_use]
    pub fn with_range(mut self, range: f64) -> Self {
        self.range = Some(range);
        self
    }

    /// Shape checks that do not depend on which comparators are registered
    pub fn validate(&self) -> Result<(), SimilarityError> {
        FieldPath::parse(&self.field).map_err(|e| SimilarityError::InvalidField {
            field: self.field.clone(),
            reason: e.to_string(),
        })?;

        if !self.weight.is_finite() || self.weight <= 0.0 {
            return Err(SimilarityError::InvalidWeight {
                field: self.field.clone(),
                weight: self.weight,
            });
        }

        if let Some(range) = self.range {
            if !range.is_finite() || range <= 0.0 {
                return Err(SimilarityError::InvalidRange {
                    field: self.field.clone(),
                    range,
                });
            }
        }

        Ok(())
    }
}

/// Comparator selector. Unrecognised names refer to registered custom
/// comparators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SimilarityMethod {
    SetOverlap,
    Proximity,
    Cosine,
    Custom(String),
}

impl SimilarityMethod {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            SimilarityMethod::SetOverlap => SET_OVERLAP,
            SimilarityMethod::Proximity => PROXIMITY,
            SimilarityMethod::Cosine => COSINE,
            SimilarityMethod::Custom(name) => name,
        }
    }
}

impl From<String> for SimilarityMethod {
    fn from(name: String) -> Self {
        match name.as_str() {
            SET_OVERLAP | "set_overlap" | "jaccard" => SimilarityMethod::SetOverlap,
            PROXIMITY => SimilarityMethod::Proximity,
            COSINE => SimilarityMethod::Cosine,
            _ => SimilarityMethod::Custom(name),
        }
    }
}

impl From<&str> for SimilarityMethod {
    fn from(name: &str) -> Self {
        SimilarityMethod::from(name.to_string())
    }
}

impl From<SimilarityMethod> for String {
    fn from(method: SimilarityMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for SimilarityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from dimension validation and scoring
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimilarityError {
    #[error("Unknown similarity method '{0}'")]
    UnknownMethod(String),

    #[error("Dimension '{field}' has invalid weight {weight}; weights must be positive")]
    InvalidWeight { field: String, weight: f64 },

    #[error("Dimension '{field}' has invalid range {range}; ranges must be positive")]
    InvalidRange { field: String, range: f64 },

    #[error("Dimension field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Comparator name '{name}' is reserved as an alias of '{builtin}'")]
    ReservedName { name: String, builtin: String },

    #[error("Item '{id}' has {actual} dimension values, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },
}
