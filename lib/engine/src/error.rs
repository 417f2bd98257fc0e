use std::fmt;
use thiserror::Error;
use vaultlens_expr::ExprError;
use vaultlens_similarity::SimilarityError;

pub type Result<T> = std::result::Result<T, EngineError>;

/// One broken rule, located by a dotted path into the definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub rule: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            rule: rule.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.rule)
        } else {
            write!(f, "{}: {}", self.path, self.rule)
        }
    }
}

/// Every violation found in one definition
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid definition {} in {origin}: {}", display_name(.name), join(.violations))]
pub struct ConfigError {
    pub origin: String,
    pub name: Option<String>,
    pub violations: Vec<Violation>,
}

/// A definition whose fields depend on each other in a loop
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Definition '{definition}' has a dependency cycle: {}", .path.join(" -> "))]
pub struct CycleError {
    pub definition: String,
    /// The cycle, starting and ending on the same field
    pub path: Vec<String>,
}

/// Why a definition was excluded at load time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("Could not parse {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error(transparent)]
    Invalid(#[from] ConfigError),

    #[error(transparent)]
    Cycle(#[from] CycleError),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("Similarity widget '{widget}' needs a target document")]
    MissingTarget { widget: String },

    #[error("Target document '{target}' of widget '{widget}' is not in the document set")]
    TargetNotFound { widget: String, target: String },

    #[error("Could not read target document: {0}")]
    Extraction(#[from] vaultlens_core::Error),

    #[error("Field '{field}' failed: {source}")]
    Expression {
        field: String,
        #[source]
        source: ExprError,
    },

    #[error("Field '{field}' uses unknown aggregator '{name}'")]
    UnknownAggregator { field: String, name: String },

    #[error(transparent)]
    Similarity(#[from] SimilarityError),
}

impl EngineError {
    /// True when an expression ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Expression { source, .. } if source.is_timeout())
    }
}

fn display_name(name: &Option<String>) -> String {
    match name {
        Some(name) => format!("'{}'", name),
        None => "(unnamed)".to_string(),
    }
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_lists_every_violation() {
        let err = ConfigError {
            origin: "widgets.yaml".to_string(),
            name: Some("ratings".to_string()),
            violations: vec![
                Violation::new("type", "is required"),
                Violation::new("fields.avg.aggregate", "unknown aggregator 'mean'"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Invalid definition 'ratings' in widgets.yaml: type: is required; \
             fields.avg.aggregate: unknown aggregator 'mean'"
        );
    }

    #[test]
    fn test_cycle_error_message() {
        let err = CycleError {
            definition: "loop".to_string(),
            path: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "Definition 'loop' has a dependency cycle: a -> b -> a");
    }
}
