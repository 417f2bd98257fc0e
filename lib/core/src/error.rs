use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The document's metadata header could not be parsed. Distinct from a
    /// missing field: extraction never fails for absent paths.
    #[error("Malformed document '{id}': {reason}")]
    MalformedDocument { id: String, reason: String },

    #[error("Invalid field path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid source pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid filter on '{field}': {reason}")]
    InvalidFilter { field: String, reason: String },
}

impl Error {
    /// True for errors caused by a bad source document rather than a bad definition
    #[inline]
    #[must_use]
    pub fn is_extraction(&self) -> bool {
        matches!(self, Error::MalformedDocument { .. })
    }
}
