use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExprError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Syntax error at offset {position}: {message}")]
    Syntax { message: String, position: usize },

    /// Rejected before execution
    #[error("Security violation: {0}")]
    Security(SecurityViolation),

    #[error("Evaluation timed out after {limit:?}")]
    Timeout { limit: Duration },

    #[error("Evaluation error: {0}")]
    Evaluation(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityViolation {
    #[error("forbidden identifier '{0}'")]
    ForbiddenIdentifier(String),

    #[error("forbidden construct '{0}'")]
    ForbiddenConstruct(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("unbound identifier '{0}'")]
    UnboundIdentifier(String),

    #[error("expression is {len} bytes, the limit is {max}")]
    TooLong { len: usize, max: usize },

    #[error("expression nests deeper than {max} levels")]
    TooDeep { max: usize },
}

impl ExprError {
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExprError::Timeout { .. })
    }

    #[inline]
    #[must_use]
    pub fn is_security(&self) -> bool {
        matches!(self, ExprError::Security(_))
    }

    #[inline]
    #[must_use]
    pub fn is_syntax(&self) -> bool {
        matches!(self, ExprError::Syntax { .. })
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        ExprError::Evaluation(message.into())
    }
}

impl From<SecurityViolation> for ExprError {
    fn from(violation: SecurityViolation) -> Self {
        ExprError::Security(violation)
    }
}
