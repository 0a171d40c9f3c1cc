use polars::prelude::PolarsError;

use crate::io::ValidationReport;

/// Errors raised by the loading, mapping and aggregation stages.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// A structurally matched identifier carried an invalid group or animal.
    #[error("Malformed identifier '{raw}': {reason}")]
    MalformedIdentifier { raw: String, reason: String },

    /// Dataset-level checks failed. The report carries every collected error.
    #[error("Structural validation failed: {0}")]
    StructuralValidation(ValidationReport),

    /// Nothing survived filtering, parsing or replicate detection.
    #[error("Empty result: {0}")]
    EmptyResult(String),

    /// Host configuration is inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A tissue or identifier pattern failed to compile.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex_lite::Error),

    #[error(transparent)]
    Polars(#[from] PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;

/// Row-level parse error kept in the parser cache, so it must be cheap to
/// clone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed identifier '{raw}': {reason}")]
    Malformed { raw: String, reason: String },
}

impl ParseError {
    pub(crate) fn malformed<S: Into<String>>(
        raw: &str,
        reason: S,
    ) -> Self {
        ParseError::Malformed {
            raw:    raw.to_owned(),
            reason: reason.into(),
        }
    }
}

impl From<ParseError> for FlowError {
    fn from(value: ParseError) -> Self {
        match value {
            ParseError::Malformed { raw, reason } => {
                FlowError::MalformedIdentifier { raw, reason }
            },
        }
    }
}
