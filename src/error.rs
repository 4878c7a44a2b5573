//! Error types at the library boundary.
//!
//! Only `ScoringError` can end a scoring pass. Label and history errors are
//! recovered inside the pipeline and surface as warnings on the result.

use thiserror::Error;

/// Fatal errors raised before the pipeline leaves `TOKENIZED`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScoringError {
    /// Empty term, empty context collection, or a non-finite numeric input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Failure of a single labeling call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    /// Backend unreachable, rate-limited or otherwise unable to answer.
    #[error("label backend unavailable: {0}")]
    Unavailable(String),

    /// Backend answered but the payload failed schema validation.
    #[error("label response malformed: {0}")]
    Malformed(String),
}

/// Failure of the history collaborator.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),

    #[error("history io: {0}")]
    Io(#[from] std::io::Error),

    #[error("history serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of the feedback collaborator.
#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("invalid feedback: {0}")]
    Invalid(String),

    #[error("feedback store unavailable: {0}")]
    Unavailable(String),
}
