//! Error types for pharmagraph.
//!
//! Per-record errors ([`ExtractionError::Malformed`], [`TransformError`],
//! quality violations, exhausted batch retries) are captured into the run
//! report by the stage that produced them. Only stage-level setup failures
//! surface as [`PipelineError`].

use std::fmt;

/// Alias for Results returning [`PipelineError`].
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Top-level error type for pharmagraph.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Strict mode abort: {0}")]
    Strict(String),
}

/// Errors raised at the source boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    /// The source cannot be read at all. Fatal to the run.
    #[error("source '{source_name}' is unreadable: {reason}")]
    Unreadable { source_name: String, reason: String },

    /// One record could not be decoded. Recorded and skipped.
    #[error("malformed record {record}: {reason}")]
    Malformed { record: String, reason: String },
}

impl ExtractionError {
    /// Whether this error prevents the whole source from being read.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExtractionError::Unreadable { .. })
    }
}

/// Why a record could not produce a valid staged node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransformErrorKind {
    MissingRequiredField,
    MalformedValue,
}

impl fmt::Display for TransformErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformErrorKind::MissingRequiredField => f.write_str("missing required field"),
            TransformErrorKind::MalformedValue => f.write_str("malformed value"),
        }
    }
}

/// Per-record transformation failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} '{field}': {detail}")]
pub struct TransformError {
    pub kind: TransformErrorKind,
    pub field: String,
    pub detail: String,
}

impl TransformError {
    pub fn missing(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            kind: TransformErrorKind::MissingRequiredField,
            detail: format!("'{field}' is absent or empty"),
            field,
        }
    }

    pub fn malformed(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: TransformErrorKind::MalformedValue,
            field: field.into(),
            detail: detail.into(),
        }
    }
}

/// Graph store failures, split by whether a retry can help.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Connection reset, leader switch, deadlock and similar.
    #[error("transient store error during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("{operation} timed out after {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },

    /// Constraint violation, e.g. a canonical ID already bound to another fingerprint.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Authentication, schema or malformed query errors.
    #[error("fatal store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Transient errors are retried by the loader; everything else fails the batch at once.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. } | StoreError::Timeout { .. })
    }
}
