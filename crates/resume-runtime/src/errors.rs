//! Crate-wide error taxonomy.
//!
//! Every component-level error maps onto [`RetryClass`] so the queue layer
//! (see [`crate::jobs`]) can decide whether to retry, dead-letter, or fail
//! fast without re-deriving the policy at each call site.

use uuid::Uuid;

/// How a failure should be treated by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Network/timeout/5xx/storage-unavailable: retried with backoff.
    Transient,
    /// Unparseable input: terminal, does not count retries down further.
    InvalidInput,
    /// LLM returned non-JSON or failed coercion: terminal for this attempt,
    /// counts against `maxRetries`.
    FormatError,
    /// Business-rule conflict (e.g. email collision with differing name):
    /// terminal with an explicit message.
    Logical,
}

/// Top-level runtime error.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("storage conflict: {0}")]
    StorageConflict(String),

    #[error("llm unavailable: {0}")]
    LlmUnavailable(String),

    #[error("llm returned a response that could not be parsed: {0}")]
    LlmFormatError(String),

    #[error("file parse error: {0}")]
    ParseError(String),

    #[error("file too large: {0} bytes (max {1})")]
    FileTooLarge(u64, u64),

    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("candidate conflict: existing candidate name does not match within tolerance")]
    CandidateConflict,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Classify this error for the queue's retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            RuntimeError::StorageUnavailable(_)
            | RuntimeError::LlmUnavailable(_)
            | RuntimeError::Http(_)
            | RuntimeError::Database(_) => RetryClass::Transient,
            RuntimeError::LlmFormatError(_) | RuntimeError::Json(_) => RetryClass::FormatError,
            RuntimeError::CandidateConflict => RetryClass::Logical,
            RuntimeError::ParseError(_)
            | RuntimeError::FileTooLarge(_, _)
            | RuntimeError::UnsupportedExtension(_) => RetryClass::InvalidInput,
            RuntimeError::StorageConflict(_) => RetryClass::Logical,
            RuntimeError::JobNotFound(_) | RuntimeError::Config(_) | RuntimeError::Io(_) => {
                RetryClass::InvalidInput
            }
        }
    }

    /// Whether the queue should retry this job, per [`RetryClass`].
    pub fn is_retryable(&self) -> bool {
        matches!(self.retry_class(), RetryClass::Transient)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RuntimeError>;
