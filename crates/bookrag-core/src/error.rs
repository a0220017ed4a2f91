//! Error types for the ingestion pipeline.
//!
//! One workspace-wide enum; helpers classify each variant into the
//! retryable / permanent / fatal buckets the orchestrator acts on.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("rate limited: {0}")]
    Throttled(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("url discovery failed: {0}")]
    Discovery(String),

    #[error("empty extraction for {0}")]
    EmptyExtraction(String),

    #[error("malformed content: {0}")]
    MalformedContent(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("collection schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure categories surfaced in the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    TransientNetwork,
    PermanentContent,
    Throttled,
    Fatal,
    Validation,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::TransientNetwork => "transient-network",
            FailureKind::PermanentContent => "permanent-content",
            FailureKind::Throttled => "provider-throttling",
            FailureKind::Fatal => "fatal",
            FailureKind::Validation => "validation-failure",
        };
        write!(f, "{s}")
    }
}

impl Error {
    /// Whether a retry with backoff can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Error::Status { status, .. } => *status >= 500,
            Error::Throttled(_) => true,
            _ => false,
        }
    }

    /// Whether the error threatens index integrity and must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Auth(_) | Error::SchemaMismatch(_) | Error::Config(_) | Error::Discovery(_)
        )
    }

    /// Category used for the final failure report.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Throttled(_) => FailureKind::Throttled,
            Error::Validation(_) => FailureKind::Validation,
            e if e.is_fatal() => FailureKind::Fatal,
            e if e.is_retryable() => FailureKind::TransientNetwork,
            _ => FailureKind::PermanentContent,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
