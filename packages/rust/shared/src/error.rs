//! Error types for the provider directory pipeline.
//!
//! Library crates use [`ProvDirError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why an external collaborator rejected a request for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermanentKind {
    /// The collaborator has no record matching the request.
    NotFound,
    /// The request itself was malformed (bad phone format, empty license, ...).
    InvalidInput,
    /// The collaborator refused the request (auth, quota exhausted, 4xx).
    Rejected,
}

impl std::fmt::Display for PermanentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NotFound => "not found",
            Self::InvalidInput => "invalid input",
            Self::Rejected => "rejected",
        })
    }
}

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum ProvDirError {
    /// Configuration loading or validation error. Fatal before processing.
    #[error("config error: {message}")]
    Config { message: String },

    /// Retryable collaborator failure (network, rate limit, 5xx).
    #[error("transient error from {service}: {message}")]
    TransientExternal { service: String, message: String },

    /// Non-retryable collaborator failure.
    #[error("{service} {kind}: {message}")]
    PermanentExternal {
        service: String,
        kind: PermanentKind,
        message: String,
    },

    /// A record's run exceeded its time budget.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Programming error; should never occur in correct operation.
    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },

    /// Database or result-store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Export serialization error.
    #[error("export error: {0}")]
    Export(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input data validation error (unparseable input file, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ProvDirError>;

impl ProvDirError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an invariant violation from any displayable message.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: msg.into(),
        }
    }

    /// Create a transient collaborator error.
    pub fn transient(service: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TransientExternal {
            service: service.into(),
            message: msg.into(),
        }
    }

    /// Create a permanent collaborator error.
    pub fn permanent(
        service: impl Into<String>,
        kind: PermanentKind,
        msg: impl Into<String>,
    ) -> Self {
        Self::PermanentExternal {
            service: service.into(),
            kind,
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the retry policy may try the failed call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientExternal { .. })
    }
}
