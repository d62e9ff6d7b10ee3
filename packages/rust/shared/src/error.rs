//! Error types for docsteward.
//!
//! Library crates use [`DocstewardError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docsteward operations.
#[derive(Debug, thiserror::Error)]
pub enum DocstewardError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// HTTP error talking to the source provider or the LLM API.
    /// `status` is `None` for transport-level failures (timeouts, DNS, TLS).
    #[error("http error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Http {
        status: Option<u16>,
        message: String,
    },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// LLM response handling error (schema mismatch, missing payload).
    #[error("llm error: {0}")]
    Llm(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invalid slug, malformed pattern, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocstewardError>;

impl DocstewardError {
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

    /// Create an HTTP error carrying the response status, if one was received.
    pub fn http(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Http {
            status,
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

    /// Whether retrying this operation could plausibly succeed.
    ///
    /// Transport failures, 429 rate limits, and 5xx server errors are
    /// transient; auth and not-found responses are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status: None, .. } => true,
            Self::Http {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}
