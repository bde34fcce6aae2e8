//! Error types for Newsdesk.
//!
//! Two layers live here:
//! - [`NewsdeskError`]: run-level failures (configuration, I/O, cache, synthesis).
//!   Library crates use it via `thiserror`; the CLI wraps it with `color-eyre`.
//! - [`StageError`] / [`ErrorKind`]: the per-stage failure vocabulary that every
//!   fetch/transform capability reports. These never abort a run; they become
//!   data in a source's record.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all Newsdesk operations.
#[derive(Debug, thiserror::Error)]
pub enum NewsdeskError {
    /// Configuration loading or validation error. Fatal to the whole run.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside of a pipeline stage (e.g. client construction).
    #[error("network error: {0}")]
    Network(String),

    /// Content cache error.
    #[error("cache error: {0}")]
    Cache(String),

    /// LLM client error outside of a pipeline stage.
    #[error("llm error: {0}")]
    Llm(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad URL, malformed record, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Serialization or format conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// The final synthesis capability failed.
    #[error("synthesis failed: {0}")]
    Synthesis(#[from] StageError),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NewsdeskError>;

impl NewsdeskError {
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

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage errors
// ---------------------------------------------------------------------------

/// Classification of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Connection reset, DNS hiccup, 5xx.
    TransientNetwork,
    /// HTTP 429 or provider quota exhaustion.
    RateLimited,
    /// Blocked, 4xx, or otherwise not worth retrying.
    PermanentFetch,
    /// Output did not parse into the expected structure.
    MalformedResponse,
    /// A single attempt exceeded its deadline.
    Timeout,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        Self::TransientNetwork,
        Self::RateLimited,
        Self::PermanentFetch,
        Self::MalformedResponse,
        Self::Timeout,
    ];

    /// Whether this kind is in the default retry set.
    pub fn is_retriable_by_default(self) -> bool {
        matches!(
            self,
            Self::TransientNetwork | Self::RateLimited | Self::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientNetwork => "TransientNetwork",
            Self::RateLimited => "RateLimited",
            Self::PermanentFetch => "PermanentFetch",
            Self::MalformedResponse => "MalformedResponse",
            Self::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a fetch, transform, or synthesis capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientNetwork, msg)
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, msg)
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermanentFetch, msg)
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, msg)
    }

    /// Classify a non-success HTTP status.
    ///
    /// 429 → rate limited; 408 and 5xx → transient; anything else → permanent.
    pub fn from_status(status: u16, context: impl fmt::Display) -> Self {
        let kind = match status {
            429 => ErrorKind::RateLimited,
            408 | 500..=599 => ErrorKind::TransientNetwork,
            _ => ErrorKind::PermanentFetch,
        };
        Self::new(kind, format!("{context}: HTTP {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = NewsdeskError::config("no sources configured");
        assert_eq!(err.to_string(), "config error: no sources configured");

        let err = NewsdeskError::from(StageError::rate_limited("quota"));
        assert_eq!(err.to_string(), "synthesis failed: RateLimited: quota");
    }

    #[test]
    fn default_retry_set() {
        let retriable: Vec<_> = ErrorKind::ALL
            .into_iter()
            .filter(|k| k.is_retriable_by_default())
            .collect();
        assert_eq!(
            retriable,
            vec![
                ErrorKind::TransientNetwork,
                ErrorKind::RateLimited,
                ErrorKind::Timeout
            ]
        );
    }

    #[test]
    fn status_classification() {
        assert_eq!(StageError::from_status(429, "x").kind, ErrorKind::RateLimited);
        assert_eq!(StageError::from_status(503, "x").kind, ErrorKind::TransientNetwork);
        assert_eq!(StageError::from_status(408, "x").kind, ErrorKind::TransientNetwork);
        assert_eq!(StageError::from_status(403, "x").kind, ErrorKind::PermanentFetch);
        assert_eq!(StageError::from_status(404, "x").kind, ErrorKind::PermanentFetch);
        assert!(StageError::from_status(404, "https://a.test").message.contains("HTTP 404"));
    }
}
