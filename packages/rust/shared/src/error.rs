//! Error types for bulletin.
//!
//! Library crates use [`BulletinError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all bulletin operations.
#[derive(Debug, thiserror::Error)]
pub enum BulletinError {
    /// Configuration loading error or a missing credential.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the feed, completion, or mail service.
    #[error("network error: {0}")]
    Network(String),

    /// An outbound call exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The news feed could not be read as RSS.
    #[error("feed error: {0}")]
    Feed(String),

    /// The completion service answered, but not with a usable reply.
    #[error("completion error: {0}")]
    Completion(String),

    /// The mail service rejected or failed the delivery.
    #[error("mail error: {0}")]
    Mail(String),

    /// Malformed text that could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A record is missing a required field or holds an invalid value.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BulletinError>;

impl BulletinError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
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

    /// Whether the error came from reaching (or failing to reach) a remote service.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::Feed(_) | Self::Mail(_)
        )
    }
}
