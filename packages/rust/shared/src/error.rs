//! Error types for sitekb.
//!
//! Library crates use [`SiteKbError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::KbStatus;

/// Top-level error type for all sitekb operations.
#[derive(Debug, thiserror::Error)]
pub enum SiteKbError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during crawl or embedding calls.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Embedding generation error (API, response shape, dimension).
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Vector index provisioning, upsert, or search error.
    #[error("index error: {0}")]
    Index(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Rejected knowledge base lifecycle transition.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: KbStatus, to: KbStatus },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invalid URL, empty crawl, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SiteKbError>;

impl SiteKbError {
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
}
