//! Error types for IntelGraph.
//!
//! Library crates use [`IntelError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::{JobId, JobStatus};

/// Top-level error type for all IntelGraph operations.
#[derive(Debug, thiserror::Error)]
pub enum IntelError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during fetch, handoff, or a remote store call.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Graph store or vector index error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Entity extraction or embedding error.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Seed resolution produced nothing usable.
    #[error("seed resolution failed: {0}")]
    Seeds(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (empty query, bad URL, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// No job with the given id is registered.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// The job already reached a terminal state.
    #[error("job {job_id} is already {status}")]
    AlreadyTerminal { job_id: JobId, status: JobStatus },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, IntelError>;

impl IntelError {
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

    /// Storage error from anything displayable (libsql, serde_json, ...).
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}
