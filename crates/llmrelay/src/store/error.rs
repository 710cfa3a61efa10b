//! Error types for configuration persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or saving persisted configuration.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O error while reading, writing or creating directories.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but does not contain a valid route list.
    #[error("malformed configuration at {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The in-memory routes could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
}

impl PersistenceError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a malformed-file error with path context.
    pub fn malformed(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Malformed {
            path: path.into(),
            source,
        }
    }
}

/// Convenience type alias for persistence results.
pub type PersistenceResult<T> = Result<T, PersistenceError>;
