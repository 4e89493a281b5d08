//! Error types for shardex.
//!
//! Library code returns [`Result`] with the [`Error`] enum below. The read
//! path converts most of these into "not found" before they reach a caller;
//! the build path propagates them to the indexer runner.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The main error type for index build and storage operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors (open, read, write, rename)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A file whose header or layout is inconsistent with its size
    #[error("corrupt file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// Invalid configuration values
    #[error("Config error: {0}")]
    Config(String),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Object storage upload/download failures
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// A scheduled flush or merge pass failed
    #[error("Task error: {0}")]
    Task(String),

    /// Worker pool construction failures
    #[error("Thread pool error: {0}")]
    Pool(String),
}

impl Error {
    /// Create a corruption error for `path`.
    pub fn corrupt<S: Into<String>>(path: impl Into<PathBuf>, reason: S) -> Self {
        Error::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a task error.
    pub fn task<S: Into<String>>(msg: S) -> Self {
        Error::Task(msg.into())
    }

    /// True when the error describes a file that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Error::Pool(err.to_string())
    }
}

/// Result type alias for shardex operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(err.is_not_found());

        let err = Error::corrupt("/tmp/x.idx", "short header");
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("short header"));
    }
}
