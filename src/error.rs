//! Error types for the export engine and the server registry config.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a whole sync run.
///
/// All of these are raised before the first artifact is written, so a failed
/// run never leaves the output directory half-updated.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The cache file is missing, unreadable, or not in the expected shape.
    #[error("cache unreadable at {path}: {reason}")]
    CacheUnreadable { path: PathBuf, reason: String },

    /// The output directory could not be created or written to.
    #[error("output directory not writable at {path}: {source}")]
    OutputDirUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub(crate) fn cache(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        SyncError::CacheUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Why a single record was skipped. Never fatal for the run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The record could not be decoded from the cache at all.
    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid timestamp in `{field}`: {value:?}")]
    BadTimestamp { field: &'static str, value: String },

    #[error("failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Errors from editing the shared server registry config.
#[derive(Debug, Error)]
pub enum ServerConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The existing file is not a JSON object; it is left untouched.
    #[error("config at {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
