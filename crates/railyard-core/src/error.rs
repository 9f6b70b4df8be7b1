//! Error taxonomy for the Railyard indexing and search engine.
//!
//! Every fallible operation in this crate returns [`RailyardError`]. The variants
//! map onto the design's error taxonomy: callers match on the variant to decide
//! whether a failure is locally recoverable (`FileError`, `TableMissing`) or must
//! be surfaced to the caller.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias for Results in `railyard-core`.
pub type RailyardResult<T> = Result<T, RailyardError>;

/// The error taxonomy for Railyard's indexing and search subsystems.
#[derive(Debug, Error)]
pub enum RailyardError {
    /// An engine id failed the `^[A-Za-z0-9_-]+$` sanitization regex.
    ///
    /// Fatal and never retried; the operation refuses before touching the store.
    #[error("invalid engine identity {id:?}: must match ^[A-Za-z0-9_-]+$")]
    InvalidIdentity {
        /// The rejected identity string.
        id: String,
    },

    /// A repository query (diff, head commit, branch) failed.
    #[error("repository query failed: {message}")]
    RepoError {
        /// Description of what failed.
        message: String,
    },

    /// A store (Postgres) connection or query failure. The current
    /// transaction, if any, has already been rolled back by the caller.
    #[error("store error: {message}")]
    StoreError {
        /// Description of the failure.
        message: String,
    },

    /// A required environment variable or CLI argument is missing or invalid.
    /// Rejected at startup.
    #[error("configuration error: {message}")]
    ConfigError {
        /// Description of the missing/invalid configuration.
        message: String,
    },

    /// A specific source file could not be read at index time.
    ///
    /// Locally recoverable: the caller skips the file and continues; the
    /// processed-file count reflects successful reads only.
    #[error("failed to read file {path}: {message}")]
    FileError {
        /// Path of the unreadable file.
        path: PathBuf,
        /// Underlying I/O message.
        message: String,
    },

    /// The `overlay build` subprocess exited nonzero, timed out, or its
    /// stdout could not be parsed as the expected JSON report.
    #[error("subprocess error: {message}")]
    SubprocessError {
        /// Description of the failure.
        message: String,
    },

    /// In dispatcher mode, a configured main table does not exist yet.
    ///
    /// Locally recoverable: swallowed per-table so search remains available;
    /// an empty result from that shard is used.
    #[error("table missing: {table}")]
    TableMissing {
        /// Name of the missing table.
        table: String,
    },
}

impl RailyardError {
    /// Build a [`RailyardError::StoreError`] from any displayable source.
    pub fn store(source: impl std::fmt::Display) -> Self {
        Self::StoreError {
            message: source.to_string(),
        }
    }

    /// Build a [`RailyardError::RepoError`] from any displayable source.
    pub fn repo(source: impl std::fmt::Display) -> Self {
        Self::RepoError {
            message: source.to_string(),
        }
    }

    /// Build a [`RailyardError::ConfigError`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }
}

impl From<tokio_postgres::Error> for RailyardError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::store(err)
    }
}

impl From<deadpool_postgres::PoolError> for RailyardError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::store(err)
    }
}

impl From<rusqlite::Error> for RailyardError {
    fn from(err: rusqlite::Error) -> Self {
        Self::store(err)
    }
}

impl From<serde_json::Error> for RailyardError {
    fn from(err: serde_json::Error) -> Self {
        Self::SubprocessError {
            message: format!("json parse error: {err}"),
        }
    }
}
