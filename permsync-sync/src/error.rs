//! Error types for permsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use permsync_core::StoreError;

/// All errors that can arise from diffing, applying, or drift checks.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the authoritative model store.
    #[error("model store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Materialized state could not be read or written as JSON.
    #[error("materialized state JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The OS refused to start an apply worker thread.
    #[error("failed to start apply worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SyncError::Json`].
pub(crate) fn json_err(path: impl Into<PathBuf>, source: serde_json::Error) -> SyncError {
    SyncError::Json {
        path: path.into(),
        source,
    }
}
