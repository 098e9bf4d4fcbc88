use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::ErrorCode;

/// Error surface for the daemon runtime and its socket client.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Store(#[from] permsync_core::StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] permsync_sync::SyncError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    /// The daemon answered with `ok: false`.
    #[error("{message}")]
    Remote { code: ErrorCode, message: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
