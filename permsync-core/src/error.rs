//! Error types for permsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from model store and config operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// No model file exists for the requested instance.
    #[error("permission model not found at {path}")]
    NotFound { path: PathBuf },

    /// Instance ids become file names, so they must be plain path components.
    #[error("invalid instance id '{0}'")]
    InvalidInstanceId(String),
}
