//! Optional user configuration at `~/.permsync/config.yaml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{home, permsync_root};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermsyncConfig {
    /// Context lines around each hunk in change descriptions.
    #[serde(default = "default_diff_context_lines")]
    pub diff_context_lines: usize,
    /// Finished apply jobs remembered for status queries.
    #[serde(default = "default_job_history_limit")]
    pub job_history_limit: usize,
    /// Fallback `tracing` filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_diff_context_lines() -> usize {
    3
}

fn default_job_history_limit() -> usize {
    100
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for PermsyncConfig {
    fn default() -> Self {
        Self {
            diff_context_lines: default_diff_context_lines(),
            job_history_limit: default_job_history_limit(),
            log_filter: default_log_filter(),
        }
    }
}

/// `<home>/.permsync/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    permsync_root(home).join("config.yaml")
}

/// Load the config, falling back to defaults when the file is absent.
pub fn load_config_at(home: &Path) -> Result<PermsyncConfig, StoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(PermsyncConfig::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    if contents.trim().is_empty() {
        return Ok(PermsyncConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
}

/// `load_config_at` convenience wrapper.
pub fn load_config() -> Result<PermsyncConfig, StoreError> {
    load_config_at(&home()?)
}
