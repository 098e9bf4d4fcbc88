//! Materialized state: what was last applied for each instance.
//!
//! Persists a [`MaterializedState`] JSON document at
//! `<home>/.permsync/materialized/<instance>.json`.
//! Writes go to a uniquely named temp file in the same directory, then rename
//! over the target, so concurrent writers for one instance never share a temp path.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use permsync_core::store::{permsync_root, validate_instance_id};
use permsync_core::types::{InstanceId, InstancePermissions, PermissionEntry};

use crate::error::{io_err, json_err, SyncError};

/// On-disk materialized state of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializedState {
    pub instance: InstanceId,
    pub applied_at: DateTime<Utc>,
    /// SHA-256 of [`render`] over `entries`.
    pub digest: String,
    pub entries: Vec<PermissionEntry>,
}

impl MaterializedState {
    /// State that materializes `model` exactly, stamped now.
    pub fn from_model(model: &InstancePermissions) -> Self {
        let mut entries = model.entries.clone();
        entries.sort();
        entries.dedup();
        Self {
            instance: model.instance.clone(),
            applied_at: Utc::now(),
            digest: digest(&entries),
            entries,
        }
    }
}

/// Canonical text form of a permission set: one sorted `authority=role` per line.
pub fn render(entries: &[PermissionEntry]) -> String {
    let mut lines: Vec<String> = entries.iter().map(ToString::to_string).collect();
    lines.sort();
    lines.dedup();
    let mut out = String::new();
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Hex SHA-256 of the canonical rendering.
pub fn digest(entries: &[PermissionEntry]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(render(entries).as_bytes());
    hex::encode(hasher.finalize())
}

/// `<home>/.permsync/materialized/`
pub fn state_dir_at(home: &Path) -> PathBuf {
    permsync_root(home).join("materialized")
}

/// `<home>/.permsync/materialized/<instance>.json`
pub fn state_path_at(home: &Path, instance: &InstanceId) -> PathBuf {
    state_dir_at(home).join(format!("{}.json", instance.0))
}

/// Load the materialized state of `instance`.
///
/// Returns `None` if nothing was ever applied.
pub fn load_at(home: &Path, instance: &InstanceId) -> Result<Option<MaterializedState>, SyncError> {
    validate_instance_id(instance)?;
    let path = state_path_at(home, instance);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(&path, err)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| json_err(&path, e))
}

/// Save the materialized state atomically.
///
/// Writes to a fresh `.<instance>.*.json.tmp` file, restricts it to 0600,
/// then renames it to `<path>`. The last rename wins.
pub fn save_at(home: &Path, state: &MaterializedState) -> Result<(), SyncError> {
    validate_instance_id(&state.instance)?;
    let dir = state_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_mode(&dir, 0o700)?;
    }

    let path = state_path_at(home, &state.instance);
    let json = serde_json::to_string_pretty(state).map_err(|e| json_err(&path, e))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", state.instance))
        .suffix(".json.tmp")
        .tempfile_in(&dir)
        .map_err(|e| io_err(&dir, e))?;
    tmp.write_all(json.as_bytes())
        .map_err(|e| io_err(tmp.path(), e))?;
    set_mode(tmp.path(), 0o600)?;
    // A failed persist drops the temp file, which removes it.
    tmp.persist(&path).map_err(|e| io_err(&path, e.error))?;
    Ok(())
}

/// Forget the materialized state of `instance`. Missing state is not an error.
pub fn remove_at(home: &Path, instance: &InstanceId) -> Result<bool, SyncError> {
    validate_instance_id(instance)?;
    let path = state_path_at(home, instance);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(&path, err)),
    }
}

/// Every instance with a materialized state, sorted by id.
pub fn list_at(home: &Path) -> Result<Vec<InstanceId>, SyncError> {
    let dir = state_dir_at(home);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(&dir, err)),
    };
    let mut ids: Vec<InstanceId> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.strip_suffix(".json").map(InstanceId::from)
        })
        .collect();
    ids.sort();
    Ok(ids)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), SyncError> {
    Ok(())
}
