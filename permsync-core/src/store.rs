//! Authoritative permission model, one YAML file per instance.
//!
//! # Storage layout
//!
//! ```text
//! ~/.permsync/
//!   model/
//!     <instance>.yaml   (mode 0600, directory 0700)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::StoreError;
use crate::types::{InstanceId, InstancePermissions};

/// Name of the per-user state directory under `$HOME`.
pub const PERMSYNC_DIR: &str = ".permsync";

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.permsync/`
pub fn permsync_root(home: &Path) -> PathBuf {
    home.join(PERMSYNC_DIR)
}

/// `<home>/.permsync/model/`
pub fn model_dir_at(home: &Path) -> PathBuf {
    permsync_root(home).join("model")
}

/// `<home>/.permsync/model/<instance>.yaml`, no I/O.
pub fn model_path_at(home: &Path, instance: &InstanceId) -> PathBuf {
    model_dir_at(home).join(format!("{}.yaml", instance.0))
}

/// Reject ids that cannot safely become a single file name.
pub fn validate_instance_id(instance: &InstanceId) -> Result<(), StoreError> {
    let raw = instance.0.as_str();
    let invalid = raw.trim().is_empty()
        || raw == "."
        || raw == ".."
        || raw.contains('/')
        || raw.contains('\\')
        || raw.contains('\0');
    if invalid {
        return Err(StoreError::InvalidInstanceId(raw.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load the model of one instance.
///
/// Returns `StoreError::NotFound` if absent, `StoreError::Parse` if malformed.
pub fn load_model_at(
    home: &Path,
    instance: &InstanceId,
) -> Result<InstancePermissions, StoreError> {
    validate_instance_id(instance)?;
    let path = model_path_at(home, instance);
    if !path.exists() {
        return Err(StoreError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })
}

/// `load_model_at` convenience wrapper.
pub fn load_model(instance: &InstanceId) -> Result<InstancePermissions, StoreError> {
    load_model_at(&home()?, instance)
}

/// Like [`load_model_at`], but a missing model means "no permissions".
pub fn load_model_or_empty_at(
    home: &Path,
    instance: &InstanceId,
) -> Result<InstancePermissions, StoreError> {
    match load_model_at(home, instance) {
        Err(StoreError::NotFound { .. }) => Ok(InstancePermissions::empty(instance.clone())),
        other => other,
    }
}

/// List every instance with a model file, sorted by id.
pub fn list_instances_at(home: &Path) -> Result<Vec<InstanceId>, StoreError> {
    let dir = model_dir_at(home);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut ids: Vec<InstanceId> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.strip_suffix(".yaml").map(InstanceId::from)
        })
        .collect();
    ids.sort();
    Ok(ids)
}

/// `list_instances_at` convenience wrapper.
pub fn list_instances() -> Result<Vec<InstanceId>, StoreError> {
    list_instances_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the model of one instance.
///
/// Write flow: normalize → serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_model_at(home: &Path, model: &InstancePermissions) -> Result<(), StoreError> {
    validate_instance_id(&model.instance)?;
    ensure_model_dir(home)?;

    let mut model = model.clone();
    model.normalize();
    model.updated_at = Utc::now();

    let path = model_path_at(home, &model.instance);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", model.instance.0));

    let yaml = serde_yaml::to_string(&model)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_model_at` convenience wrapper.
pub fn save_model(model: &InstancePermissions) -> Result<(), StoreError> {
    save_model_at(&home()?, model)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

fn ensure_model_dir(home: &Path) -> Result<(), StoreError> {
    let dir = model_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
