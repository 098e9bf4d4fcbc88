//! Model store error-message, atomic-write-safety, and listing integration tests.
//! Layout: ~/.permsync/model/<instance>.yaml

use assert_fs::prelude::*;
use permsync_core::{
    store,
    types::{InstanceId, InstancePermissions, PermissionEntry},
    StoreError,
};
use predicates::prelude::predicate;
use std::fs;

fn inst() -> InstanceId { InstanceId::from("emf-case-7") }

fn model_with(entries: &[(&str, &str)]) -> InstancePermissions {
    let mut model = InstancePermissions::empty(inst());
    model.entries = entries
        .iter()
        .map(|(authority, role)| PermissionEntry::new(*authority, *role))
        .collect();
    model
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_model_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = store::load_model_at(home.path(), &inst()).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("permission model not found"));
    assert!(err.to_string().contains("emf-case-7.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".permsync/model/emf-case-7.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = store::load_model_at(home.path(), &inst()).unwrap_err();
    assert!(matches!(err, StoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("emf-case-7.yaml"), "must contain file path, got: {err}");
}

#[test]
fn load_wrong_type_yaml_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".permsync/model/emf-case-7.yaml")
        .write_str("- this is a list, not a mapping\n")
        .expect("write");

    let err = store::load_model_at(home.path(), &inst()).unwrap_err();
    assert!(matches!(err, StoreError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_cleans_up_tmp_file_and_sets_mode() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    store::save_model_at(home.path(), &model_with(&[("admin", "manager")])).expect("save");

    home.child(".permsync/model/emf-case-7.yaml").assert(predicate::path::exists());
    home.child(".permsync/model/emf-case-7.yaml.tmp").assert(predicate::path::missing());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = store::model_path_at(home.path(), &inst());
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "expected 0600, got {mode:o}");
    }
}

#[test]
fn mid_write_crash_leaves_original_intact() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    store::save_model_at(home.path(), &model_with(&[("admin", "manager")])).expect("save");

    let path = store::model_path_at(home.path(), &inst());
    let original_bytes = fs::read(&path).expect("read original");

    // Simulate crash: .tmp written but process died before rename
    let tmp = path.with_file_name("emf-case-7.yaml.tmp");
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    assert_eq!(original_bytes, fs::read(&path).expect("read after crash"));
    let loaded = store::load_model_at(home.path(), &inst()).expect("load after crash");
    assert_eq!(loaded.entries, vec![PermissionEntry::new("admin", "manager")]);
}

#[test]
fn save_overwrites_previous_model() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    store::save_model_at(home.path(), &model_with(&[("admin", "manager")])).expect("first");
    store::save_model_at(home.path(), &model_with(&[("bob", "viewer")])).expect("second");

    let loaded = store::load_model_at(home.path(), &inst()).expect("load");
    assert_eq!(loaded.entries, vec![PermissionEntry::new("bob", "viewer")]);
}

// ---------------------------------------------------------------------------
// 3. Listing
// ---------------------------------------------------------------------------

#[test]
fn list_is_sorted_and_skips_non_yaml() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    for id in ["zeta", "alpha", "mid"] {
        let mut model = InstancePermissions::empty(InstanceId::from(id));
        model.entries.push(PermissionEntry::new("admin", "manager"));
        store::save_model_at(home.path(), &model).expect("save");
    }
    home.child(".permsync/model/notes.txt").write_str("ignore me").expect("write");

    let ids = store::list_instances_at(home.path()).expect("list");
    assert_eq!(
        ids,
        vec![InstanceId::from("alpha"), InstanceId::from("mid"), InstanceId::from("zeta")]
    );
}

#[test]
fn invalid_id_is_rejected_before_touching_disk() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let model = InstancePermissions::empty(InstanceId::from("../escape"));
    let err = store::save_model_at(home.path(), &model).unwrap_err();
    assert!(matches!(err, StoreError::InvalidInstanceId(_)), "got: {err}");
    home.child(".permsync").assert(predicate::path::missing());
}
