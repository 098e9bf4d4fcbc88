use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use permsync_core::store::save_model_at;
use permsync_core::types::{InstanceId, InstancePermissions, PermissionEntry};
use permsync_sync::state_store::{self, MaterializedState};

fn permsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("permsync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1");
    cmd
}

fn model(id: &str, entries: &[(&str, &str)]) -> InstancePermissions {
    let mut model = InstancePermissions::empty(InstanceId::from(id));
    model.entries = entries
        .iter()
        .map(|(a, r)| PermissionEntry::new(*a, *r))
        .collect();
    model
}

fn apply(home: &Path, model: &InstancePermissions) {
    state_store::save_at(home, &MaterializedState::from_model(model)).expect("save state");
}

#[test]
fn diff_shows_added_and_removed_grants() {
    let home = TempDir::new().expect("home");
    let before = model("emf:1", &[("alice", "manager"), ("bob", "viewer")]);
    apply(home.path(), &before);
    save_model_at(
        home.path(),
        &model("emf:1", &[("alice", "manager"), ("carol", "editor")]),
    )
    .expect("save model");

    let assert = permsync_cmd(home.path())
        .args(["diff", "emf:1"])
        .assert()
        .success()
        .stdout(contains("a/emf:1"));
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");

    assert!(stdout.lines().any(|line| line == "+carol=editor"), "{stdout}");
    assert!(stdout.lines().any(|line| line == "-bob=viewer"), "{stdout}");
    assert!(
        !stdout
            .lines()
            .any(|line| (line.starts_with('+') || line.starts_with('-')) && line.contains("alice")),
        "unchanged grants must only appear as context"
    );
}

#[test]
fn diff_of_applied_instance_reports_no_differences() {
    let home = TempDir::new().expect("home");
    let m = model("emf:1", &[("alice", "manager")]);
    save_model_at(home.path(), &m).expect("save model");
    apply(home.path(), &m);

    permsync_cmd(home.path())
        .args(["diff", "emf:1"])
        .assert()
        .success()
        .stdout(contains("No differences for 'emf:1'."));
}

#[test]
fn diff_rejects_path_like_ids() {
    let home = TempDir::new().expect("home");
    permsync_cmd(home.path())
        .args(["diff", "../etc"])
        .assert()
        .failure()
        .stderr(contains("diff failed"));
}

#[test]
fn status_json_classifies_every_instance() {
    let home = TempDir::new().expect("home");

    let in_sync = model("a-in-sync", &[("alice", "manager")]);
    save_model_at(home.path(), &in_sync).expect("save");
    apply(home.path(), &in_sync);

    apply(home.path(), &model("b-drifted", &[("bob", "viewer")]));
    save_model_at(home.path(), &model("b-drifted", &[("bob", "editor")])).expect("save");

    save_model_at(home.path(), &model("c-never", &[("carol", "viewer")])).expect("save");

    apply(home.path(), &model("d-orphan", &[("dave", "viewer")]));

    let assert = permsync_cmd(home.path())
        .args(["status", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    let payload: serde_json::Value = serde_json::from_str(&stdout).expect("parse status json");

    let top_keys: BTreeSet<&str> = payload
        .as_object()
        .expect("status root object")
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(top_keys, BTreeSet::from(["summary", "instances"]));

    assert_eq!(payload["summary"]["instances"], 4);
    assert_eq!(payload["summary"]["in_sync"], 1);
    assert_eq!(payload["summary"]["needs_sync"], 3);

    let statuses: Vec<(&str, &str)> = payload["instances"]
        .as_array()
        .expect("instances array")
        .iter()
        .map(|row| {
            (
                row["instance"].as_str().expect("instance"),
                row["status"].as_str().expect("status"),
            )
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("a-in-sync", "in_sync"),
            ("b-drifted", "drifted"),
            ("c-never", "never_applied"),
            ("d-orphan", "orphaned"),
        ]
    );
    assert_eq!(payload["instances"][1]["detail"], "+bob=editor  -bob=viewer");
    assert_eq!(payload["instances"][2]["last_applied_age"], "never");
    assert!(payload["instances"][2]["applied_at"].is_null());
}

#[test]
fn status_table_filters_by_prefix() {
    let home = TempDir::new().expect("home");
    save_model_at(home.path(), &model("emf:1", &[("alice", "manager")])).expect("save");
    save_model_at(home.path(), &model("other", &[("bob", "viewer")])).expect("save");

    let assert = permsync_cmd(home.path())
        .args(["status", "--prefix", "emf:"])
        .assert()
        .success()
        .stdout(contains("1 instances | 1 need sync"))
        .stdout(contains("NEVER APPLIED"));
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    assert!(!stdout.contains("other"), "{stdout}");
}

#[test]
fn status_with_empty_home_reports_no_instances() {
    let home = TempDir::new().expect("home");
    permsync_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("No instances"));
}
