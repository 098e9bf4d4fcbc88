//! Roundtrip serialisation tests for `permsync-core` types.
//!
//! Each `#[case]` is isolated; there is no shared state.

use chrono::Utc;
use permsync_core::types::{
    ApplyOutcome, ChangeRecord, ExecutionId, ExecutionSnapshot, ExecutionStatus, InstanceId,
    InstancePermissions, JobId, JobStatus, PermissionEntry, SyncScope,
};
use rstest::rstest;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn snapshot(status: ExecutionStatus, changes: Vec<ChangeRecord>) -> ExecutionSnapshot {
    ExecutionSnapshot {
        id: ExecutionId::from("exec-1"),
        scope: SyncScope::All,
        status,
        changes,
        cancel_requested: false,
        created_at: Utc::now(),
        finished_at: None,
        failure: None,
    }
}

fn unicode_model() -> InstancePermissions {
    InstancePermissions {
        instance: InstanceId::from("дело-事件-🚀"),
        entries: vec![PermissionEntry::new("GROUP_редакторы", "contributor & <owner>")],
        updated_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Parameterised roundtrip tests
// ---------------------------------------------------------------------------

#[rstest]
#[case("running_empty", snapshot(ExecutionStatus::Running, vec![]))]
#[case("done_with_changes", snapshot(ExecutionStatus::Done, vec![ChangeRecord::new("emf:1", "+admin=manager")]))]
#[case("cancelled", snapshot(ExecutionStatus::Cancelled, vec![]))]
fn snapshot_roundtrip(#[case] label: &str, #[case] snapshot: ExecutionSnapshot) {
    let yaml = serde_yaml::to_string(&snapshot)
        .unwrap_or_else(|e| panic!("[{label}] serialize failed: {e}"));
    let back: ExecutionSnapshot = serde_yaml::from_str(&yaml)
        .unwrap_or_else(|e| panic!("[{label}] deserialize failed: {e}"));
    assert_eq!(snapshot, back, "[{label}]");
}

#[rstest]
#[case(SyncScope::All)]
#[case(SyncScope::instances(["emf:1", "emf:2"]))]
#[case(SyncScope::instances(Vec::<String>::new()))]
fn scope_roundtrip(#[case] scope: SyncScope) {
    let yaml = serde_yaml::to_string(&scope).expect("serialize");
    let back: SyncScope = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(scope, back);
}

#[rstest]
#[case(JobStatus::Running { total: 3 })]
#[case(JobStatus::Completed { applied: 3 })]
#[case(JobStatus::Failed { message: "disk full".to_string() })]
fn job_status_roundtrip(#[case] status: JobStatus) {
    let yaml = serde_yaml::to_string(&status).expect("serialize");
    let back: JobStatus = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(status, back);
}

#[test]
fn apply_outcome_roundtrip() {
    for outcome in [ApplyOutcome::Dispatched(JobId::from("job-9")), ApplyOutcome::NoChanges] {
        let yaml = serde_yaml::to_string(&outcome).expect("serialize");
        let back: ApplyOutcome = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(outcome, back);
    }
}

#[test]
fn unicode_model_roundtrip() {
    let model = unicode_model();
    let yaml = serde_yaml::to_string(&model).expect("serialize");
    let back: InstancePermissions = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(model, back);
}
