//! End-to-end: the coordinator driving the file-backed collaborators.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use permsync_coordinator::SynchronizationCoordinator;
use permsync_core::store::save_model_at;
use permsync_core::types::{
    ApplyOutcome, InstanceId, InstancePermissions, JobStatus, PermissionEntry, SyncScope,
};
use permsync_sync::{drift, DriftSignal, MaterializingApplier, ModelDiffProducer};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn save(home: &Path, id: &str, entries: &[(&str, &str)]) {
    let mut model = InstancePermissions::empty(InstanceId::from(id));
    model.entries = entries
        .iter()
        .map(|(a, r)| PermissionEntry::new(*a, *r))
        .collect();
    save_model_at(home, &model).expect("save model");
}

fn coordinator(home: &Path) -> (SynchronizationCoordinator, MaterializingApplier) {
    let applier = MaterializingApplier::new(home, 10);
    let coordinator = SynchronizationCoordinator::new(
        Arc::new(ModelDiffProducer::new(home, 3)),
        Arc::new(applier.clone()),
    );
    (coordinator, applier)
}

#[tokio::test]
async fn confirmed_check_materializes_models_and_next_check_is_clean() {
    init_logging();
    let home = TempDir::new().expect("home");
    save(home.path(), "emf:1", &[("alice", "manager")]);
    save(home.path(), "emf:2", &[("bob", "viewer"), ("carol", "editor")]);
    let (coordinator, applier) = coordinator(home.path());

    coordinator.trigger_check(SyncScope::All).await.expect("trigger");
    let subjects = coordinator.wait_for_completion().await.expect("wait");
    assert_eq!(subjects, vec![InstanceId::from("emf:1"), InstanceId::from("emf:2")]);

    let info = coordinator.current().await.expect("info");
    assert!(info.changes[1].description.contains("+carol=editor"));

    let job = match coordinator.confirm().await.expect("confirm") {
        ApplyOutcome::Dispatched(job) => job,
        other => panic!("expected a dispatched job, got {other:?}"),
    };
    let status = tokio::task::spawn_blocking({
        let jobs = applier.jobs().clone();
        let job = job.clone();
        move || jobs.wait_finished(&job, WAIT)
    })
    .await
    .expect("join");
    assert_eq!(status, Some(JobStatus::Completed { applied: 2 }));

    for id in ["emf:1", "emf:2"] {
        let report = drift::check(home.path(), &InstanceId::from(id)).expect("drift");
        assert_eq!(report.signal, DriftSignal::InSync, "{id}");
    }

    coordinator.trigger_check(SyncScope::All).await.expect("second trigger");
    assert!(coordinator.wait_for_completion().await.expect("wait").is_empty());
    assert_eq!(coordinator.confirm().await.expect("confirm"), ApplyOutcome::NoChanges);
}

#[tokio::test]
async fn direct_sync_applies_only_requested_instances() {
    init_logging();
    let home = TempDir::new().expect("home");
    save(home.path(), "emf:1", &[("alice", "manager")]);
    save(home.path(), "emf:2", &[("bob", "viewer")]);
    let (coordinator, applier) = coordinator(home.path());

    let outcome = coordinator
        .sync_instances(vec![InstanceId::from("emf:2")])
        .await
        .expect("direct sync");
    let job = outcome.job_id().cloned().expect("job dispatched");
    let status = tokio::task::spawn_blocking({
        let jobs = applier.jobs().clone();
        move || jobs.wait_finished(&job, WAIT)
    })
    .await
    .expect("join");
    assert_eq!(status, Some(JobStatus::Completed { applied: 1 }));

    let untouched = drift::check(home.path(), &InstanceId::from("emf:1")).expect("drift");
    assert_eq!(untouched.signal, DriftSignal::NeverApplied);
    let synced = drift::check(home.path(), &InstanceId::from("emf:2")).expect("drift");
    assert_eq!(synced.signal, DriftSignal::InSync);

    let again = coordinator
        .sync_instances(vec![InstanceId::from("emf:2")])
        .await
        .expect("repeat direct sync");
    assert_eq!(again, ApplyOutcome::NoChanges);
}

#[tokio::test]
async fn cancelled_check_leaves_materialized_state_alone() {
    init_logging();
    let home = TempDir::new().expect("home");
    save(home.path(), "emf:1", &[("alice", "manager")]);
    let (coordinator, _applier) = coordinator(home.path());

    coordinator.trigger_check(SyncScope::All).await.expect("trigger");
    coordinator.wait_for_completion().await.expect("wait");
    coordinator.cancel().await.expect("discard");

    let report = drift::check(home.path(), &InstanceId::from("emf:1")).expect("drift");
    assert_eq!(report.signal, DriftSignal::NeverApplied);
    coordinator.trigger_check(SyncScope::All).await.expect("slot free");
}
