//! Background apply jobs.
//!
//! ## Apply protocol
//!
//! 1. Register a `Running` job and return its id to the caller.
//! 2. On a named worker thread, for each affected instance (sorted, deduplicated):
//!    reload the authoritative model and write its materialized state
//!    atomically, or drop the materialized state when the model is gone.
//! 3. Finish the job as `Completed` or, at the first error, `Failed`.
//!
//! The job reloads the model instead of trusting the change descriptions, so
//! a job always converges to the model as it is when the job runs.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use permsync_coordinator::{BoxError, ChangeApplier};
use permsync_core::store::load_model_at;
use permsync_core::types::{ChangeRecord, InstanceId, JobId, JobStatus};
use permsync_core::StoreError;

use crate::state_store::{self, MaterializedState};
use crate::SyncError;

// ---------------------------------------------------------------------------
// Job registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct JobRecord {
    status: JobStatus,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Jobs {
    records: HashMap<JobId, JobRecord>,
    /// Finished job ids, oldest first.
    finished: VecDeque<JobId>,
}

/// Status of every apply job, running or recently finished.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: Mutex<Jobs>,
    changed: Condvar,
    history_limit: usize,
}

/// Point-in-time view of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRegistry {
    /// Keep at most `history_limit` finished jobs. Running jobs are never pruned.
    pub fn new(history_limit: usize) -> Self {
        Self {
            jobs: Mutex::new(Jobs::default()),
            changed: Condvar::new(),
            history_limit,
        }
    }

    pub fn status(&self, id: &JobId) -> Option<JobStatus> {
        self.lock().records.get(id).map(|record| record.status.clone())
    }

    pub fn summary(&self, id: &JobId) -> Option<JobSummary> {
        self.lock().records.get(id).map(|record| JobSummary {
            id: id.clone(),
            status: record.status.clone(),
            started_at: record.started_at,
            finished_at: record.finished_at,
        })
    }

    /// Block until `id` finishes or `timeout` elapses; returns the last status seen.
    pub fn wait_finished(&self, id: &JobId, timeout: Duration) -> Option<JobStatus> {
        let deadline = Instant::now() + timeout;
        let mut jobs = self.lock();
        loop {
            let status = jobs.records.get(id).map(|record| record.status.clone())?;
            let now = Instant::now();
            if status.is_finished() || now >= deadline {
                return Some(status);
            }
            jobs = self
                .changed
                .wait_timeout(jobs, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn start(&self, id: &JobId, total: usize) {
        self.lock().records.insert(
            id.clone(),
            JobRecord {
                status: JobStatus::Running { total },
                started_at: Utc::now(),
                finished_at: None,
            },
        );
        self.changed.notify_all();
    }

    fn finish(&self, id: &JobId, status: JobStatus) {
        {
            let mut jobs = self.lock();
            if let Some(record) = jobs.records.get_mut(id) {
                record.status = status;
                record.finished_at = Some(Utc::now());
                jobs.finished.push_back(id.clone());
            }
            while jobs.finished.len() > self.history_limit {
                if let Some(oldest) = jobs.finished.pop_front() {
                    jobs.records.remove(&oldest);
                }
            }
        }
        self.changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Jobs> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// MaterializingApplier
// ---------------------------------------------------------------------------

/// File-backed [`ChangeApplier`]: materializes the model of each changed
/// instance on a background thread.
#[derive(Debug, Clone)]
pub struct MaterializingApplier {
    home: PathBuf,
    jobs: Arc<JobRegistry>,
}

impl MaterializingApplier {
    pub fn new(home: impl Into<PathBuf>, job_history_limit: usize) -> Self {
        Self {
            home: home.into(),
            jobs: Arc::new(JobRegistry::new(job_history_limit)),
        }
    }

    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    pub fn job_status(&self, id: &JobId) -> Option<JobStatus> {
        self.jobs.status(id)
    }

    /// Start a job for `changes` and return its id without waiting.
    pub fn dispatch(&self, changes: Vec<ChangeRecord>) -> Result<JobId, SyncError> {
        let subjects: BTreeSet<InstanceId> =
            changes.into_iter().map(|change| change.subject_id).collect();
        let job_id = JobId::generate();
        self.jobs.start(&job_id, subjects.len());
        tracing::info!("apply job {job_id} started: {} instance(s)", subjects.len());

        let home = self.home.clone();
        let jobs = self.jobs.clone();
        let worker_id = job_id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("permsync-apply-{job_id}"))
            .spawn(move || {
                let status = match materialize_all(&home, &subjects) {
                    Ok(applied) => {
                        tracing::info!("apply job {worker_id} completed: {applied} instance(s)");
                        JobStatus::Completed { applied }
                    }
                    Err(err) => {
                        tracing::error!("apply job {worker_id} failed: {err}");
                        JobStatus::Failed {
                            message: err.to_string(),
                        }
                    }
                };
                jobs.finish(&worker_id, status);
            });

        if let Err(err) = spawned {
            self.jobs.finish(
                &job_id,
                JobStatus::Failed {
                    message: format!("worker did not start: {err}"),
                },
            );
            return Err(SyncError::Spawn(err));
        }
        Ok(job_id)
    }
}

impl ChangeApplier for MaterializingApplier {
    fn apply(&self, changes: Vec<ChangeRecord>) -> Result<JobId, BoxError> {
        Ok(self.dispatch(changes)?)
    }
}

fn materialize_all(home: &Path, subjects: &BTreeSet<InstanceId>) -> Result<usize, SyncError> {
    let mut applied = 0;
    for instance in subjects {
        match load_model_at(home, instance) {
            Ok(model) => {
                state_store::save_at(home, &MaterializedState::from_model(&model))?;
                tracing::debug!("materialized {instance}: {} entries", model.entries.len());
            }
            Err(StoreError::NotFound { .. }) => {
                if state_store::remove_at(home, instance)? {
                    tracing::debug!("materialized state of {instance} removed: model is gone");
                }
            }
            Err(err) => return Err(err.into()),
        }
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use permsync_core::store::save_model_at;
    use permsync_core::types::{InstancePermissions, PermissionEntry};
    use tempfile::TempDir;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn save(home: &Path, id: &str, entries: &[(&str, &str)]) {
        let mut model = InstancePermissions::empty(InstanceId::from(id));
        model.entries = entries
            .iter()
            .map(|(a, r)| PermissionEntry::new(*a, *r))
            .collect();
        save_model_at(home, &model).unwrap();
    }

    #[test]
    fn job_materializes_each_subject_once() {
        let home = TempDir::new().unwrap();
        save(home.path(), "emf:1", &[("alice", "manager")]);
        save(home.path(), "emf:2", &[("bob", "viewer")]);
        let applier = MaterializingApplier::new(home.path(), 10);

        let job = applier
            .dispatch(vec![
                ChangeRecord::new("emf:2", "d"),
                ChangeRecord::new("emf:1", "d"),
                ChangeRecord::new("emf:2", "d"),
            ])
            .unwrap();
        let status = applier.jobs().wait_finished(&job, WAIT).expect("known job");
        assert_eq!(status, JobStatus::Completed { applied: 2 });

        let state = state_store::load_at(home.path(), &InstanceId::from("emf:1"))
            .unwrap()
            .expect("materialized");
        assert_eq!(state.entries, vec![PermissionEntry::new("alice", "manager")]);
    }

    #[test]
    fn missing_model_removes_materialized_state() {
        let home = TempDir::new().unwrap();
        let orphan = InstancePermissions::empty(InstanceId::from("gone"));
        state_store::save_at(home.path(), &MaterializedState::from_model(&orphan)).unwrap();
        let applier = MaterializingApplier::new(home.path(), 10);

        let job = applier.dispatch(vec![ChangeRecord::new("gone", "d")]).unwrap();
        assert_eq!(
            applier.jobs().wait_finished(&job, WAIT),
            Some(JobStatus::Completed { applied: 1 })
        );
        assert!(state_store::load_at(home.path(), &orphan.instance).unwrap().is_none());
    }

    #[test]
    fn corrupt_model_fails_job_with_message() {
        let home = TempDir::new().unwrap();
        let path = permsync_core::store::model_path_at(home.path(), &InstanceId::from("bad"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, ": : :").unwrap();
        let applier = MaterializingApplier::new(home.path(), 10);

        let job = applier.dispatch(vec![ChangeRecord::new("bad", "d")]).unwrap();
        match applier.jobs().wait_finished(&job, WAIT) {
            Some(JobStatus::Failed { message }) => {
                assert!(message.contains("bad.yaml"), "got: {message}")
            }
            other => panic!("expected failed job, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_jobs_for_one_instance_all_complete() {
        let home = TempDir::new().unwrap();
        let entries: Vec<(String, String)> = (0..1000)
            .map(|n| (format!("user-{n}"), "viewer".to_string()))
            .collect();
        let pairs: Vec<(&str, &str)> = entries.iter().map(|(a, r)| (a.as_str(), r.as_str())).collect();
        save(home.path(), "emf:1", &pairs);
        let applier = MaterializingApplier::new(home.path(), 100);

        for _ in 0..5 {
            let jobs: Vec<JobId> = (0..8)
                .map(|_| applier.dispatch(vec![ChangeRecord::new("emf:1", "d")]).unwrap())
                .collect();
            for job in &jobs {
                assert_eq!(
                    applier.jobs().wait_finished(job, WAIT),
                    Some(JobStatus::Completed { applied: 1 }),
                    "job {job}"
                );
            }
        }
        let state = state_store::load_at(home.path(), &InstanceId::from("emf:1"))
            .unwrap()
            .expect("materialized");
        assert_eq!(state.entries.len(), 1000);
    }

    #[test]
    fn unknown_job_has_no_status() {
        let home = TempDir::new().unwrap();
        let applier = MaterializingApplier::new(home.path(), 10);
        assert!(applier.job_status(&JobId::from("nope")).is_none());
    }

    #[test]
    fn history_keeps_only_newest_finished_jobs() {
        let registry = JobRegistry::new(2);
        let ids: Vec<JobId> = (0..3).map(|n| JobId::from(format!("job-{n}"))).collect();
        for id in &ids {
            registry.start(id, 1);
        }
        let running = JobId::from("still-running");
        registry.start(&running, 1);
        for id in &ids {
            registry.finish(id, JobStatus::Completed { applied: 1 });
        }

        assert!(registry.status(&ids[0]).is_none(), "oldest finished job is pruned");
        assert!(registry.status(&ids[1]).is_some());
        assert!(registry.status(&ids[2]).is_some());
        assert_eq!(registry.status(&running), Some(JobStatus::Running { total: 1 }));
        let summary = registry.summary(&ids[2]).expect("summary");
        assert!(summary.finished_at.is_some());
    }
}
