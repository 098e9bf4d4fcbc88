//! Administrative surface of the coordinator.
//!
//! Each `sync_*` socket command maps onto exactly one coordinator operation;
//! this module only translates arguments, payloads and error classes.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use permsync_coordinator::{CoordinatorError, SynchronizationCoordinator};
use permsync_core::store::validate_instance_id;
use permsync_core::types::{ApplyOutcome, ExecutionSnapshot, InstanceId, JobId, SyncScope};
use permsync_core::PermsyncConfig;
use permsync_sync::{JobRegistry, MaterializingApplier, ModelDiffProducer};

use crate::protocol::{DaemonRequest, DaemonResponse, ErrorCode};

const NO_CHANGES_MESSAGE: &str = "No changes found";

/// A failed facade call, ready to go on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            message: message.into(),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        let code = match &err {
            CoordinatorError::AlreadyRunning { .. } => ErrorCode::Conflict,
            CoordinatorError::NoActiveSynchronization => ErrorCode::PreconditionFailed,
            CoordinatorError::EmptyScope => ErrorCode::BadRequest,
            CoordinatorError::DiffComputationFailed { .. }
            | CoordinatorError::ApplyDispatchFailed { .. }
            | CoordinatorError::Internal(_) => ErrorCode::Failed,
        };
        Self {
            code,
            message: err.to_string(),
        }
    }
}

impl From<ApiError> for DaemonResponse {
    fn from(err: ApiError) -> Self {
        DaemonResponse::error(err.code, err.message)
    }
}

/// Thin pass-through from socket commands to the coordinator.
#[derive(Clone)]
pub struct PermissionSyncFacade {
    coordinator: SynchronizationCoordinator,
    jobs: Arc<JobRegistry>,
}

impl PermissionSyncFacade {
    pub fn new(coordinator: SynchronizationCoordinator, jobs: Arc<JobRegistry>) -> Self {
        Self { coordinator, jobs }
    }

    /// Wire the file-backed collaborators rooted at `home`.
    pub fn from_home(home: &Path, config: &PermsyncConfig) -> Self {
        let producer = ModelDiffProducer::new(home, config.diff_context_lines);
        let applier = MaterializingApplier::new(home, config.job_history_limit);
        let jobs = applier.jobs().clone();
        let coordinator = SynchronizationCoordinator::new(Arc::new(producer), Arc::new(applier));
        Self::new(coordinator, jobs)
    }

    pub fn coordinator(&self) -> &SynchronizationCoordinator {
        &self.coordinator
    }

    /// Route one `sync_*` command.
    pub async fn handle(&self, request: &DaemonRequest) -> DaemonResponse {
        let result = match request.cmd.as_str() {
            "sync" => self.check().await,
            "sync_info" => self.info().await,
            "sync_wait" => self.wait().await,
            "sync_cancel" => self.cancel().await,
            "sync_confirm" => self.confirm().await,
            "sync_custom" => self.custom(request.instances.as_deref()).await,
            "sync_job" => self.job(request.job_id.as_deref()),
            other => Err(ApiError::bad_request(format!("unknown command '{other}'"))),
        };
        match result {
            Ok(data) => DaemonResponse::ok(data),
            Err(err) => {
                tracing::debug!(cmd = %request.cmd, code = %err.code, error = %err.message, "request rejected");
                err.into()
            }
        }
    }

    /// `sync`: start a check over all instances.
    pub async fn check(&self) -> Result<Value, ApiError> {
        let id = self.coordinator.trigger_check(SyncScope::All).await?;
        Ok(json!({
            "executionId": id,
            "message": "Permission check started",
            "options": {
                "confirm": "sync_confirm",
                "info": "sync_info",
                "wait": "sync_wait",
                "cancel": "sync_cancel",
            },
        }))
    }

    /// `sync_info`: snapshot of the current execution.
    pub async fn info(&self) -> Result<Value, ApiError> {
        let snapshot = self.coordinator.current().await?;
        Ok(snapshot_payload(&snapshot))
    }

    /// `sync_wait`: block until the current check leaves `Running`.
    pub async fn wait(&self) -> Result<Value, ApiError> {
        let subjects = self.coordinator.wait_for_completion().await?;
        Ok(json!({ "subjectIds": subjects }))
    }

    pub async fn cancel(&self) -> Result<Value, ApiError> {
        let id = self.coordinator.cancel().await?;
        Ok(json!({
            "executionId": id,
            "message": "Cancellation requested",
        }))
    }

    pub async fn confirm(&self) -> Result<Value, ApiError> {
        let outcome = self.coordinator.confirm().await?;
        Ok(outcome_payload(&outcome))
    }

    /// `sync_custom`: direct sync of an explicit id list.
    pub async fn custom(&self, instances: Option<&[String]>) -> Result<Value, ApiError> {
        let ids = match instances {
            Some(ids) if !ids.is_empty() => ids,
            _ => {
                return Err(ApiError::bad_request(
                    "'instances' must be a non-empty array of instance ids",
                ))
            }
        };
        let ids: Vec<InstanceId> = ids.iter().map(|id| InstanceId::from(id.as_str())).collect();
        for id in &ids {
            validate_instance_id(id).map_err(|err| ApiError::bad_request(err.to_string()))?;
        }
        let outcome = self.coordinator.sync_instances(ids).await?;
        Ok(outcome_payload(&outcome))
    }

    /// `sync_job`: status of an apply job started by confirm or custom.
    pub fn job(&self, job_id: Option<&str>) -> Result<Value, ApiError> {
        let job_id = job_id
            .filter(|id| !id.trim().is_empty())
            .map(JobId::from)
            .ok_or_else(|| ApiError::bad_request("'jobId' is required"))?;
        let summary = self
            .jobs
            .summary(&job_id)
            .ok_or_else(|| ApiError::bad_request(format!("unknown job '{job_id}'")))?;
        let mut payload = json!({
            "jobId": summary.id,
            "status": summary.status,
            "startedAt": summary.started_at,
        });
        if let Some(finished_at) = summary.finished_at {
            payload["finishedAt"] = json!(finished_at);
        }
        Ok(payload)
    }

    /// Short description of the current execution for `status`, if any.
    pub async fn current_summary(&self) -> Option<Value> {
        let snapshot = self.coordinator.peek().await?;
        Some(json!({
            "executionId": snapshot.id,
            "status": snapshot.status,
            "changes": snapshot.changes.len(),
            "cancelRequested": snapshot.cancel_requested,
        }))
    }
}

fn snapshot_payload(snapshot: &ExecutionSnapshot) -> Value {
    let mut payload = json!({
        "executionId": snapshot.id,
        "scope": snapshot.scope.label(),
        "status": snapshot.status,
        "isDone": snapshot.is_done(),
        "isCancelled": snapshot.is_cancelled(),
        "cancelRequested": snapshot.cancel_requested,
        "changes": snapshot.changes,
        "createdAt": snapshot.created_at,
    });
    if let Some(finished_at) = snapshot.finished_at {
        payload["finishedAt"] = json!(finished_at);
    }
    if let Some(failure) = &snapshot.failure {
        payload["failure"] = json!(failure);
    }
    payload
}

fn outcome_payload(outcome: &ApplyOutcome) -> Value {
    match outcome {
        ApplyOutcome::Dispatched(job_id) => json!({
            "jobId": job_id,
            "message": format!("Synchronization job {job_id} started"),
        }),
        ApplyOutcome::NoChanges => json!({
            "jobId": Value::Null,
            "message": NO_CHANGES_MESSAGE,
        }),
    }
}
