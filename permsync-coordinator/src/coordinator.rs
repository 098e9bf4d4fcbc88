//! The synchronization coordinator: single-flight dry-run / confirm / cancel.
//!
//! The "current" slot is a `tokio::sync::Mutex`. Every identity change of the
//! slot (register, retire) and every terminal transition of the current
//! execution happens while holding it, so a caller never observes a retired
//! execution in the slot or a terminal execution that should already be gone.
//!
//! Lock order: slot, then the execution's inner mutex.

use std::sync::Arc;

use tokio::sync::Mutex;

use permsync_core::types::{
    ApplyOutcome, ChangeRecord, ExecutionId, ExecutionSnapshot, ExecutionStatus, InstanceId,
    SyncScope,
};

use crate::collaborator::{BoxError, CancelCheck, ChangeApplier, DiffProducer};
use crate::error::CoordinatorError;
use crate::execution::{Completion, ExecutionState};

/// A failed execution kept until a poller has seen it.
#[derive(Debug, Clone)]
struct FailedExecution {
    id: ExecutionId,
    message: String,
}

impl FailedExecution {
    fn to_error(&self) -> CoordinatorError {
        CoordinatorError::DiffComputationFailed {
            execution_id: Some(self.id.clone()),
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    current: Option<Arc<ExecutionState>>,
    last_failure: Option<FailedExecution>,
}

impl Slot {
    fn is_current(&self, execution: &Arc<ExecutionState>) -> bool {
        self.current
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, execution))
    }

    fn retire(&mut self, execution: &Arc<ExecutionState>) {
        if self.is_current(execution) {
            self.current = None;
            tracing::debug!(execution_id = %execution.id(), "execution retired");
        }
    }

    /// Error for an empty slot; a pending failure is reported instead.
    fn missing(&self) -> CoordinatorError {
        match &self.last_failure {
            Some(failure) => failure.to_error(),
            None => CoordinatorError::NoActiveSynchronization,
        }
    }
}

/// Owner of the single current execution.
///
/// Cheap to clone; clones share the same slot and collaborators.
#[derive(Clone)]
pub struct SynchronizationCoordinator {
    producer: Arc<dyn DiffProducer>,
    applier: Arc<dyn ChangeApplier>,
    slot: Arc<Mutex<Slot>>,
}

impl SynchronizationCoordinator {
    pub fn new(producer: Arc<dyn DiffProducer>, applier: Arc<dyn ChangeApplier>) -> Self {
        Self {
            producer,
            applier,
            slot: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Start a dry-run check for `scope` and return its id immediately.
    ///
    /// Fails with [`CoordinatorError::AlreadyRunning`] while another execution
    /// is running or awaiting confirmation. Must be called inside a Tokio runtime.
    pub async fn trigger_check(&self, scope: SyncScope) -> Result<ExecutionId, CoordinatorError> {
        if matches!(&scope, SyncScope::InstanceIds(ids) if ids.is_empty()) {
            return Err(CoordinatorError::EmptyScope);
        }

        let mut slot = self.slot.lock().await;
        if let Some(current) = slot.current.as_ref() {
            if current.status().is_active() {
                return Err(CoordinatorError::AlreadyRunning {
                    execution_id: current.id().clone(),
                });
            }
        }

        let execution = Arc::new(ExecutionState::new(scope));
        let id = execution.id().clone();
        slot.current = Some(execution.clone());
        slot.last_failure = None;
        tracing::info!(
            execution_id = %id,
            scope = %execution.scope().label(),
            "permission check started",
        );

        tokio::spawn(run_diff_task(
            self.producer.clone(),
            self.slot.clone(),
            execution,
        ));
        Ok(id)
    }

    /// Snapshot of the current execution.
    ///
    /// After a diff failure the first poll reports
    /// [`CoordinatorError::DiffComputationFailed`]; later polls report
    /// [`CoordinatorError::NoActiveSynchronization`].
    pub async fn current(&self) -> Result<ExecutionSnapshot, CoordinatorError> {
        let mut slot = self.slot.lock().await;
        if let Some(current) = slot.current.as_ref() {
            return Ok(current.snapshot());
        }
        match slot.last_failure.take() {
            Some(failure) => Err(failure.to_error()),
            None => Err(CoordinatorError::NoActiveSynchronization),
        }
    }

    /// Snapshot of the current execution without consuming a pending failure.
    pub async fn peek(&self) -> Option<ExecutionSnapshot> {
        let slot = self.slot.lock().await;
        slot.current.as_ref().map(|current| current.snapshot())
    }

    /// Block until the current execution leaves `Running`.
    ///
    /// Returns the affected subject ids when it is `Done`, and an empty list
    /// when it was cancelled.
    pub async fn wait_for_completion(&self) -> Result<Vec<InstanceId>, CoordinatorError> {
        let execution = self.current_execution().await?;
        match execution.wait_terminal().await {
            ExecutionStatus::Done => Ok(execution.subject_ids()),
            ExecutionStatus::Cancelled => Ok(Vec::new()),
            ExecutionStatus::Failed => Err(failure_of(&execution)),
            ExecutionStatus::Running => Err(CoordinatorError::Internal(
                "wait returned before the execution finished".to_string(),
            )),
        }
    }

    /// Request cancellation of the current execution.
    ///
    /// A running diff observes the request cooperatively. A finished but
    /// unconfirmed execution is discarded and retired on the spot. With no
    /// current execution, a pending diff failure is reported like `wait` and
    /// `confirm` do, without consuming it.
    pub async fn cancel(&self) -> Result<ExecutionId, CoordinatorError> {
        let mut slot = self.slot.lock().await;
        let Some(execution) = slot.current.clone() else {
            return Err(slot.missing());
        };

        let first = execution.request_cancel();
        match execution.status() {
            ExecutionStatus::Running if first => {
                tracing::info!(execution_id = %execution.id(), "cancellation requested");
            }
            ExecutionStatus::Running => {
                tracing::debug!(execution_id = %execution.id(), "cancellation already requested");
            }
            ExecutionStatus::Done => {
                execution.discard();
                slot.retire(&execution);
                tracing::info!(
                    execution_id = %execution.id(),
                    "pending changes discarded without confirmation",
                );
            }
            ExecutionStatus::Cancelled | ExecutionStatus::Failed => slot.retire(&execution),
        }
        Ok(execution.id().clone())
    }

    /// Apply the changes of the current execution.
    ///
    /// Waits for a running diff to finish first. The slot is released whether
    /// or not the applier accepts the job.
    pub async fn confirm(&self) -> Result<ApplyOutcome, CoordinatorError> {
        let execution = self.current_execution().await?;
        let status = execution.wait_terminal().await;

        let mut slot = self.slot.lock().await;
        match status {
            ExecutionStatus::Done if slot.is_current(&execution) => {}
            ExecutionStatus::Failed => return Err(failure_of(&execution)),
            // Cancelled, or another confirm got here first.
            _ => return Err(CoordinatorError::NoActiveSynchronization),
        }

        let execution_id = execution.id().clone();
        let changes = execution.changes();
        if changes.is_empty() {
            slot.retire(&execution);
            tracing::info!(execution_id = %execution_id, "confirm found no changes to apply");
            return Ok(ApplyOutcome::NoChanges);
        }

        let count = changes.len();
        let applier = self.applier.clone();
        let dispatched = tokio::task::spawn_blocking(move || applier.apply(changes)).await;
        slot.retire(&execution);
        drop(slot);

        match dispatched {
            Ok(Ok(job_id)) => {
                tracing::info!(
                    execution_id = %execution_id,
                    job_id = %job_id,
                    changes = count,
                    "apply job dispatched",
                );
                Ok(ApplyOutcome::Dispatched(job_id))
            }
            Ok(Err(err)) => {
                tracing::error!(execution_id = %execution_id, error = %err, "apply dispatch failed");
                Err(CoordinatorError::ApplyDispatchFailed {
                    execution_id: Some(execution_id),
                    message: err.to_string(),
                })
            }
            Err(err) => Err(CoordinatorError::ApplyDispatchFailed {
                execution_id: Some(execution_id),
                message: format!("apply dispatch aborted: {err}"),
            }),
        }
    }

    /// Compute and apply changes for exactly `ids`, bypassing the dry run.
    ///
    /// Never touches the current slot, so it may run next to a pending check.
    pub async fn sync_instances(
        &self,
        ids: Vec<InstanceId>,
    ) -> Result<ApplyOutcome, CoordinatorError> {
        let scope = SyncScope::instances(ids);
        if matches!(&scope, SyncScope::InstanceIds(ids) if ids.is_empty()) {
            return Err(CoordinatorError::EmptyScope);
        }
        let label = scope.label();
        let producer = self.producer.clone();
        let applier = self.applier.clone();

        let outcome = tokio::task::spawn_blocking(move || -> Result<ApplyOutcome, CoordinatorError> {
            let changes = collect_changes(producer.as_ref(), &scope).map_err(|err| {
                CoordinatorError::DiffComputationFailed {
                    execution_id: None,
                    message: err.to_string(),
                }
            })?;
            if changes.is_empty() {
                return Ok(ApplyOutcome::NoChanges);
            }
            applier
                .apply(changes)
                .map(ApplyOutcome::Dispatched)
                .map_err(|err| CoordinatorError::ApplyDispatchFailed {
                    execution_id: None,
                    message: err.to_string(),
                })
        })
        .await
        .map_err(|err| CoordinatorError::Internal(format!("direct sync join error: {err}")))?;

        match &outcome {
            Ok(ApplyOutcome::Dispatched(job_id)) => {
                tracing::info!(instances = %label, job_id = %job_id, "direct sync dispatched");
            }
            Ok(ApplyOutcome::NoChanges) => {
                tracing::info!(instances = %label, "direct sync found no changes");
            }
            Err(err) => tracing::error!(instances = %label, error = %err, "direct sync failed"),
        }
        outcome
    }

    async fn current_execution(&self) -> Result<Arc<ExecutionState>, CoordinatorError> {
        let slot = self.slot.lock().await;
        slot.current.clone().ok_or_else(|| slot.missing())
    }
}

fn failure_of(execution: &ExecutionState) -> CoordinatorError {
    CoordinatorError::DiffComputationFailed {
        execution_id: Some(execution.id().clone()),
        message: execution
            .failure()
            .unwrap_or_else(|| "unknown diff failure".to_string()),
    }
}

fn collect_changes(
    producer: &dyn DiffProducer,
    scope: &SyncScope,
) -> Result<Vec<ChangeRecord>, BoxError> {
    producer.compute(scope, CancelCheck::new())?.collect()
}

async fn run_diff_task(
    producer: Arc<dyn DiffProducer>,
    slot: Arc<Mutex<Slot>>,
    execution: Arc<ExecutionState>,
) {
    let worker = execution.clone();
    let drained =
        tokio::task::spawn_blocking(move || drain_changes(producer.as_ref(), &worker)).await;

    let completion = match drained {
        Ok(Ok(())) => Completion::Done,
        Ok(Err(err)) => Completion::Failed(err.to_string()),
        Err(err) => Completion::Failed(format!("diff task aborted: {err}")),
    };
    finalize(&slot, &execution, completion).await;
}

/// Pull changes into the execution, checking for cancellation after each one.
fn drain_changes(producer: &dyn DiffProducer, execution: &ExecutionState) -> Result<(), BoxError> {
    let cancel = execution.cancel_check();
    if cancel.is_cancelled() {
        return Ok(());
    }
    for item in producer.compute(execution.scope(), cancel.clone())? {
        execution.append(item?);
        if cancel.is_cancelled() {
            break;
        }
    }
    Ok(())
}

async fn finalize(slot: &Mutex<Slot>, execution: &Arc<ExecutionState>, completion: Completion) {
    let mut slot = slot.lock().await;

    // A cancel request wins over whatever the diff produced; cancel sets the
    // flag under the slot lock, so this check cannot race with it.
    let completion = if execution.is_cancel_requested() {
        if let Completion::Failed(message) = &completion {
            tracing::warn!(
                execution_id = %execution.id(),
                error = %message,
                "diff failed after cancellation was requested",
            );
        }
        Completion::Cancelled
    } else {
        completion
    };

    if !execution.finish(&completion) {
        return;
    }

    match completion {
        Completion::Done => {
            tracing::info!(
                execution_id = %execution.id(),
                changes = execution.changes().len(),
                "permission check finished, awaiting confirmation",
            );
        }
        Completion::Cancelled => {
            slot.retire(execution);
            tracing::info!(execution_id = %execution.id(), "permission check cancelled");
        }
        Completion::Failed(message) => {
            slot.retire(execution);
            tracing::error!(
                execution_id = %execution.id(),
                error = %message,
                "permission check failed",
            );
            slot.last_failure = Some(FailedExecution {
                id: execution.id().clone(),
                message,
            });
        }
    }
}
