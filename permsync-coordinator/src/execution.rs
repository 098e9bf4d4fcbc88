//! One reconciliation attempt and its state machine.
//!
//! ```text
//! Running --diff complete----------> Done
//! Running --cancel observed--------> Cancelled
//! Running --diff failed------------> Failed      (counts as cancelled)
//! Done    --cancel (discard)-------> Cancelled
//! ```
//!
//! Status changes are published on a `watch` channel so waiters can subscribe
//! after the fact without missing a transition.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use permsync_core::types::{
    ChangeRecord, ExecutionId, ExecutionSnapshot, ExecutionStatus, InstanceId, SyncScope,
};

use crate::collaborator::CancelCheck;

/// How a running execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Done,
    Cancelled,
    Failed(String),
}

#[derive(Debug)]
struct ExecutionInner {
    status: ExecutionStatus,
    changes: Vec<ChangeRecord>,
    finished_at: Option<DateTime<Utc>>,
    failure: Option<String>,
}

/// Shared state of one execution.
///
/// Only the owning diff task appends changes or finishes the run; everyone
/// else reads through [`ExecutionState::snapshot`].
#[derive(Debug)]
pub struct ExecutionState {
    id: ExecutionId,
    scope: SyncScope,
    created_at: DateTime<Utc>,
    cancel: CancelCheck,
    inner: Mutex<ExecutionInner>,
    status_tx: watch::Sender<ExecutionStatus>,
}

impl ExecutionState {
    pub fn new(scope: SyncScope) -> Self {
        let (status_tx, _) = watch::channel(ExecutionStatus::Running);
        Self {
            id: ExecutionId::generate(),
            scope,
            created_at: Utc::now(),
            cancel: CancelCheck::new(),
            inner: Mutex::new(ExecutionInner {
                status: ExecutionStatus::Running,
                changes: Vec::new(),
                finished_at: None,
                failure: None,
            }),
            status_tx,
        }
    }

    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    pub fn scope(&self) -> &SyncScope {
        &self.scope
    }

    pub fn status(&self) -> ExecutionStatus {
        self.lock().status
    }

    pub fn failure(&self) -> Option<String> {
        self.lock().failure.clone()
    }

    pub fn cancel_check(&self) -> CancelCheck {
        self.cancel.clone()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Raise the cancellation flag. Returns `true` the first time only.
    pub fn request_cancel(&self) -> bool {
        self.cancel.request()
    }

    /// Copy of the changes collected so far.
    pub fn changes(&self) -> Vec<ChangeRecord> {
        self.lock().changes.clone()
    }

    pub fn subject_ids(&self) -> Vec<InstanceId> {
        self.lock()
            .changes
            .iter()
            .map(|change| change.subject_id.clone())
            .collect()
    }

    pub fn snapshot(&self) -> ExecutionSnapshot {
        let inner = self.lock();
        ExecutionSnapshot {
            id: self.id.clone(),
            scope: self.scope.clone(),
            status: inner.status,
            changes: inner.changes.clone(),
            cancel_requested: self.cancel.is_cancelled(),
            created_at: self.created_at,
            finished_at: inner.finished_at,
            failure: inner.failure.clone(),
        }
    }

    /// Append a change. Ignored once the execution left `Running`.
    pub(crate) fn append(&self, change: ChangeRecord) -> bool {
        let mut inner = self.lock();
        if inner.status != ExecutionStatus::Running {
            return false;
        }
        inner.changes.push(change);
        true
    }

    /// Move `Running` to its terminal state. Only the first call has an effect.
    pub(crate) fn finish(&self, completion: &Completion) -> bool {
        let status = {
            let mut inner = self.lock();
            if inner.status != ExecutionStatus::Running {
                return false;
            }
            inner.finished_at = Some(Utc::now());
            inner.status = match completion {
                Completion::Done => ExecutionStatus::Done,
                Completion::Cancelled => {
                    inner.changes.clear();
                    ExecutionStatus::Cancelled
                }
                Completion::Failed(message) => {
                    inner.changes.clear();
                    inner.failure = Some(message.clone());
                    ExecutionStatus::Failed
                }
            };
            inner.status
        };
        self.status_tx.send_replace(status);
        true
    }

    /// Throw away the result of a `Done` execution that will not be confirmed.
    pub(crate) fn discard(&self) -> bool {
        {
            let mut inner = self.lock();
            if inner.status != ExecutionStatus::Done {
                return false;
            }
            inner.status = ExecutionStatus::Cancelled;
            inner.changes.clear();
        }
        self.status_tx.send_replace(ExecutionStatus::Cancelled);
        true
    }

    /// Suspend until the execution leaves `Running`.
    ///
    /// Returns immediately when that already happened.
    pub async fn wait_terminal(&self) -> ExecutionStatus {
        let mut rx = self.status_tx.subscribe();
        let status = match rx.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            // The sender lives in `self`, so it outlives this call.
            Err(_) => self.status(),
        };
        status
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
