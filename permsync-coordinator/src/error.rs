//! Error types for permsync-coordinator.

use thiserror::Error;

use permsync_core::types::ExecutionId;

/// Every failure a coordinator operation can report.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A check is running or waiting for confirmation.
    #[error("a permission synchronization is already active (execution {execution_id})")]
    AlreadyRunning { execution_id: ExecutionId },

    /// Poll, wait, cancel or confirm issued with no current execution.
    #[error("no active permission synchronization")]
    NoActiveSynchronization,

    /// The diff producer failed; the execution was retired without changes.
    #[error("permission diff computation failed: {message}")]
    DiffComputationFailed {
        execution_id: Option<ExecutionId>,
        message: String,
    },

    /// The change applier could not start its job; the slot is still released.
    #[error("failed to dispatch permission apply job: {message}")]
    ApplyDispatchFailed {
        execution_id: Option<ExecutionId>,
        message: String,
    },

    /// A direct sync was requested for an empty instance list.
    #[error("no instance ids given")]
    EmptyScope,

    /// A background task panicked or was aborted.
    #[error("coordinator task failure: {0}")]
    Internal(String),
}
