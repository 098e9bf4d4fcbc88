//! Seams to the external collaborators: the diff producer and the change applier.
//!
//! Both traits are synchronous. The coordinator always calls them from
//! `spawn_blocking`, so implementations are free to do file or network I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use permsync_core::types::{ChangeRecord, JobId, SyncScope};

/// Error type crossing the collaborator seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Lazy, finite, non-restartable sequence of pending changes.
pub type ChangeStream = Box<dyn Iterator<Item = Result<ChangeRecord, BoxError>> + Send>;

/// Computes the discrepancies between the authoritative model and the
/// materialized state for a scope.
pub trait DiffProducer: Send + Sync {
    /// Start computing changes for `scope`.
    ///
    /// Implementations should consult `cancel` between work units; the
    /// coordinator additionally checks it after every yielded change.
    fn compute(&self, scope: &SyncScope, cancel: CancelCheck) -> Result<ChangeStream, BoxError>;
}

/// Durably applies previously computed changes as a background batch job.
pub trait ChangeApplier: Send + Sync {
    /// Dispatch a job for `changes` and return its id without waiting for it.
    fn apply(&self, changes: Vec<ChangeRecord>) -> Result<JobId, BoxError>;
}

/// Cooperative cancellation flag shared between an execution and its diff.
///
/// The flag can only go from unset to set.
#[derive(Debug, Clone, Default)]
pub struct CancelCheck(Arc<AtomicBool>);

impl CancelCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set the flag. Returns `true` only for the call that set it.
    pub(crate) fn request(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}
