//! # permsync-coordinator
//!
//! Single-flight coordination of permission reconciliation runs.
//!
//! A [`SynchronizationCoordinator`] owns at most one active [`ExecutionState`].
//! Callers start a dry-run check, poll or wait on it, then either confirm it
//! (handing the computed changes to a [`ChangeApplier`]) or cancel it. The
//! diff itself comes from an injected [`DiffProducer`].

pub mod collaborator;
pub mod coordinator;
pub mod error;
pub mod execution;

pub use collaborator::{BoxError, CancelCheck, ChangeApplier, ChangeStream, DiffProducer};
pub use coordinator::SynchronizationCoordinator;
pub use error::CoordinatorError;
pub use execution::{Completion, ExecutionState};
