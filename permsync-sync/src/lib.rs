//! # permsync-sync
//!
//! File-backed collaborators for the synchronization coordinator.
//!
//! - [`ModelDiffProducer`] diffs `~/.permsync/model` against `~/.permsync/materialized`
//! - [`MaterializingApplier`] applies changes as background jobs tracked in a [`JobRegistry`]
//! - [`drift`] classifies each instance for `permsync status`

pub mod diff;
pub mod drift;
pub mod error;
pub mod state_store;
pub mod writer;

pub use diff::{diff_instance_at, InstanceDiff, ModelDiffProducer};
pub use drift::{DriftReport, DriftSignal};
pub use error::SyncError;
pub use writer::{JobRegistry, JobSummary, MaterializingApplier};
