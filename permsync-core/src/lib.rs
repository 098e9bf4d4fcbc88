//! permsync core library: domain types, permission model store, config, errors.
//!
//! - [`types`]: newtypes, scope, change records, execution snapshots
//! - [`error`]: [`StoreError`]
//! - [`store`]: load / save / list the authoritative permission model
//! - [`config`]: optional `~/.permsync/config.yaml`

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::PermsyncConfig;
pub use error::StoreError;
pub use types::{
    ApplyOutcome, ChangeRecord, ExecutionId, ExecutionSnapshot, ExecutionStatus, InstanceId,
    InstancePermissions, JobId, JobStatus, PermissionEntry, SyncScope,
};
