//! Drift classification for `permsync status`.
//!
//! Signal precedence:
//! 1. `Orphaned` (materialized state but no model)
//! 2. `NeverApplied` (model but no materialized state)
//! 3. `Drifted` (model digest differs from the applied digest)
//! 4. `InSync`

use std::path::Path;

use chrono::{DateTime, Utc};

use permsync_core::store::{load_model_at, validate_instance_id};
use permsync_core::types::{InstanceId, PermissionEntry};
use permsync_core::StoreError;

use crate::diff::{entry_delta, known_instances_at};
use crate::{state_store, SyncError};

/// Drift classification of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftSignal {
    NeverApplied,
    InSync,
    Drifted {
        added: Vec<PermissionEntry>,
        removed: Vec<PermissionEntry>,
    },
    Orphaned,
}

impl DriftSignal {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NeverApplied => "never applied",
            Self::InSync => "in sync",
            Self::Drifted { .. } => "drifted",
            Self::Orphaned => "orphaned",
        }
    }
}

/// Drift of one instance plus the timestamps shown next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub instance: InstanceId,
    pub signal: DriftSignal,
    pub model_updated_at: Option<DateTime<Utc>>,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Classify one instance. An id with neither model nor state is `NeverApplied`.
pub fn check(home: &Path, instance: &InstanceId) -> Result<DriftReport, SyncError> {
    validate_instance_id(instance)?;
    let model = match load_model_at(home, instance) {
        Ok(model) => Some(model),
        Err(StoreError::NotFound { .. }) => None,
        Err(err) => return Err(err.into()),
    };
    let state = state_store::load_at(home, instance)?;

    let signal = match (&model, &state) {
        (None, Some(_)) => DriftSignal::Orphaned,
        (_, None) => DriftSignal::NeverApplied,
        (Some(model), Some(state)) => {
            if state_store::digest(&model.entries) == state.digest {
                DriftSignal::InSync
            } else {
                let (added, removed) = entry_delta(&state.entries, &model.entries);
                DriftSignal::Drifted { added, removed }
            }
        }
    };

    Ok(DriftReport {
        instance: instance.clone(),
        signal,
        model_updated_at: model.map(|m| m.updated_at),
        applied_at: state.map(|s| s.applied_at),
    })
}

/// [`check`] every known instance, sorted by id.
pub fn check_all(home: &Path) -> Result<Vec<DriftReport>, SyncError> {
    known_instances_at(home)?
        .iter()
        .map(|instance| check(home, instance))
        .collect()
}

/// Format age from a chrono timestamp (`appliedAt`, `updated_at`).
pub fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(timestamp).num_seconds().max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
