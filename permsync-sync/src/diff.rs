//! Change detection between the authoritative model and the materialized state.
//!
//! [`ModelDiffProducer`] plugs into the coordinator as its [`DiffProducer`];
//! [`diff_instance_at`] backs the offline `permsync diff`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use similar::TextDiff;

use permsync_coordinator::{BoxError, CancelCheck, ChangeStream, DiffProducer};
use permsync_core::store::{list_instances_at, load_model_or_empty_at, validate_instance_id};
use permsync_core::types::{ChangeRecord, InstanceId, PermissionEntry, SyncScope};

use crate::{state_store, SyncError};

/// Pending change for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDiff {
    pub instance: InstanceId,
    /// Entries granted by the model but not materialized.
    pub added: Vec<PermissionEntry>,
    /// Entries materialized but no longer in the model.
    pub removed: Vec<PermissionEntry>,
    pub unified_diff: String,
}

/// Instances that have a model, a materialized state, or both.
pub fn known_instances_at(home: &Path) -> Result<BTreeSet<InstanceId>, SyncError> {
    let mut ids: BTreeSet<InstanceId> = list_instances_at(home)?.into_iter().collect();
    ids.extend(state_store::list_at(home)?);
    Ok(ids)
}

/// Compare one instance's model with what was last applied.
///
/// Returns `None` when the digests match. A missing model counts as an empty
/// permission set, so an orphaned materialized state diffs to removals.
pub fn diff_instance_at(
    home: &Path,
    instance: &InstanceId,
    context_lines: usize,
) -> Result<Option<InstanceDiff>, SyncError> {
    validate_instance_id(instance)?;
    let model = load_model_or_empty_at(home, instance)?;
    let materialized = state_store::load_at(home, instance)?;

    let applied: &[PermissionEntry] = materialized
        .as_ref()
        .map(|state| state.entries.as_slice())
        .unwrap_or(&[]);
    let applied_digest = materialized
        .as_ref()
        .map(|state| state.digest.clone())
        .unwrap_or_else(|| state_store::digest(&[]));
    if state_store::digest(&model.entries) == applied_digest {
        return Ok(None);
    }

    let (added, removed) = entry_delta(applied, &model.entries);
    let old_text = state_store::render(applied);
    let new_text = state_store::render(&model.entries);
    let old_header = format!("a/{instance}");
    let new_header = format!("b/{instance}");
    let unified_diff = TextDiff::from_lines(&old_text, &new_text)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(context_lines)
        .to_string();

    Ok(Some(InstanceDiff {
        instance: instance.clone(),
        added,
        removed,
        unified_diff,
    }))
}

/// `(added, removed)` going from `applied` to `wanted`, both sorted.
pub(crate) fn entry_delta(
    applied: &[PermissionEntry],
    wanted: &[PermissionEntry],
) -> (Vec<PermissionEntry>, Vec<PermissionEntry>) {
    let applied: BTreeSet<&PermissionEntry> = applied.iter().collect();
    let wanted: BTreeSet<&PermissionEntry> = wanted.iter().collect();
    let added = wanted.difference(&applied).map(|e| (*e).clone()).collect();
    let removed = applied.difference(&wanted).map(|e| (*e).clone()).collect();
    (added, removed)
}

// ---------------------------------------------------------------------------
// DiffProducer
// ---------------------------------------------------------------------------

/// File-backed [`DiffProducer`] over `~/.permsync`.
#[derive(Debug, Clone)]
pub struct ModelDiffProducer {
    home: PathBuf,
    context_lines: usize,
}

impl ModelDiffProducer {
    pub fn new(home: impl Into<PathBuf>, context_lines: usize) -> Self {
        Self {
            home: home.into(),
            context_lines,
        }
    }
}

impl DiffProducer for ModelDiffProducer {
    fn compute(&self, scope: &SyncScope, cancel: CancelCheck) -> Result<ChangeStream, BoxError> {
        let ids = match scope {
            SyncScope::All => known_instances_at(&self.home)?,
            SyncScope::InstanceIds(ids) => {
                for id in ids {
                    validate_instance_id(id)?;
                }
                ids.clone()
            }
        };
        tracing::debug!("diff over {} instance(s) for scope {}", ids.len(), scope.label());
        Ok(Box::new(InstanceDiffs {
            home: self.home.clone(),
            context_lines: self.context_lines,
            ids: ids.into_iter(),
            cancel,
        }))
    }
}

/// Lazily diffs one instance per `next()`.
struct InstanceDiffs {
    home: PathBuf,
    context_lines: usize,
    ids: std::collections::btree_set::IntoIter<InstanceId>,
    cancel: CancelCheck,
}

impl Iterator for InstanceDiffs {
    type Item = Result<ChangeRecord, BoxError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!("diff stopped early: cancellation requested");
                return None;
            }
            let id = self.ids.next()?;
            match diff_instance_at(&self.home, &id, self.context_lines) {
                Ok(Some(diff)) => {
                    tracing::debug!(
                        "{id}: +{} -{} permission(s)",
                        diff.added.len(),
                        diff.removed.len()
                    );
                    return Some(Ok(ChangeRecord::new(id, diff.unified_diff)));
                }
                Ok(None) => continue,
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}
