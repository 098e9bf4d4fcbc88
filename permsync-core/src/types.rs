//! Domain types shared by the coordinator, the collaborators and the daemon.
//!
//! Identifiers are newtypes over `String`; everything serializes with serde so
//! snapshots can cross the daemon socket unchanged.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of an instance whose permission state is reconciled.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    /// Fresh random (UUID v4) identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ExecutionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a batch job started by a change applier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Scope and change records
// ---------------------------------------------------------------------------

/// What a reconciliation check runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "instances", rename_all = "snake_case")]
pub enum SyncScope {
    /// Every known instance.
    All,
    /// An explicit, deduplicated set of instances.
    InstanceIds(BTreeSet<InstanceId>),
}

impl SyncScope {
    pub fn instances<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<InstanceId>,
    {
        SyncScope::InstanceIds(ids.into_iter().map(Into::into).collect())
    }

    pub fn label(&self) -> String {
        match self {
            SyncScope::All => "all".to_string(),
            SyncScope::InstanceIds(ids) => ids
                .iter()
                .map(|id| id.0.as_str())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// One pending change. `description` is opaque to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub subject_id: InstanceId,
    pub description: String,
}

impl ChangeRecord {
    pub fn new(subject_id: impl Into<InstanceId>, description: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            description: description.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution status and snapshots
// ---------------------------------------------------------------------------

/// Lifecycle of one execution. `Failed` is the terminal failure state; it
/// counts as cancelled for every caller-visible purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Done,
    Cancelled,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    /// Running or Done: the states that hold the single-flight slot.
    pub fn is_active(self) -> bool {
        matches!(self, ExecutionStatus::Running | ExecutionStatus::Done)
    }

    pub fn is_cancelled(self) -> bool {
        matches!(self, ExecutionStatus::Cancelled | ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Done => write!(f, "done"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Read-only copy of an execution handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub id: ExecutionId,
    pub scope: SyncScope,
    pub status: ExecutionStatus,
    pub changes: Vec<ChangeRecord>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ExecutionSnapshot {
    pub fn is_done(&self) -> bool {
        self.status == ExecutionStatus::Done
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.is_cancelled()
    }

    pub fn subject_ids(&self) -> Vec<InstanceId> {
        self.changes.iter().map(|c| c.subject_id.clone()).collect()
    }
}

/// Result of confirming an execution or syncing instances directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "jobId", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Dispatched(JobId),
    NoChanges,
}

impl ApplyOutcome {
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            ApplyOutcome::Dispatched(id) => Some(id),
            ApplyOutcome::NoChanges => None,
        }
    }
}

/// Progress of a batch apply job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobStatus {
    Running { total: usize },
    Completed { applied: usize },
    Failed { message: String },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Running { .. })
    }
}

// ---------------------------------------------------------------------------
// Authoritative permission model
// ---------------------------------------------------------------------------

/// One granted role for one authority (user or group) on an instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub authority: String,
    pub role: String,
}

impl PermissionEntry {
    pub fn new(authority: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
            role: role.into(),
        }
    }
}

impl fmt::Display for PermissionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.authority, self.role)
    }
}

/// Authoritative permissions of one instance, as stored in the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancePermissions {
    pub instance: InstanceId,
    #[serde(default)]
    pub entries: Vec<PermissionEntry>,
    pub updated_at: DateTime<Utc>,
}

impl InstancePermissions {
    pub fn empty(instance: InstanceId) -> Self {
        Self {
            instance,
            entries: vec![],
            updated_at: Utc::now(),
        }
    }

    /// Sort and deduplicate entries so renderings are stable.
    pub fn normalize(&mut self) {
        self.entries.sort();
        self.entries.dedup();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(InstanceId::from("emf:1").to_string(), "emf:1");
        assert_eq!(JobId::from("job-1").to_string(), "job-1");
    }

    #[test]
    fn generated_execution_ids_are_unique() {
        assert_ne!(ExecutionId::generate(), ExecutionId::generate());
    }

    #[test]
    fn scope_deduplicates_and_orders_ids() {
        let scope = SyncScope::instances(["b", "a", "b"]);
        assert_eq!(scope.label(), "a,b");
        assert_eq!(SyncScope::All.label(), "all");
    }

    #[test]
    fn failed_counts_as_cancelled_but_not_active() {
        assert!(ExecutionStatus::Failed.is_cancelled());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Failed.is_active());
        assert!(ExecutionStatus::Done.is_active());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn change_record_serializes_camel_case() {
        let yaml = to_yaml(&ChangeRecord::new("emf:1", "+admin=manager"));
        assert!(yaml.contains("subjectId"), "got: {yaml}");
    }

    #[test]
    fn normalize_sorts_and_dedups_entries() {
        let mut perms = InstancePermissions::empty(InstanceId::from("emf:1"));
        perms.entries = vec![
            PermissionEntry::new("bob", "viewer"),
            PermissionEntry::new("alice", "manager"),
            PermissionEntry::new("bob", "viewer"),
        ];
        perms.normalize();
        assert_eq!(perms.entries.len(), 2);
        assert_eq!(perms.entries[0].to_string(), "alice=manager");
    }

    fn to_yaml<T: Serialize>(value: &T) -> String {
        serde_yaml::to_string(value).expect("serialize")
    }
}
