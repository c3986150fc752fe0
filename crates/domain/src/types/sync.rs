//! Sync results, conflicts, and staged mutations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SyncEngineError;
use crate::types::calendar::Event;
use crate::types::external::ExternalEvent;

/// Lifecycle of one sync pass. `Success`, `Partial`, and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Success,
    Partial,
    Failed,
}

impl SyncStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Partial | Self::Failed)
    }
}

/// One captured per-event failure inside an otherwise-continuing pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    /// Local event id when the failure is attributable to one event.
    pub event_id: Option<String>,
    /// Stable error class label (see `SyncEngineError::kind`).
    pub kind: String,
    pub message: String,
}

impl SyncErrorRecord {
    pub fn from_error(event_id: Option<String>, error: &SyncEngineError) -> Self {
        Self { event_id, kind: error.kind().to_string(), message: error.to_string() }
    }
}

/// Outcome of one sync pass, persisted for user-visible history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub id: String,
    pub calendar_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    /// Remote events examined during the pass.
    pub events_processed: usize,
    pub events_created: usize,
    pub events_updated: usize,
    pub events_deleted: usize,
    pub conflicts: Vec<ConflictRecord>,
    pub errors: Vec<SyncErrorRecord>,
}

impl SyncResult {
    /// Open a new in-progress result for a pass starting now.
    pub fn begin(calendar_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            calendar_id: calendar_id.to_string(),
            started_at,
            finished_at: None,
            status: SyncStatus::InProgress,
            events_processed: 0,
            events_created: 0,
            events_updated: 0,
            events_deleted: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Move to the `Failed` terminal state, recording the fatal error.
    pub fn fail(&mut self, error: &SyncEngineError) {
        self.status = SyncStatus::Failed;
        self.errors.push(SyncErrorRecord::from_error(None, error));
    }
}

/// Why a conflict record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Local and remote were both modified since the last sync, within the
    /// proximity window of each other.
    ModifiedOnBothSides,
}

/// Stored resolution state of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolutionState {
    Unresolved,
    LocalWins,
    RemoteWins,
    Merged,
}

/// A caller's decision for resolving one conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "resolution", content = "event", rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Push the local record to the provider.
    LocalWins,
    /// Overwrite the local record from the remote snapshot.
    RemoteWins,
    /// Apply a caller-supplied merged event locally and push it.
    Merged(Event),
}

/// A detected both-sides edit, holding both snapshots.
///
/// Created by the reconciler when it cannot safely auto-merge; resolved only
/// through an explicit `resolve_conflict` call, never silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: String,
    pub event_id: String,
    pub kind: ConflictKind,
    pub local: Event,
    pub remote: ExternalEvent,
    pub detected_at: DateTime<Utc>,
    pub resolution: ConflictResolutionState,
}

impl ConflictRecord {
    pub fn modified_on_both_sides(local: Event, remote: ExternalEvent) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            event_id: local.id.clone(),
            kind: ConflictKind::ModifiedOnBothSides,
            local,
            remote,
            detected_at: Utc::now(),
            resolution: ConflictResolutionState::Unresolved,
        }
    }
}

/// A staged mutation produced by the reconciler.
///
/// `Create`/`Update` are local store writes applied atomically as one batch;
/// the `Push*` variants are provider calls executed afterwards, each with its
/// own error scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EventMutation {
    /// Create a local record from a remote event.
    Create(Event),
    /// Overwrite a local record from a remote event.
    Update(Event),
    /// Push a locally created, never-pushed event to the provider.
    PushCreate(Event),
    /// Push local state over a stale remote copy (local edit clearly newer).
    PushUpdate(Event),
    /// Delete the remote copy of a locally tombstoned event.
    PushDelete { event_id: String, provider_event_id: String },
}

impl EventMutation {
    /// Whether this mutation writes to the local store during batch apply.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Create(_) | Self::Update(_))
    }
}

/// Everything one reconciliation pass staged.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub mutations: Vec<EventMutation>,
    pub conflicts: Vec<ConflictRecord>,
}
