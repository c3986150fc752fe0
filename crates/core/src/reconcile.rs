//! Reconciler: remote/local diff for one calendar
//!
//! Pure logic. Input is the full local event set and the flattened remote
//! change stream for one calendar; output is the list of staged mutations
//! plus the conflicts that could not be auto-merged. Nothing here touches
//! storage or the network, which is what makes the tie-breaking rules easy
//! to test exhaustively.
//!
//! ## Conflict heuristic
//!
//! Etags answer "did the remote side change since I last saw it"; they say
//! nothing about ordering against local edits. When both sides changed since
//! the last sync, the two last-modified instants are compared: within the
//! configurable proximity window the edit order is not trustworthy and a
//! conflict is surfaced; a local edit newer by more than the window wins
//! outright and is pushed. This is a heuristic, not a proof of causal
//! ordering - calendar provider APIs expose no vector clocks or
//! server-authoritative sequence numbers to do better.

use std::collections::HashMap;

use calsync_domain::constants::DEFAULT_CONFLICT_PROXIMITY_SECS;
use calsync_domain::{
    Calendar, ConflictRecord, Event, EventMutation, ExternalEvent, ReconcileOutcome,
};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Tuning for the conflict heuristic.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Both-sides edits whose last-modified instants are within this many
    /// seconds of each other are surfaced as conflicts. Outside the window
    /// the newer side wins outright.
    pub proximity_window_secs: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { proximity_window_secs: DEFAULT_CONFLICT_PROXIMITY_SECS }
    }
}

/// Compare the remote change stream against local state and stage the
/// resulting mutations.
///
/// `remote_events` must be the complete flattened page set; callers abort
/// before reconciling when any page fetch failed.
pub fn reconcile(
    calendar: &Calendar,
    local_events: &[Event],
    remote_events: &[ExternalEvent],
    last_synced_at: Option<DateTime<Utc>>,
    config: &ReconcilerConfig,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    let by_provider_id: HashMap<&str, &Event> = local_events
        .iter()
        .filter_map(|event| event.provider_event_id.as_deref().map(|pid| (pid, event)))
        .collect();

    for remote in remote_events {
        match by_provider_id.get(remote.id.as_str()) {
            None => {
                // Never seen locally: remote create.
                outcome
                    .mutations
                    .push(EventMutation::Create(Event::from_external(&calendar.id, remote)));
            }
            Some(local) if local.deleted => {
                // Local deletion intent stands; the tombstone pass below
                // stages the remote delete.
            }
            Some(local) => {
                if local.etag.as_deref() == Some(remote.etag.as_str()) {
                    // Remote unchanged since last reconciliation.
                    continue;
                }

                let locally_modified =
                    last_synced_at.map_or(true, |cutoff| local.updated_at > cutoff);

                if !locally_modified {
                    outcome.mutations.push(EventMutation::Update(updated_from(local, remote)));
                    continue;
                }

                // Both sides changed since the last sync.
                let skew_secs = (local.updated_at - remote.updated_at).num_seconds();
                if skew_secs.abs() <= config.proximity_window_secs {
                    debug!(
                        event_id = %local.id,
                        skew_secs,
                        "both sides modified within proximity window"
                    );
                    outcome
                        .conflicts
                        .push(ConflictRecord::modified_on_both_sides((*local).clone(), remote.clone()));
                } else if skew_secs > 0 {
                    // Local edit clearly later: push local state outright.
                    outcome.mutations.push(EventMutation::PushUpdate((*local).clone()));
                } else {
                    // Remote edit clearly later: remote wins.
                    outcome.mutations.push(EventMutation::Update(updated_from(local, remote)));
                }
            }
        }
    }

    // Local-only passes: unpushed creates and tombstoned deletes.
    for local in local_events {
        if local.deleted {
            if let Some(provider_event_id) = &local.provider_event_id {
                outcome.mutations.push(EventMutation::PushDelete {
                    event_id: local.id.clone(),
                    provider_event_id: provider_event_id.clone(),
                });
            }
        } else if local.provider_event_id.is_none() {
            outcome.mutations.push(EventMutation::PushCreate(local.clone()));
        }
    }

    outcome
}

fn updated_from(local: &Event, remote: &ExternalEvent) -> Event {
    let mut updated = local.clone();
    updated.apply_external(remote);
    updated
}
