//! SQLite implementation of the `CalendarStore` port.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::CalendarStore;
use calsync_domain::{
    Calendar, ConflictKind, ConflictRecord, ConflictResolutionState, Event, EventMutation, Result,
    SyncEngineError, SyncResult, SyncStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Error as SqlError};
use tracing::{debug, instrument};

use super::manager::SqlitePool;
use crate::errors::InfraError;

fn ts(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

fn from_ts(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| SyncEngineError::Database(format!("timestamp out of range: {secs}")))
}

fn status_to_str(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Pending => "pending",
        SyncStatus::InProgress => "in_progress",
        SyncStatus::Success => "success",
        SyncStatus::Partial => "partial",
        SyncStatus::Failed => "failed",
    }
}

fn resolution_to_str(state: ConflictResolutionState) -> &'static str {
    match state {
        ConflictResolutionState::Unresolved => "unresolved",
        ConflictResolutionState::LocalWins => "local_wins",
        ConflictResolutionState::RemoteWins => "remote_wins",
        ConflictResolutionState::Merged => "merged",
    }
}

fn resolution_from_str(value: &str) -> Result<ConflictResolutionState> {
    match value {
        "unresolved" => Ok(ConflictResolutionState::Unresolved),
        "local_wins" => Ok(ConflictResolutionState::LocalWins),
        "remote_wins" => Ok(ConflictResolutionState::RemoteWins),
        "merged" => Ok(ConflictResolutionState::Merged),
        other => Err(SyncEngineError::Database(format!("unknown conflict resolution: {other}"))),
    }
}

fn kind_to_str(kind: ConflictKind) -> &'static str {
    match kind {
        ConflictKind::ModifiedOnBothSides => "modified_on_both_sides",
    }
}

fn kind_from_str(value: &str) -> Result<ConflictKind> {
    match value {
        "modified_on_both_sides" => Ok(ConflictKind::ModifiedOnBothSides),
        other => Err(SyncEngineError::Database(format!("unknown conflict kind: {other}"))),
    }
}

struct CalendarRow {
    id: String,
    user_id: String,
    provider: String,
    provider_calendar_id: String,
    last_synced_at: Option<i64>,
    sync_enabled: bool,
}

impl CalendarRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            provider: row.get(2)?,
            provider_calendar_id: row.get(3)?,
            last_synced_at: row.get(4)?,
            sync_enabled: row.get(5)?,
        })
    }

    fn into_calendar(self) -> Result<Calendar> {
        Ok(Calendar {
            id: self.id,
            user_id: self.user_id,
            provider: self.provider,
            provider_calendar_id: self.provider_calendar_id,
            last_synced_at: self.last_synced_at.map(from_ts).transpose()?,
            sync_enabled: self.sync_enabled,
        })
    }
}

struct EventRow {
    id: String,
    calendar_id: String,
    provider_event_id: Option<String>,
    title: String,
    description: Option<String>,
    location: Option<String>,
    start_ts: i64,
    end_ts: i64,
    is_all_day: bool,
    updated_at: i64,
    etag: Option<String>,
    deleted: bool,
}

impl EventRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            calendar_id: row.get(1)?,
            provider_event_id: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            location: row.get(5)?,
            start_ts: row.get(6)?,
            end_ts: row.get(7)?,
            is_all_day: row.get(8)?,
            updated_at: row.get(9)?,
            etag: row.get(10)?,
            deleted: row.get(11)?,
        })
    }

    fn into_event(self) -> Result<Event> {
        Ok(Event {
            id: self.id,
            calendar_id: self.calendar_id,
            provider_event_id: self.provider_event_id,
            title: self.title,
            description: self.description,
            location: self.location,
            start: from_ts(self.start_ts)?,
            end: from_ts(self.end_ts)?,
            all_day: self.is_all_day,
            updated_at: from_ts(self.updated_at)?,
            etag: self.etag,
            deleted: self.deleted,
        })
    }
}

const SELECT_CALENDAR: &str = "SELECT id, user_id, provider, provider_calendar_id,
        last_synced_at, sync_enabled
 FROM calendars";

const SELECT_EVENT: &str = "SELECT id, calendar_id, provider_event_id, title, description,
        location, start_ts, end_ts, is_all_day, updated_at, etag, deleted
 FROM events";

fn upsert_event_into(conn: &Connection, event: &Event) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO events (
            id, calendar_id, provider_event_id, title, description, location,
            start_ts, end_ts, is_all_day, updated_at, etag, deleted
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(id) DO UPDATE SET
            calendar_id = excluded.calendar_id,
            provider_event_id = excluded.provider_event_id,
            title = excluded.title,
            description = excluded.description,
            location = excluded.location,
            start_ts = excluded.start_ts,
            end_ts = excluded.end_ts,
            is_all_day = excluded.is_all_day,
            updated_at = excluded.updated_at,
            etag = excluded.etag,
            deleted = excluded.deleted",
        params![
            event.id,
            event.calendar_id,
            event.provider_event_id,
            event.title,
            event.description,
            event.location,
            ts(event.start),
            ts(event.end),
            event.all_day,
            ts(event.updated_at),
            event.etag,
            event.deleted,
        ],
    )
}

/// SQLite implementation of the calendar store.
pub struct SqliteCalendarStore {
    pool: Arc<SqlitePool>,
}

impl SqliteCalendarStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Insert or update a calendar record. Calendar lifecycle is owned by
    /// the surrounding application; the engine only advances `last_synced_at`.
    pub fn insert_calendar(&self, calendar: &Calendar) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO calendars (
                id, user_id, provider, provider_calendar_id, last_synced_at, sync_enabled
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                provider = excluded.provider,
                provider_calendar_id = excluded.provider_calendar_id,
                last_synced_at = excluded.last_synced_at,
                sync_enabled = excluded.sync_enabled",
            params![
                calendar.id,
                calendar.user_id,
                calendar.provider,
                calendar.provider_calendar_id,
                calendar.last_synced_at.map(ts),
                calendar.sync_enabled,
            ],
        )
        .map_err(InfraError::from)?;
        Ok(())
    }
}

#[async_trait]
impl CalendarStore for SqliteCalendarStore {
    async fn get_calendar(&self, calendar_id: &str) -> Result<Calendar> {
        let conn = self.pool.get()?;
        conn.query_row(
            &format!("{SELECT_CALENDAR} WHERE id = ?1"),
            params![calendar_id],
            CalendarRow::read,
        )
        .map_err(|error| match error {
            SqlError::QueryReturnedNoRows => {
                SyncEngineError::NotFound(format!("calendar {calendar_id}"))
            }
            other => InfraError::from(other).into(),
        })?
        .into_calendar()
    }

    async fn list_calendars_for_user(&self, user_id: &str) -> Result<Vec<Calendar>> {
        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare(&format!("{SELECT_CALENDAR} WHERE user_id = ?1 ORDER BY id"))
            .map_err(InfraError::from)?;
        let rows = stmt
            .query_map(params![user_id], CalendarRow::read)
            .map_err(InfraError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(InfraError::from)?;
        rows.into_iter().map(CalendarRow::into_calendar).collect()
    }

    async fn list_events(&self, calendar_id: &str) -> Result<Vec<Event>> {
        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare(&format!("{SELECT_EVENT} WHERE calendar_id = ?1 ORDER BY start_ts"))
            .map_err(InfraError::from)?;
        let rows = stmt
            .query_map(params![calendar_id], EventRow::read)
            .map_err(InfraError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(InfraError::from)?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    async fn get_event(&self, event_id: &str) -> Result<Event> {
        let conn = self.pool.get()?;
        conn.query_row(&format!("{SELECT_EVENT} WHERE id = ?1"), params![event_id], EventRow::read)
            .map_err(|error| match error {
                SqlError::QueryReturnedNoRows => {
                    SyncEngineError::NotFound(format!("event {event_id}"))
                }
                other => InfraError::from(other).into(),
            })?
            .into_event()
    }

    #[instrument(skip(self, event), fields(event_id = %event.id))]
    async fn upsert_event(&self, event: &Event) -> Result<()> {
        let conn = self.pool.get()?;
        upsert_event_into(&conn, event).map_err(InfraError::from)?;
        Ok(())
    }

    async fn delete_event(&self, event_id: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn
            .execute(
                "UPDATE events SET deleted = 1, updated_at = ?2 WHERE id = ?1",
                params![event_id, ts(Utc::now())],
            )
            .map_err(InfraError::from)?;
        if changed == 0 {
            return Err(SyncEngineError::NotFound(format!("event {event_id}")));
        }
        Ok(())
    }

    async fn update_last_sync(&self, calendar_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn
            .execute(
                "UPDATE calendars SET last_synced_at = ?2 WHERE id = ?1",
                params![calendar_id, ts(at)],
            )
            .map_err(InfraError::from)?;
        if changed == 0 {
            return Err(SyncEngineError::NotFound(format!("calendar {calendar_id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, mutations), fields(mutations = mutations.len()))]
    async fn apply_mutations(
        &self,
        calendar_id: &str,
        mutations: &[EventMutation],
        last_sync: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction().map_err(InfraError::from)?;

        for mutation in mutations {
            match mutation {
                EventMutation::Create(event) | EventMutation::Update(event) => {
                    upsert_event_into(&tx, event).map_err(InfraError::from)?;
                }
                // Push variants carry no local write.
                _ => {}
            }
        }

        let changed = tx
            .execute(
                "UPDATE calendars SET last_synced_at = ?2 WHERE id = ?1",
                params![calendar_id, ts(last_sync)],
            )
            .map_err(InfraError::from)?;
        if changed == 0 {
            // Dropping the transaction rolls the batch back.
            return Err(SyncEngineError::NotFound(format!("calendar {calendar_id}")));
        }

        tx.commit().map_err(InfraError::from)?;
        debug!(calendar_id, "applied mutation batch");
        Ok(())
    }

    async fn save_sync_result(&self, result: &SyncResult) -> Result<()> {
        let errors_json = serde_json::to_string(&result.errors).map_err(InfraError::from)?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction().map_err(InfraError::from)?;

        tx.execute(
            "INSERT INTO sync_results (
                id, calendar_id, started_at, finished_at, status,
                events_processed, events_created, events_updated, events_deleted, errors
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                finished_at = excluded.finished_at,
                status = excluded.status,
                events_processed = excluded.events_processed,
                events_created = excluded.events_created,
                events_updated = excluded.events_updated,
                events_deleted = excluded.events_deleted,
                errors = excluded.errors",
            params![
                result.id,
                result.calendar_id,
                ts(result.started_at),
                result.finished_at.map(ts),
                status_to_str(result.status),
                result.events_processed as i64,
                result.events_created as i64,
                result.events_updated as i64,
                result.events_deleted as i64,
                errors_json,
            ],
        )
        .map_err(InfraError::from)?;

        for conflict in &result.conflicts {
            let local_json = serde_json::to_string(&conflict.local).map_err(InfraError::from)?;
            let remote_json = serde_json::to_string(&conflict.remote).map_err(InfraError::from)?;
            tx.execute(
                "INSERT INTO sync_conflicts (
                    id, event_id, kind, local_snapshot, remote_snapshot, detected_at, resolution
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(id) DO NOTHING",
                params![
                    conflict.id,
                    conflict.event_id,
                    kind_to_str(conflict.kind),
                    local_json,
                    remote_json,
                    ts(conflict.detected_at),
                    resolution_to_str(conflict.resolution),
                ],
            )
            .map_err(InfraError::from)?;
        }

        tx.commit().map_err(InfraError::from)?;
        Ok(())
    }

    async fn get_conflict(&self, conflict_id: &str) -> Result<ConflictRecord> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT id, event_id, kind, local_snapshot, remote_snapshot,
                        detected_at, resolution
                 FROM sync_conflicts WHERE id = ?1",
                params![conflict_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .map_err(|error| match error {
                SqlError::QueryReturnedNoRows => {
                    SyncEngineError::NotFound(format!("conflict {conflict_id}"))
                }
                other => InfraError::from(other).into(),
            })?;

        let (id, event_id, kind, local_json, remote_json, detected_at, resolution) = row;
        Ok(ConflictRecord {
            id,
            event_id,
            kind: kind_from_str(&kind)?,
            local: serde_json::from_str(&local_json).map_err(InfraError::from)?,
            remote: serde_json::from_str(&remote_json).map_err(InfraError::from)?,
            detected_at: from_ts(detected_at)?,
            resolution: resolution_from_str(&resolution)?,
        })
    }

    async fn mark_conflict_resolved(
        &self,
        conflict_id: &str,
        state: ConflictResolutionState,
    ) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn
            .execute(
                "UPDATE sync_conflicts SET resolution = ?2 WHERE id = ?1",
                params![conflict_id, resolution_to_str(state)],
            )
            .map_err(InfraError::from)?;
        if changed == 0 {
            return Err(SyncEngineError::NotFound(format!("conflict {conflict_id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use calsync_domain::{DatabaseConfig, ExternalEvent};
    use tempfile::TempDir;

    use super::*;

    fn store() -> (SqliteCalendarStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("test.db").to_string_lossy().into_owned(),
            pool_size: 2,
        };
        let pool = Arc::new(SqlitePool::new(&config).unwrap());
        (SqliteCalendarStore::new(pool), dir)
    }

    fn instant(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_709_290_800 + secs, 0).unwrap()
    }

    fn calendar(id: &str) -> Calendar {
        Calendar {
            id: id.to_string(),
            user_id: "user-1".into(),
            provider: "google".into(),
            provider_calendar_id: "primary".into(),
            last_synced_at: Some(instant(0)),
            sync_enabled: true,
        }
    }

    fn event(id: &str, calendar_id: &str) -> Event {
        Event {
            id: id.to_string(),
            calendar_id: calendar_id.to_string(),
            provider_event_id: Some(format!("ext-{id}")),
            title: "Planning".into(),
            description: Some("weekly".into()),
            location: Some("Room 4".into()),
            start: instant(3_600),
            end: instant(7_200),
            all_day: false,
            updated_at: instant(100),
            etag: Some("v1".into()),
            deleted: false,
        }
    }

    #[tokio::test]
    async fn calendar_roundtrip_and_not_found() {
        let (store, _dir) = store();
        store.insert_calendar(&calendar("cal-1")).unwrap();

        let loaded = store.get_calendar("cal-1").await.unwrap();
        assert_eq!(loaded.user_id, "user-1");
        assert_eq!(loaded.last_synced_at, Some(instant(0)));
        assert!(loaded.sync_enabled);

        let missing = store.get_calendar("nope").await.unwrap_err();
        assert!(matches!(missing, SyncEngineError::NotFound(_)));

        let listed = store.list_calendars_for_user("user-1").await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn event_upsert_updates_in_place() {
        let (store, _dir) = store();
        store.insert_calendar(&calendar("cal-1")).unwrap();

        let mut ev = event("e1", "cal-1");
        store.upsert_event(&ev).await.unwrap();

        ev.title = "Planning (moved)".into();
        ev.etag = Some("v2".into());
        store.upsert_event(&ev).await.unwrap();

        let events = store.list_events("cal-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Planning (moved)");
        assert_eq!(events[0].etag.as_deref(), Some("v2"));
        assert_eq!(events[0].start, instant(3_600));
    }

    #[tokio::test]
    async fn delete_is_a_tombstone() {
        let (store, _dir) = store();
        store.insert_calendar(&calendar("cal-1")).unwrap();
        store.upsert_event(&event("e1", "cal-1")).await.unwrap();

        store.delete_event("e1").await.unwrap();

        // Tombstones stay visible to the reconciler.
        let events = store.list_events("cal-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].deleted);

        let missing = store.delete_event("nope").await.unwrap_err();
        assert!(matches!(missing, SyncEngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn apply_mutations_is_atomic_with_the_checkpoint() {
        let (store, _dir) = store();
        store.insert_calendar(&calendar("cal-1")).unwrap();

        let mutations = vec![
            EventMutation::Create(event("e1", "cal-1")),
            EventMutation::Create(event("e2", "cal-1")),
        ];
        store.apply_mutations("cal-1", &mutations, instant(500)).await.unwrap();

        assert_eq!(store.list_events("cal-1").await.unwrap().len(), 2);
        assert_eq!(
            store.get_calendar("cal-1").await.unwrap().last_synced_at,
            Some(instant(500))
        );
    }

    #[tokio::test]
    async fn apply_mutations_rolls_back_when_the_checkpoint_cannot_move() {
        let (store, _dir) = store();
        // No calendar row: the last-sync update fails after the batch.
        let mutations = vec![EventMutation::Create(event("e1", "ghost"))];

        let error = store.apply_mutations("ghost", &mutations, instant(500)).await.unwrap_err();
        assert!(matches!(error, SyncEngineError::NotFound(_)));

        // The event write was rolled back with it.
        assert!(store.list_events("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sync_results_and_conflicts_are_persisted() {
        let (store, _dir) = store();
        store.insert_calendar(&calendar("cal-1")).unwrap();

        let mut result = SyncResult::begin("cal-1", instant(0));
        let local = event("e1", "cal-1");
        let remote = ExternalEvent {
            id: "ext-e1".into(),
            title: "Planning".into(),
            description: None,
            location: None,
            start: instant(3_600),
            end: instant(7_200),
            all_day: false,
            updated_at: instant(200),
            etag: "v2".into(),
        };
        result.conflicts.push(ConflictRecord::modified_on_both_sides(local, remote));
        store.save_sync_result(&result).await.unwrap();

        // Finalize and save again under the same id.
        result.status = SyncStatus::Success;
        result.finished_at = Some(instant(10));
        store.save_sync_result(&result).await.unwrap();

        let conflict_id = result.conflicts[0].id.clone();
        let loaded = store.get_conflict(&conflict_id).await.unwrap();
        assert_eq!(loaded.event_id, "e1");
        assert_eq!(loaded.local.etag.as_deref(), Some("v1"));
        assert_eq!(loaded.remote.etag, "v2");
        assert_eq!(loaded.resolution, ConflictResolutionState::Unresolved);

        store
            .mark_conflict_resolved(&conflict_id, ConflictResolutionState::LocalWins)
            .await
            .unwrap();
        let resolved = store.get_conflict(&conflict_id).await.unwrap();
        assert_eq!(resolved.resolution, ConflictResolutionState::LocalWins);

        let missing = store.get_conflict("nope").await.unwrap_err();
        assert!(matches!(missing, SyncEngineError::NotFound(_)));
    }
}
