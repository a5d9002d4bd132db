//! Event Store
//!
//! Append-only, deduplicated record of raw activity for one partition.
//! Events are never deleted; the only mutation is the processed marker set
//! when the segmenter consumes them.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use engram_core::{Event, EventKind, NewEvent};

use crate::error::{EngineError, EngineResult};
use crate::partition::Partition;

/// Result of recording an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Stored under the returned id
    Inserted(String),
    /// Same canonical hash already present in this partition; dropped silently
    Duplicate,
}

/// Event store for one partition
pub struct EventStore {
    partition: Partition,
}

impl EventStore {
    pub fn new(partition: Partition) -> Self {
        Self { partition }
    }

    /// Record a raw event. A second insert with the same canonical hash in
    /// the same project partition is a no-op, not an error.
    pub async fn record(&self, input: NewEvent) -> EngineResult<RecordOutcome> {
        let id = Uuid::new_v4().to_string();
        let dedup_hash = input.dedup_hash();

        let db = self.partition.db().write().await;
        let changed = db.execute(
            "INSERT OR IGNORE INTO events
             (id, project_id, user_id, source, session_id, timestamp, kind, content, file_paths_json, dedup_hash, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL)",
            params![
                &id,
                &input.project_id,
                &input.user_id,
                &input.source,
                &input.session_id,
                input.timestamp.timestamp_millis(),
                input.kind.as_str(),
                &input.content,
                serde_json::to_string(&input.file_paths)?,
                &dedup_hash,
            ],
        )?;

        if changed == 0 {
            tracing::debug!(project_id = %input.project_id, hash = %dedup_hash, "duplicate event dropped");
            Ok(RecordOutcome::Duplicate)
        } else {
            Ok(RecordOutcome::Inserted(id))
        }
    }

    /// Events with a null processed marker, timestamp ascending, capped at
    /// `limit`.
    pub async fn fetch_unprocessed(&self, limit: usize) -> EngineResult<Vec<Event>> {
        let db = self.partition.db().read().await;
        let mut stmt = db.prepare(
            "SELECT id, project_id, user_id, source, session_id, timestamp, kind, content, file_paths_json, dedup_hash, processed_at
             FROM events WHERE processed_at IS NULL ORDER BY timestamp ASC, id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_event)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Get an event by id
    pub async fn get(&self, id: &str) -> EngineResult<Option<Event>> {
        let db = self.partition.db().read().await;
        let result = db.query_row(
            "SELECT id, project_id, user_id, source, session_id, timestamp, kind, content, file_paths_json, dedup_hash, processed_at
             FROM events WHERE id = ?1",
            params![id],
            row_to_event,
        );
        match result {
            Ok(event) => Ok(Some(event)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Set the processed marker. Idempotent: re-marking an already-processed
    /// event is a no-op.
    pub async fn mark_processed(&self, ids: &[String], at: DateTime<Utc>) -> EngineResult<usize> {
        let db = self.partition.db().write().await;
        Ok(mark_processed_in(&db, ids, at)?)
    }

    /// Total events in this partition; the staleness counter for views.
    pub async fn count(&self) -> EngineResult<i64> {
        let db = self.partition.db().read().await;
        Ok(count_in(&db)?)
    }
}

/// Mark events processed inside an existing transaction.
pub(crate) fn mark_processed_in(
    conn: &Connection,
    ids: &[String],
    at: DateTime<Utc>,
) -> rusqlite::Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }

    let placeholders: Vec<&str> = ids.iter().map(|_| "?").collect();
    let sql = format!(
        "UPDATE events SET processed_at = ? WHERE id IN ({}) AND processed_at IS NULL",
        placeholders.join(",")
    );

    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(at.timestamp_millis())];
    for id in ids {
        params_vec.push(Box::new(id.clone()));
    }
    let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

    conn.execute(&sql, param_refs.as_slice())
}

/// Event count inside an existing transaction.
pub(crate) fn count_in(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
}

fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    let kind_str: String = row.get(6)?;
    let file_paths_json: String = row.get(8)?;
    Ok(Event {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        source: row.get(3)?,
        session_id: row.get(4)?,
        timestamp: DateTime::from_timestamp_millis(row.get::<_, i64>(5)?).unwrap_or_default(),
        kind: EventKind::from_str(&kind_str).unwrap_or(EventKind::Message),
        content: row.get(7)?,
        file_paths: serde_json::from_str(&file_paths_json).unwrap_or_default(),
        dedup_hash: row.get(9)?,
        processed_at: row
            .get::<_, Option<i64>>(10)?
            .and_then(DateTime::from_timestamp_millis),
    })
}

/// Fetch events by id, preserving the requested order.
pub(crate) fn fetch_by_ids(conn: &Connection, ids: &[String]) -> EngineResult<Vec<Event>> {
    let mut events = Vec::with_capacity(ids.len());
    for id in ids {
        let event = conn
            .query_row(
                "SELECT id, project_id, user_id, source, session_id, timestamp, kind, content, file_paths_json, dedup_hash, processed_at
                 FROM events WHERE id = ?1",
                params![id],
                row_to_event,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => EngineError::not_found("Event", id),
                other => EngineError::from(other),
            })?;
        events.push(event);
    }
    Ok(events)
}

/// Union of file paths touched by the given events. Ids with no row in
/// this partition are skipped, not errors.
pub(crate) fn file_paths_for(conn: &Connection, ids: &[String]) -> rusqlite::Result<Vec<String>> {
    use rusqlite::OptionalExtension;

    let mut paths = Vec::new();
    for id in ids {
        let raw: Option<String> = conn
            .query_row(
                "SELECT file_paths_json FROM events WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(raw) = raw {
            if let Ok(mut decoded) = serde_json::from_str::<Vec<String>>(&raw) {
                paths.append(&mut decoded);
            }
        }
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_event(content: &str, minute: u32) -> NewEvent {
        NewEvent {
            project_id: "/proj/a".into(),
            user_id: Some("u-1".into()),
            source: "terminal".into(),
            session_id: Some("s-1".into()),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 10, minute, 0).unwrap(),
            kind: EventKind::Command,
            content: content.into(),
            file_paths: vec!["src/main.rs".into()],
        }
    }

    async fn store() -> EventStore {
        EventStore::new(Partition::in_memory("/proj/a").unwrap())
    }

    #[tokio::test]
    async fn test_record_and_fetch() {
        let store = store().await;

        let outcome = store.record(new_event("cargo build", 0)).await.unwrap();
        assert!(matches!(outcome, RecordOutcome::Inserted(_)));

        let events = store.fetch_unprocessed(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content, "cargo build");
        assert!(events[0].processed_at.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_is_silently_dropped() {
        let store = store().await;

        store.record(new_event("cargo build", 0)).await.unwrap();
        // Identical canonical fields: same hash, dropped
        let outcome = store.record(new_event("cargo build", 0)).await.unwrap();
        assert_eq!(outcome, RecordOutcome::Duplicate);

        let events = store.fetch_unprocessed(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_whitespace_variant_is_duplicate() {
        let store = store().await;

        store.record(new_event("cargo build", 0)).await.unwrap();
        let outcome = store.record(new_event("  CARGO   build ", 2)).await.unwrap();
        // Folded content and same 5-minute bucket
        assert_eq!(outcome, RecordOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_fetch_ordering_and_limit() {
        let store = store().await;

        store.record(new_event("third", 30)).await.unwrap();
        store.record(new_event("first", 0)).await.unwrap();
        store.record(new_event("second", 15)).await.unwrap();

        let events = store.fetch_unprocessed(2).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].content, "first");
        assert_eq!(events[1].content, "second");
    }

    #[tokio::test]
    async fn test_mark_processed_idempotent() {
        let store = store().await;

        let RecordOutcome::Inserted(id) = store.record(new_event("x", 0)).await.unwrap() else {
            panic!("expected insert");
        };

        let at = Utc.with_ymd_and_hms(2025, 3, 1, 11, 0, 0).unwrap();
        let marked = store.mark_processed(&[id.clone()], at).await.unwrap();
        assert_eq!(marked, 1);

        // Re-marking is a no-op
        let later = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let marked = store.mark_processed(&[id.clone()], later).await.unwrap();
        assert_eq!(marked, 0);

        let event = store.get(&id).await.unwrap().unwrap();
        assert_eq!(event.processed_at.unwrap(), at);
        assert!(store.fetch_unprocessed(10).await.unwrap().is_empty());
    }
}
