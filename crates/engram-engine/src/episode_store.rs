//! Episode Store
//!
//! Persistence for episodes. Episodes are immutable once created except for
//! the processed marker set when reconciliation consumes them.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use engram_core::Episode;

use crate::error::EngineResult;
use crate::partition::Partition;

/// Episode store for one partition
pub struct EpisodeStore {
    partition: Partition,
}

impl EpisodeStore {
    pub fn new(partition: Partition) -> Self {
        Self { partition }
    }

    /// Episodes not yet consumed by reconciliation, oldest first
    pub async fn fetch_unprocessed(&self, limit: usize) -> EngineResult<Vec<Episode>> {
        let db = self.partition.db().read().await;
        let mut stmt = db.prepare(
            "SELECT id, project_id, user_id, session_id, started_at, ended_at, event_count, summary, importance, created_at, source_event_ids_json, processed_at
             FROM episodes WHERE processed_at IS NULL ORDER BY started_at ASC, id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_episode)?;

        let mut episodes = Vec::new();
        for row in rows {
            episodes.push(row?);
        }
        Ok(episodes)
    }

    /// Get an episode by id
    pub async fn get(&self, id: &str) -> EngineResult<Option<Episode>> {
        let db = self.partition.db().read().await;
        let result = db.query_row(
            "SELECT id, project_id, user_id, session_id, started_at, ended_at, event_count, summary, importance, created_at, source_event_ids_json, processed_at
             FROM episodes WHERE id = ?1",
            params![id],
            row_to_episode,
        );
        match result {
            Ok(episode) => Ok(Some(episode)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Set the processed marker; idempotent
    pub async fn mark_processed(&self, id: &str, at: DateTime<Utc>) -> EngineResult<usize> {
        let db = self.partition.db().write().await;
        Ok(mark_processed_in(&db, id, at)?)
    }
}

/// Insert an episode inside an existing transaction.
pub(crate) fn insert_in(conn: &Connection, episode: &Episode) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO episodes
         (id, project_id, user_id, session_id, started_at, ended_at, event_count, summary, importance, created_at, source_event_ids_json, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL)",
        params![
            &episode.id,
            &episode.project_id,
            &episode.user_id,
            &episode.session_id,
            episode.started_at.timestamp_millis(),
            episode.ended_at.timestamp_millis(),
            episode.event_count as i64,
            &episode.summary,
            episode.importance,
            episode.created_at.timestamp_millis(),
            serde_json::to_string(&episode.source_event_ids)?,
        ],
    )?;
    Ok(())
}

/// Mark an episode processed inside an existing transaction.
pub(crate) fn mark_processed_in(
    conn: &Connection,
    id: &str,
    at: DateTime<Utc>,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE episodes SET processed_at = ?1 WHERE id = ?2 AND processed_at IS NULL",
        params![at.timestamp_millis(), id],
    )
}

fn row_to_episode(row: &Row) -> rusqlite::Result<Episode> {
    let source_event_ids_json: String = row.get(10)?;
    Ok(Episode {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        session_id: row.get(3)?,
        started_at: DateTime::from_timestamp_millis(row.get::<_, i64>(4)?).unwrap_or_default(),
        ended_at: DateTime::from_timestamp_millis(row.get::<_, i64>(5)?).unwrap_or_default(),
        event_count: row.get::<_, i64>(6)? as usize,
        summary: row.get(7)?,
        importance: row.get(8)?,
        created_at: DateTime::from_timestamp_millis(row.get::<_, i64>(9)?).unwrap_or_default(),
        source_event_ids: serde_json::from_str(&source_event_ids_json).unwrap_or_default(),
        processed_at: row
            .get::<_, Option<i64>>(11)?
            .and_then(DateTime::from_timestamp_millis),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn episode(id: &str, hour: u32) -> Episode {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap();
        Episode {
            id: id.into(),
            project_id: "/proj/a".into(),
            user_id: Some("u-1".into()),
            session_id: Some("s-1".into()),
            started_at: at,
            ended_at: at + chrono::Duration::minutes(30),
            event_count: 4,
            summary: "debugging auth".into(),
            importance: 0.6,
            created_at: at,
            source_event_ids: vec!["e1".into(), "e2".into(), "e3".into(), "e4".into()],
            processed_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_fetch_mark() {
        let partition = Partition::in_memory("/proj/a").unwrap();
        let store = EpisodeStore::new(partition.clone());

        {
            let db = partition.db().write().await;
            insert_in(&db, &episode("ep-2", 14)).unwrap();
            insert_in(&db, &episode("ep-1", 9)).unwrap();
        }

        let unprocessed = store.fetch_unprocessed(10).await.unwrap();
        assert_eq!(unprocessed.len(), 2);
        // Oldest first
        assert_eq!(unprocessed[0].id, "ep-1");
        assert_eq!(unprocessed[0].source_event_ids.len(), 4);

        let at = Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap();
        assert_eq!(store.mark_processed("ep-1", at).await.unwrap(), 1);
        assert_eq!(store.mark_processed("ep-1", at).await.unwrap(), 0);

        let remaining = store.fetch_unprocessed(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "ep-2");

        let done = store.get("ep-1").await.unwrap().unwrap();
        assert_eq!(done.processed_at.unwrap(), at);
    }
}
