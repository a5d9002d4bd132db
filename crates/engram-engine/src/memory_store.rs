//! Memory Item Store
//!
//! Row mapping and queries for long-term memory items. All writes happen
//! inside reconciliation transactions via the `*_in` helpers; the async
//! methods on [`MemoryStore`] are read-only.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use engram_core::{AnchorKey, MemoryItem, MemoryKind, MemoryScope};

use crate::error::EngineResult;
use crate::partition::Partition;

const ITEM_COLUMNS: &str = "id, project_id, user_id, scope, kind, key, content, tags_json, importance, created_at, updated_at, source_episode_id, source_event_ids_json, embedding_json, related_ids_json, use_count, deleted";

/// Read filter for memory items
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub kinds: Option<Vec<MemoryKind>>,
    pub scope: Option<MemoryScope>,
    pub tag: Option<String>,
    pub include_deleted: bool,
    pub limit: Option<usize>,
}

/// Memory item store for one partition
pub struct MemoryStore {
    partition: Partition,
}

impl MemoryStore {
    pub fn new(partition: Partition) -> Self {
        Self { partition }
    }

    /// Get an item by id
    pub async fn get(&self, id: &str) -> EngineResult<Option<MemoryItem>> {
        let db = self.partition.db().read().await;
        let result = db.query_row(
            &format!("SELECT {ITEM_COLUMNS} FROM memory_items WHERE id = ?1"),
            params![id],
            row_to_item,
        );
        match result {
            Ok(item) => Ok(Some(item)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All active rows at an anchor, most recently updated first.
    ///
    /// More than one row is the documented ADD_NEW multiplicity case;
    /// views take the head, search surfaces all of them.
    pub async fn active_by_anchor(&self, anchor: &AnchorKey) -> EngineResult<Vec<MemoryItem>> {
        let db = self.partition.db().read().await;
        Ok(active_by_anchor_in(&db, anchor)?)
    }

    /// Query items with filters, importance then recency ordering
    pub async fn list(&self, filter: &ItemFilter) -> EngineResult<Vec<MemoryItem>> {
        let db = self.partition.db().read().await;

        let mut sql = format!("SELECT {ITEM_COLUMNS} FROM memory_items WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.include_deleted {
            sql.push_str(" AND deleted = 0");
        }

        if let Some(ref kinds) = filter.kinds {
            if !kinds.is_empty() {
                let placeholders: Vec<&str> = kinds.iter().map(|_| "?").collect();
                sql.push_str(&format!(" AND kind IN ({})", placeholders.join(",")));
                for kind in kinds {
                    params_vec.push(Box::new(kind.as_str().to_string()));
                }
            }
        }

        if let Some(scope) = filter.scope {
            sql.push_str(" AND scope = ?");
            params_vec.push(Box::new(scope.as_str().to_string()));
        }

        sql.push_str(" ORDER BY importance DESC, updated_at DESC, id ASC");

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let param_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), row_to_item)?;

        let mut items = Vec::new();
        for row in rows {
            let item: MemoryItem = row?;
            // Tag filtering happens after the JSON column is decoded
            if let Some(ref tag) = filter.tag {
                if !item.tags.iter().any(|t| t == tag) {
                    continue;
                }
            }
            items.push(item);
        }
        Ok(items)
    }

    /// Active items grouped by kind
    pub async fn list_grouped(&self) -> EngineResult<BTreeMap<String, Vec<MemoryItem>>> {
        let items = self.list(&ItemFilter::default()).await?;
        let mut grouped: BTreeMap<String, Vec<MemoryItem>> = BTreeMap::new();
        for item in items {
            grouped.entry(item.kind.as_str().to_string()).or_default().push(item);
        }
        Ok(grouped)
    }
}

/// Insert a new active item inside an existing transaction.
pub(crate) fn insert_in(conn: &Connection, item: &MemoryItem) -> EngineResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO memory_items ({ITEM_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        ),
        params![
            &item.id,
            &item.project_id,
            &item.user_id,
            item.scope.as_str(),
            item.kind.as_str(),
            &item.key,
            &item.content,
            serde_json::to_string(&item.tags)?,
            item.importance,
            item.created_at.timestamp_millis(),
            item.updated_at.timestamp_millis(),
            &item.source_episode_id,
            serde_json::to_string(&item.source_event_ids)?,
            item.embedding
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            serde_json::to_string(&item.related_ids)?,
            item.use_count,
            item.deleted as i64,
        ],
    )?;
    Ok(())
}

/// All active rows in the partition, for the oracle's existing-memory
/// snapshot.
pub(crate) fn active_in(conn: &Connection) -> rusqlite::Result<Vec<MemoryItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM memory_items WHERE deleted = 0
         ORDER BY importance DESC, updated_at DESC, id ASC"
    ))?;
    let rows = stmt.query_map([], row_to_item)?;
    rows.collect()
}

/// Active rows at an anchor inside an existing transaction, most recently
/// updated first.
pub(crate) fn active_by_anchor_in(
    conn: &Connection,
    anchor: &AnchorKey,
) -> rusqlite::Result<Vec<MemoryItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM memory_items
         WHERE project_id = ?1 AND kind = ?2 AND key = ?3 AND scope = ?4
           AND (user_id = ?5 OR (user_id IS NULL AND ?5 IS NULL))
           AND deleted = 0
         ORDER BY updated_at DESC, id ASC"
    ))?;
    let rows = stmt.query_map(
        params![
            &anchor.project_id,
            anchor.kind.as_str(),
            &anchor.key,
            anchor.scope.as_str(),
            &anchor.user_id,
        ],
        row_to_item,
    )?;
    rows.collect()
}

/// Merge candidate data into an existing row inside a transaction: content
/// replaced with the merged text, importance taken verbatim, `updated_at`
/// bumped, source event ids and tags unioned without duplication.
pub(crate) fn update_in(
    conn: &Connection,
    target_id: &str,
    merged_content: &str,
    importance: f64,
    new_tags: &[String],
    new_source_event_ids: &[String],
    now: DateTime<Utc>,
) -> EngineResult<()> {
    let (tags_json, sources_json): (String, String) = conn.query_row(
        "SELECT tags_json, source_event_ids_json FROM memory_items WHERE id = ?1",
        params![target_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let mut tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    for tag in new_tags {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }

    let mut sources: Vec<String> = serde_json::from_str(&sources_json).unwrap_or_default();
    for id in new_source_event_ids {
        if !sources.contains(id) {
            sources.push(id.clone());
        }
    }

    conn.execute(
        "UPDATE memory_items
         SET content = ?1, importance = ?2, tags_json = ?3, source_event_ids_json = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            merged_content,
            importance,
            serde_json::to_string(&tags)?,
            serde_json::to_string(&sources)?,
            now.timestamp_millis(),
            target_id,
        ],
    )?;
    Ok(())
}

/// Set the soft-delete flag inside a transaction. Rows are never hard-deleted.
pub(crate) fn soft_delete_in(
    conn: &Connection,
    id: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE memory_items SET deleted = 1, updated_at = ?1 WHERE id = ?2",
        params![now.timestamp_millis(), id],
    )
}

/// Bump the use count of a re-confirmed fact inside a transaction.
pub(crate) fn reinforce_in(
    conn: &Connection,
    id: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE memory_items SET use_count = use_count + 1, updated_at = ?1 WHERE id = ?2",
        params![now.timestamp_millis(), id],
    )
}

fn row_to_item(row: &Row) -> rusqlite::Result<MemoryItem> {
    let scope_str: String = row.get(3)?;
    let kind_str: String = row.get(4)?;
    let tags_json: String = row.get(7)?;
    let sources_json: String = row.get(12)?;
    let embedding_json: Option<String> = row.get(13)?;
    let related_json: String = row.get(14)?;

    Ok(MemoryItem {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        scope: MemoryScope::from_str(&scope_str).unwrap_or(MemoryScope::Project),
        kind: MemoryKind::from_str(&kind_str).unwrap_or(MemoryKind::ProjectFact),
        key: row.get(5)?,
        content: row.get(6)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        importance: row.get(8)?,
        created_at: DateTime::from_timestamp_millis(row.get::<_, i64>(9)?).unwrap_or_default(),
        updated_at: DateTime::from_timestamp_millis(row.get::<_, i64>(10)?).unwrap_or_default(),
        source_episode_id: row.get(11)?,
        source_event_ids: serde_json::from_str(&sources_json).unwrap_or_default(),
        embedding: embedding_json.and_then(|s| serde_json::from_str(&s).ok()),
        related_ids: serde_json::from_str(&related_json).unwrap_or_default(),
        use_count: row.get(15)?,
        deleted: row.get::<_, i64>(16)? != 0,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn item(id: &str, kind: MemoryKind, key: &str, content: &str) -> MemoryItem {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        MemoryItem {
            id: id.into(),
            project_id: "/proj/a".into(),
            user_id: None,
            scope: kind.default_scope(),
            kind,
            key: key.into(),
            content: content.into(),
            tags: vec!["backend".into()],
            importance: 0.8,
            created_at: at,
            updated_at: at,
            source_episode_id: Some("ep-1".into()),
            source_event_ids: vec!["e1".into()],
            embedding: None,
            related_ids: vec![],
            use_count: 1,
            deleted: false,
        }
    }

    #[tokio::test]
    async fn test_insert_and_anchor_lookup() {
        let partition = Partition::in_memory("/proj/a").unwrap();
        let store = MemoryStore::new(partition.clone());

        let fact = item("m-1", MemoryKind::ProjectFact, "framework", "FastAPI");
        {
            let db = partition.db().write().await;
            insert_in(&db, &fact).unwrap();
        }

        let rows = store.active_by_anchor(&fact.anchor()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "FastAPI");
        assert_eq!(rows[0].tags, vec!["backend".to_string()]);

        // Soft-deleted rows vanish from anchor lookups
        {
            let db = partition.db().write().await;
            soft_delete_in(&db, "m-1", Utc::now()).unwrap();
        }
        assert!(store.active_by_anchor(&fact.anchor()).await.unwrap().is_empty());

        // But the row itself survives
        let raw = store.get("m-1").await.unwrap().unwrap();
        assert!(raw.deleted);
    }

    #[tokio::test]
    async fn test_update_unions_sources_and_tags() {
        let partition = Partition::in_memory("/proj/a").unwrap();
        let store = MemoryStore::new(partition.clone());

        let fact = item("m-1", MemoryKind::ProjectFact, "framework", "FastAPI");
        let now = Utc.with_ymd_and_hms(2025, 3, 2, 9, 0, 0).unwrap();
        {
            let db = partition.db().write().await;
            insert_in(&db, &fact).unwrap();
            update_in(
                &db,
                "m-1",
                "FastAPI + async SQLAlchemy",
                0.9,
                &["backend".into(), "db".into()],
                &["e1".into(), "e2".into()],
                now,
            )
            .unwrap();
        }

        let updated = store.get("m-1").await.unwrap().unwrap();
        assert_eq!(updated.content, "FastAPI + async SQLAlchemy");
        assert_eq!(updated.importance, 0.9);
        assert_eq!(updated.updated_at, now);
        assert_eq!(updated.tags, vec!["backend".to_string(), "db".to_string()]);
        assert_eq!(updated.source_event_ids, vec!["e1".to_string(), "e2".to_string()]);
    }

    #[tokio::test]
    async fn test_list_filters_and_grouping() {
        let partition = Partition::in_memory("/proj/a").unwrap();
        let store = MemoryStore::new(partition.clone());

        {
            let db = partition.db().write().await;
            insert_in(&db, &item("m-1", MemoryKind::ProjectFact, "framework", "FastAPI")).unwrap();
            insert_in(&db, &item("m-2", MemoryKind::Pitfall, "migrations", "never squash")).unwrap();
            insert_in(&db, &item("m-3", MemoryKind::Recipe, "deploy", "make deploy")).unwrap();
        }

        let filter = ItemFilter {
            kinds: Some(vec![MemoryKind::Pitfall]),
            ..Default::default()
        };
        let pitfalls = store.list(&filter).await.unwrap();
        assert_eq!(pitfalls.len(), 1);
        assert_eq!(pitfalls[0].key, "migrations");

        let grouped = store.list_grouped().await.unwrap();
        assert_eq!(grouped.len(), 3);
        assert!(grouped.contains_key("project_fact"));
        assert!(grouped.contains_key("pitfall"));
        assert!(grouped.contains_key("recipe"));
    }

    #[tokio::test]
    async fn test_reinforce_bumps_use_count() {
        let partition = Partition::in_memory("/proj/a").unwrap();
        let store = MemoryStore::new(partition.clone());

        {
            let db = partition.db().write().await;
            insert_in(&db, &item("m-1", MemoryKind::UserStyle, "emoji", "never use emoji")).unwrap();
            reinforce_in(&db, "m-1", Utc::now()).unwrap();
            reinforce_in(&db, "m-1", Utc::now()).unwrap();
        }

        let style = store.get("m-1").await.unwrap().unwrap();
        assert_eq!(style.use_count, 3);
    }
}
