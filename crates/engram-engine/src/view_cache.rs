//! Cached Views
//!
//! Lazily regenerated, oracle-summarized views over long-term memory. A
//! read consults `view_meta` only: the payload regenerates when it has
//! never been built, its TTL expired, or enough new events arrived since
//! generation. Payload and meta persist together, so a reader never sees a
//! payload newer than its staleness record.
//!
//! A failed regeneration falls back to the last good payload when one
//! exists; staleness is then rechecked on the next read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use engram_core::{ExtractionOracle, MemoryItem, MemoryKind, ViewConfig, ViewPolicy};

use crate::error::{EngineError, EngineResult};
use crate::event_store;
use crate::memory_store::{ItemFilter, MemoryStore};
use crate::partition::Partition;

/// The three engine-defined views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewName {
    /// User communication/working style (user-scoped items)
    Style,
    /// Project brief: facts and recipes
    Brief,
    /// Known pitfalls
    Pitfalls,
}

impl ViewName {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "style" => Some(Self::Style),
            "brief" => Some(Self::Brief),
            "pitfalls" => Some(Self::Pitfalls),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Style => "style",
            Self::Brief => "brief",
            Self::Pitfalls => "pitfalls",
        }
    }
}

impl std::fmt::Display for ViewName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Staleness record for one cached view
#[derive(Debug, Clone)]
pub struct ViewMeta {
    pub view_name: String,
    pub project_id: String,
    pub last_generated: DateTime<Utc>,
    pub events_count_at_gen: i64,
    pub ttl_seconds: i64,
}

impl ViewMeta {
    /// Stale when past TTL or enough new events arrived since generation.
    pub fn is_stale(&self, now: DateTime<Utc>, event_count: i64, policy: &ViewPolicy) -> bool {
        let age_secs = (now - self.last_generated).num_seconds();
        if age_secs > self.ttl_seconds {
            return true;
        }
        event_count - self.events_count_at_gen >= policy.delta_threshold
    }
}

/// View cache for one project partition.
///
/// The global partition contributes user-style items to the style view
/// when present; cached payloads always live in the project partition.
pub struct ViewCache {
    partition: Partition,
    global: Option<Partition>,
    config: ViewConfig,
    oracle: Arc<dyn ExtractionOracle>,
}

impl ViewCache {
    pub fn new(
        partition: Partition,
        global: Option<Partition>,
        config: ViewConfig,
        oracle: Arc<dyn ExtractionOracle>,
    ) -> Self {
        Self {
            partition,
            global,
            config,
            oracle,
        }
    }

    fn policy(&self, view: ViewName) -> ViewPolicy {
        match view {
            ViewName::Style => self.config.style,
            ViewName::Brief => self.config.brief,
            ViewName::Pitfalls => self.config.pitfalls,
        }
    }

    /// Get the view payload, regenerating first when stale.
    pub async fn get(&self, view: ViewName, now: DateTime<Utc>) -> EngineResult<serde_json::Value> {
        let policy = self.policy(view);

        let (meta, event_count, cached) = {
            let db = self.partition.db().read().await;
            let meta = read_meta(&db, view.as_str(), self.partition.project_id())?;
            let count = event_store::count_in(&db)?;
            let cached = read_payload(&db, view.as_str(), self.partition.project_id())?;
            (meta, count, cached)
        };

        let stale = match &meta {
            Some(meta) => meta.is_stale(now, event_count, &policy),
            None => true,
        };

        if !stale {
            if let Some(payload) = &cached {
                return Ok(payload.clone());
            }
            // Meta without payload: someone dropped the disposable row
        }

        match self.regenerate(view, &policy, event_count, now).await {
            Ok(payload) => Ok(payload),
            Err(e) if e.is_retryable() => match cached {
                Some(payload) => {
                    tracing::warn!(view = %view, error = %e, "regeneration failed, serving last good payload");
                    Ok(payload)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Drop the staleness record so the next read regenerates.
    pub async fn invalidate(&self, view: ViewName) -> EngineResult<()> {
        let db = self.partition.db().write().await;
        db.execute(
            "DELETE FROM view_meta WHERE view_name = ?1 AND project_id = ?2",
            params![view.as_str(), self.partition.project_id()],
        )?;
        Ok(())
    }

    async fn regenerate(
        &self,
        view: ViewName,
        policy: &ViewPolicy,
        event_count: i64,
        now: DateTime<Utc>,
    ) -> EngineResult<serde_json::Value> {
        let shortlist = self.shortlist(view).await?;
        let payload = self.oracle.summarize_view(view.as_str(), &shortlist).await?;

        let mut db = self.partition.db().write().await;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO view_meta (view_name, project_id, last_generated, events_count_at_gen, ttl_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (view_name, project_id) DO UPDATE SET
                 last_generated = excluded.last_generated,
                 events_count_at_gen = excluded.events_count_at_gen,
                 ttl_seconds = excluded.ttl_seconds",
            params![
                view.as_str(),
                self.partition.project_id(),
                now.timestamp_millis(),
                event_count,
                policy.ttl_seconds,
            ],
        )?;
        tx.execute(
            "INSERT INTO view_payloads (view_name, project_id, payload_json)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (view_name, project_id) DO UPDATE SET
                 payload_json = excluded.payload_json",
            params![
                view.as_str(),
                self.partition.project_id(),
                serde_json::to_string(&payload)?,
            ],
        )?;
        tx.commit()?;

        tracing::debug!(view = %view, items = shortlist.len(), "view regenerated");
        Ok(payload)
    }

    /// Rank the input items for one regeneration: importance first, then
    /// recency, capped at the configured shortlist size.
    async fn shortlist(&self, view: ViewName) -> EngineResult<Vec<MemoryItem>> {
        let kinds = match view {
            ViewName::Style => vec![MemoryKind::UserStyle],
            ViewName::Brief => vec![MemoryKind::ProjectFact, MemoryKind::Recipe],
            ViewName::Pitfalls => vec![MemoryKind::Pitfall],
        };
        let filter = ItemFilter {
            kinds: Some(kinds),
            ..Default::default()
        };

        // Project items first: a project-level row wins over a global one
        // that shares its key.
        let mut items = MemoryStore::new(self.partition.clone()).list(&filter).await?;
        if view == ViewName::Style {
            if let Some(global) = &self.global {
                let global_items = MemoryStore::new(global.clone()).list(&filter).await?;
                for item in global_items {
                    if !items.iter().any(|i| i.key == item.key) {
                        items.push(item);
                    }
                }
            }
        }

        // One row speaks per anchor: the most recently updated active one
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        let mut seen = std::collections::HashSet::new();
        items.retain(|i| seen.insert((i.kind, i.key.clone(), i.scope, i.user_id.clone())));

        items.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        items.truncate(self.config.shortlist_cap);
        Ok(items)
    }
}

fn read_meta(
    conn: &rusqlite::Connection,
    view_name: &str,
    project_id: &str,
) -> EngineResult<Option<ViewMeta>> {
    let meta = conn
        .query_row(
            "SELECT view_name, project_id, last_generated, events_count_at_gen, ttl_seconds
             FROM view_meta WHERE view_name = ?1 AND project_id = ?2",
            params![view_name, project_id],
            |row| {
                Ok(ViewMeta {
                    view_name: row.get(0)?,
                    project_id: row.get(1)?,
                    last_generated: DateTime::from_timestamp_millis(row.get::<_, i64>(2)?)
                        .unwrap_or_default(),
                    events_count_at_gen: row.get(3)?,
                    ttl_seconds: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(meta)
}

fn read_payload(
    conn: &rusqlite::Connection,
    view_name: &str,
    project_id: &str,
) -> EngineResult<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT payload_json FROM view_payloads WHERE view_name = ?1 AND project_id = ?2",
            params![view_name, project_id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Resolve a view name or fail with [`EngineError::UnknownView`].
pub fn resolve_view(name: &str) -> EngineResult<ViewName> {
    ViewName::from_str(name).ok_or_else(|| EngineError::UnknownView(name.to_string()))
}
