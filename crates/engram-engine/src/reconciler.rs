//! Reconciliation Service
//!
//! Consumes unprocessed episodes: runs oracle extraction, plans a storage
//! action per candidate against the current anchor row, and applies the
//! whole episode batch atomically. Project-scoped candidates land in the
//! project partition together with the episode's processed marker; user-
//! scoped candidates land in the global partition in their own transaction,
//! each transaction all-or-nothing within its partition.
//!
//! Per-candidate validation failures are logged and skipped without
//! aborting the batch; an oracle failure aborts before any write, leaving
//! the episode unprocessed for retry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use engram_core::reconcile::{ReconcileAction, plan, validate_candidate};
use engram_core::{
    CandidateOp, Episode, ExtractionContext, ExtractionOracle, MemoryItem, MemoryScope,
    ReconcileConfig,
};

use crate::episode_store::{self, EpisodeStore};
use crate::error::EngineResult;
use crate::event_store;
use crate::memory_store;
use crate::partition::{GLOBAL_PROJECT_ID, Partition};

/// Episodes consumed per reconciliation pass
const EPISODE_BATCH: usize = 50;

/// Counters for one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub episodes_processed: usize,
    pub added: usize,
    pub updated: usize,
    /// Existing rows whose use count was bumped on an exact re-add
    pub reinforced: usize,
    pub deleted: usize,
    pub noop: usize,
    /// Candidates below the confidence gate: counted, never stored
    pub gated: usize,
    /// Candidates that failed validation and were skipped
    pub invalid: usize,
}

/// Reconciliation service for one project partition.
///
/// The global partition receives user-scoped candidates when present; a
/// reconciler without one keeps user-scoped items in the project partition.
pub struct Reconciler {
    partition: Partition,
    global: Option<Partition>,
    episodes: EpisodeStore,
    config: ReconcileConfig,
    oracle: Arc<dyn ExtractionOracle>,
}

impl Reconciler {
    pub fn new(
        partition: Partition,
        global: Option<Partition>,
        config: ReconcileConfig,
        oracle: Arc<dyn ExtractionOracle>,
    ) -> Self {
        Self {
            episodes: EpisodeStore::new(partition.clone()),
            partition,
            global,
            config,
            oracle,
        }
    }

    /// Run one reconciliation pass over the oldest unprocessed episodes.
    pub async fn run_once(&self, now: DateTime<Utc>) -> EngineResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for episode in self.episodes.fetch_unprocessed(EPISODE_BATCH).await? {
            self.reconcile_episode(&episode, now, &mut report).await?;
            report.episodes_processed += 1;
        }
        Ok(report)
    }

    async fn reconcile_episode(
        &self,
        episode: &Episode,
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> EngineResult<()> {
        let (events, existing) = {
            let db = self.partition.db().read().await;
            let events = event_store::fetch_by_ids(&db, &episode.source_event_ids)?;
            let existing = memory_store::active_in(&db)?;
            (events, existing)
        };

        // Extraction happens before any write; a failure here leaves the
        // episode unprocessed.
        let output = self
            .oracle
            .extract(ExtractionContext {
                project_id: &episode.project_id,
                episode_summary: &episode.summary,
                events: &events,
                existing: &existing,
            })
            .await?;

        if output.candidates.is_empty() {
            if let Some(reason) = &output.skip_reason {
                tracing::debug!(episode_id = %episode.id, reason = %reason, "episode skipped");
            }
        }

        let mut project_ops = Vec::new();
        let mut user_ops = Vec::new();
        for candidate in output.candidates {
            if let Err(e) = validate_candidate(&candidate) {
                tracing::warn!(episode_id = %episode.id, error = %e, "invalid candidate skipped");
                report.invalid += 1;
                continue;
            }
            if candidate.scope == MemoryScope::User && self.global.is_some() {
                user_ops.push(candidate);
            } else {
                project_ops.push(candidate);
            }
        }

        if let (Some(global), false) = (&self.global, user_ops.is_empty()) {
            let mut db = global.db().write().await;
            let tx = db.transaction()?;
            for candidate in &user_ops {
                apply_candidate(
                    &tx,
                    candidate,
                    GLOBAL_PROJECT_ID,
                    episode,
                    &self.config,
                    now,
                    report,
                )?;
            }
            tx.commit()?;
        }

        // Project writes and the processed marker commit together
        let mut db = self.partition.db().write().await;
        let tx = db.transaction()?;
        for candidate in &project_ops {
            apply_candidate(
                &tx,
                candidate,
                &episode.project_id,
                episode,
                &self.config,
                now,
                report,
            )?;
        }
        episode_store::mark_processed_in(&tx, &episode.id, now)?;
        tx.commit()?;

        Ok(())
    }
}

/// Plan and apply one validated candidate inside a partition transaction.
fn apply_candidate(
    conn: &Connection,
    candidate: &CandidateOp,
    project_id: &str,
    episode: &Episode,
    config: &ReconcileConfig,
    now: DateTime<Utc>,
    report: &mut ReconcileReport,
) -> EngineResult<()> {
    let user_id = match candidate.scope {
        MemoryScope::User => episode.user_id.clone(),
        MemoryScope::Project => None,
    };

    let anchor = engram_core::AnchorKey {
        project_id: project_id.to_string(),
        kind: candidate.kind,
        key: candidate.key.clone(),
        scope: candidate.scope,
        user_id: user_id.clone(),
    };
    let active = memory_store::active_by_anchor_in(conn, &anchor)?;
    let current = active.first();

    let action = plan(candidate, current, config.confidence_threshold, config.merge_policy);
    match action {
        ReconcileAction::Insert => {
            memory_store::insert_in(conn, &new_item(candidate, project_id, user_id, episode, now))?;
            report.added += 1;
        }
        ReconcileAction::Update {
            target_id,
            merged_content,
        } => {
            memory_store::update_in(
                conn,
                &target_id,
                &merged_content,
                candidate.importance,
                &candidate.tags,
                &candidate.source_event_ids,
                now,
            )?;
            report.updated += 1;
        }
        ReconcileAction::Reinforce { target_id } => {
            memory_store::reinforce_in(conn, &target_id, now)?;
            report.reinforced += 1;
        }
        ReconcileAction::DeleteAndInsert { target_id } => {
            memory_store::soft_delete_in(conn, &target_id, now)?;
            memory_store::insert_in(conn, &new_item(candidate, project_id, user_id, episode, now))?;
            report.deleted += 1;
            report.added += 1;
        }
        ReconcileAction::Noop => report.noop += 1,
        ReconcileAction::Gated => {
            tracing::debug!(
                key = %candidate.key,
                importance = candidate.importance,
                "candidate below confidence gate"
            );
            report.gated += 1;
        }
    }
    Ok(())
}

fn new_item(
    candidate: &CandidateOp,
    project_id: &str,
    user_id: Option<String>,
    episode: &Episode,
    now: DateTime<Utc>,
) -> MemoryItem {
    let source_event_ids = if candidate.source_event_ids.is_empty() {
        episode.source_event_ids.clone()
    } else {
        candidate.source_event_ids.clone()
    };

    MemoryItem {
        id: Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        user_id,
        scope: candidate.scope,
        kind: candidate.kind,
        key: candidate.key.clone(),
        content: candidate.content.clone(),
        tags: candidate.tags.clone(),
        importance: candidate.importance,
        created_at: now,
        updated_at: now,
        source_episode_id: Some(episode.id.clone()),
        source_event_ids,
        embedding: None,
        related_ids: vec![],
        use_count: 1,
        deleted: false,
    }
}
