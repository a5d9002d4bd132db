//! Segmentation Service
//!
//! Drives the pure segmentation pass over a partition: fetch unprocessed
//! events, split them into episode runs, summarize each run through the
//! oracle, then persist the episodes and the processed markers in a single
//! transaction. An oracle failure anywhere aborts the whole batch, leaving
//! every event unprocessed for the next attempt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use engram_core::episode::baseline_importance;
use engram_core::segment::{EpisodeRun, segment};
use engram_core::{Episode, ExtractionOracle, SegmenterConfig};

use crate::error::EngineResult;
use crate::event_store::{self, EventStore};
use crate::episode_store;
use crate::partition::Partition;

/// Outcome of one segmentation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentReport {
    pub episodes_created: usize,
    pub events_processed: usize,
    /// Lone undersized runs held back for a later batch
    pub events_deferred: usize,
}

/// Segmentation service for one partition
pub struct Segmenter {
    partition: Partition,
    events: EventStore,
    config: SegmenterConfig,
    oracle: Arc<dyn ExtractionOracle>,
}

impl Segmenter {
    pub fn new(
        partition: Partition,
        config: SegmenterConfig,
        oracle: Arc<dyn ExtractionOracle>,
    ) -> Self {
        Self {
            events: EventStore::new(partition.clone()),
            partition,
            config,
            oracle,
        }
    }

    /// Run one segmentation pass over the oldest unprocessed events.
    pub async fn run_once(&self, now: DateTime<Utc>) -> EngineResult<SegmentReport> {
        let batch = self.events.fetch_unprocessed(self.config.batch_size).await?;
        if batch.is_empty() {
            return Ok(SegmentReport::default());
        }

        let outcome = segment(batch, &self.config);
        if outcome.runs.is_empty() {
            tracing::debug!(
                project_id = %self.partition.project_id(),
                deferred = outcome.deferred.len(),
                "no runs finalized"
            );
            return Ok(SegmentReport {
                events_deferred: outcome.deferred.len(),
                ..Default::default()
            });
        }

        // Summarize every run before touching storage: a failed oracle call
        // must leave the batch fully unprocessed.
        let mut episodes = Vec::with_capacity(outcome.runs.len());
        for run in &outcome.runs {
            episodes.push(self.build_episode(run, now).await?);
        }

        let mut events_processed = 0;
        {
            let mut db = self.partition.db().write().await;
            let tx = db.transaction()?;
            for episode in &episodes {
                episode_store::insert_in(&tx, episode)?;
                events_processed +=
                    event_store::mark_processed_in(&tx, &episode.source_event_ids, now)?;
            }
            tx.commit()?;
        }

        tracing::debug!(
            project_id = %self.partition.project_id(),
            episodes = episodes.len(),
            events = events_processed,
            deferred = outcome.deferred.len(),
            "segmentation pass complete"
        );

        Ok(SegmentReport {
            episodes_created: episodes.len(),
            events_processed,
            events_deferred: outcome.deferred.len(),
        })
    }

    async fn build_episode(&self, run: &EpisodeRun, now: DateTime<Utc>) -> EngineResult<Episode> {
        let digest = self.oracle.summarize_episode(&run.events).await?;
        let importance = digest
            .importance
            .map(|i| i.clamp(0.0, 1.0))
            .unwrap_or_else(|| baseline_importance(&run.events));

        let first = &run.events[0];
        let last = &run.events[run.events.len() - 1];

        Ok(Episode {
            id: Uuid::new_v4().to_string(),
            project_id: run.group.project_id.clone(),
            user_id: run.group.user_id.clone(),
            session_id: run.group.session_id.clone(),
            started_at: first.timestamp,
            ended_at: last.timestamp,
            event_count: run.events.len(),
            summary: digest.summary,
            importance,
            created_at: now,
            source_event_ids: run.events.iter().map(|e| e.id.clone()).collect(),
            processed_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use engram_core::{EventKind, NewEvent, StubOracle};

    use crate::episode_store::EpisodeStore;

    fn new_event(content: &str, minutes: u32) -> NewEvent {
        NewEvent {
            project_id: "/proj/a".into(),
            user_id: Some("u-1".into()),
            source: "editor".into(),
            session_id: Some("s-1".into()),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
                + chrono::Duration::minutes(minutes as i64),
            kind: EventKind::Message,
            content: content.into(),
            file_paths: vec![],
        }
    }

    fn segmenter(partition: &Partition, oracle: StubOracle) -> Segmenter {
        Segmenter::new(partition.clone(), SegmenterConfig::default(), Arc::new(oracle))
    }

    #[tokio::test]
    async fn test_gap_batch_becomes_one_episode() {
        let partition = Partition::in_memory("/proj/a").unwrap();
        let events = EventStore::new(partition.clone());

        // Gaps of 2, 3, 25, 4 minutes: the large gap splits but the
        // undersized tail merges back, producing one 5-event episode.
        for (content, m) in [("plan", 0), ("edit", 2), ("test", 5), ("retry", 30), ("pass", 34)] {
            events.record(new_event(content, m)).await.unwrap();
        }

        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let report = segmenter(&partition, StubOracle::new()).run_once(now).await.unwrap();
        assert_eq!(
            report,
            SegmentReport {
                episodes_created: 1,
                events_processed: 5,
                events_deferred: 0,
            }
        );

        let episodes = EpisodeStore::new(partition.clone())
            .fetch_unprocessed(10)
            .await
            .unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].event_count, 5);
        assert_eq!(episodes[0].summary, "plan");
        assert!(episodes[0].importance > 0.0);

        // All events consumed
        assert!(events.fetch_unprocessed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undersized_batch_is_deferred() {
        let partition = Partition::in_memory("/proj/a").unwrap();
        let events = EventStore::new(partition.clone());

        events.record(new_event("one", 0)).await.unwrap();
        events.record(new_event("two", 1)).await.unwrap();

        let report = segmenter(&partition, StubOracle::new())
            .run_once(Utc::now())
            .await
            .unwrap();
        assert_eq!(report.episodes_created, 0);
        assert_eq!(report.events_deferred, 2);

        // Deferred events stay unprocessed for the next pass
        assert_eq!(events.fetch_unprocessed(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_oracle_failure_leaves_batch_untouched() {
        let partition = Partition::in_memory("/proj/a").unwrap();
        let events = EventStore::new(partition.clone());

        for m in 0..4 {
            events.record(new_event(&format!("e{m}"), m)).await.unwrap();
        }

        let err = segmenter(&partition, StubOracle::failing())
            .run_once(Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // Nothing persisted, nothing marked
        assert_eq!(events.fetch_unprocessed(10).await.unwrap().len(), 4);
        assert!(
            EpisodeStore::new(partition.clone())
                .fetch_unprocessed(10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_empty_partition_is_a_noop() {
        let partition = Partition::in_memory("/proj/a").unwrap();
        let report = segmenter(&partition, StubOracle::new())
            .run_once(Utc::now())
            .await
            .unwrap();
        assert_eq!(report, SegmentReport::default());
    }
}
