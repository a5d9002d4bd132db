//! Memory Engine Facade
//!
//! The single entry point callers hold. Owns the partition registry, the
//! timeout-wrapped oracle, and per-project retry bookkeeping; every
//! operation routes to the project's partition (plus the global user
//! partition where scope demands it).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use engram_core::backoff::{RetryPolicy, RetryState};
use engram_core::oracle::{EpisodeDigest, ExtractionContext, ExtractionOutput};
use engram_core::{EngineConfig, Event, ExtractionOracle, MemoryItem, NewEvent};

use crate::error::EngineResult;
use crate::event_store::{EventStore, RecordOutcome};
use crate::memory_store::{ItemFilter, MemoryStore};
use crate::partition::PartitionSet;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::retrieval::{Retriever, SearchHit, SearchQuery};
use crate::segmenter::{SegmentReport, Segmenter};
use crate::view_cache::{ViewCache, resolve_view};

/// Wraps every oracle call in the configured timeout. A timeout surfaces as
/// an oracle error, so the usual retry path applies.
struct TimedOracle {
    inner: Arc<dyn ExtractionOracle>,
    timeout: Duration,
}

impl TimedOracle {
    fn timeout_error(&self) -> engram_core::Error {
        engram_core::Error::oracle(format!(
            "call timed out after {}ms",
            self.timeout.as_millis()
        ))
    }
}

#[async_trait::async_trait]
impl ExtractionOracle for TimedOracle {
    async fn summarize_episode(&self, events: &[Event]) -> engram_core::Result<EpisodeDigest> {
        tokio::time::timeout(self.timeout, self.inner.summarize_episode(events))
            .await
            .map_err(|_| self.timeout_error())?
    }

    async fn extract(
        &self,
        context: ExtractionContext<'_>,
    ) -> engram_core::Result<ExtractionOutput> {
        tokio::time::timeout(self.timeout, self.inner.extract(context))
            .await
            .map_err(|_| self.timeout_error())?
    }

    async fn summarize_view(
        &self,
        view_name: &str,
        items: &[MemoryItem],
    ) -> engram_core::Result<serde_json::Value> {
        tokio::time::timeout(self.timeout, self.inner.summarize_view(view_name, items))
            .await
            .map_err(|_| self.timeout_error())?
    }

    async fn rerank(&self, query: &str, item_ids: Vec<String>) -> engram_core::Result<Vec<String>> {
        tokio::time::timeout(self.timeout, self.inner.rerank(query, item_ids))
            .await
            .map_err(|_| self.timeout_error())?
    }
}

/// Outcome of one consolidation pass (segmentation then reconciliation)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidateReport {
    pub segmentation: SegmentReport,
    pub reconciliation: ReconcileReport,
    /// Pass skipped because the project's backoff window is still open
    pub skipped_backoff: bool,
}

/// The memory engine
pub struct MemoryEngine {
    config: EngineConfig,
    partitions: PartitionSet,
    oracle: Arc<dyn ExtractionOracle>,
    retry_policy: RetryPolicy,
    retry_states: Mutex<HashMap<String, RetryState>>,
}

impl MemoryEngine {
    /// Create an engine backed by on-disk partitions.
    pub fn new(config: EngineConfig, oracle: Arc<dyn ExtractionOracle>) -> EngineResult<Self> {
        config.validate()?;
        let partitions = PartitionSet::open(config.data_dir.clone())?;
        Ok(Self::with_partitions(config, oracle, partitions))
    }

    /// Create an engine backed by in-memory partitions, for tests and
    /// ephemeral use.
    pub fn in_memory(config: EngineConfig, oracle: Arc<dyn ExtractionOracle>) -> EngineResult<Self> {
        config.validate()?;
        let partitions = PartitionSet::in_memory()?;
        Ok(Self::with_partitions(config, oracle, partitions))
    }

    fn with_partitions(
        config: EngineConfig,
        oracle: Arc<dyn ExtractionOracle>,
        partitions: PartitionSet,
    ) -> Self {
        let oracle: Arc<dyn ExtractionOracle> = Arc::new(TimedOracle {
            inner: oracle,
            timeout: Duration::from_millis(config.oracle.timeout_ms),
        });
        let retry_policy = RetryPolicy::from_config(&config.oracle);
        Self {
            config,
            partitions,
            oracle,
            retry_policy,
            retry_states: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Record a raw activity event into its project partition.
    pub async fn record_event(&self, input: NewEvent) -> EngineResult<RecordOutcome> {
        let partition = self.partitions.project(&input.project_id).await?;
        EventStore::new(partition).record(input).await
    }

    /// Run one segmentation pass for a project.
    pub async fn run_segmentation(&self, project_id: &str) -> EngineResult<SegmentReport> {
        let partition = self.partitions.project(project_id).await?;
        Segmenter::new(partition, self.config.segmenter.clone(), self.oracle.clone())
            .run_once(Utc::now())
            .await
    }

    /// Run one reconciliation pass for a project.
    pub async fn run_reconciliation(&self, project_id: &str) -> EngineResult<ReconcileReport> {
        let partition = self.partitions.project(project_id).await?;
        Reconciler::new(
            partition,
            Some(self.partitions.global().clone()),
            self.config.reconcile.clone(),
            self.oracle.clone(),
        )
        .run_once(Utc::now())
        .await
    }

    /// Run segmentation then reconciliation, honoring the project's backoff
    /// window. A retryable failure arms the backoff; success resets it.
    pub async fn consolidate(&self, project_id: &str) -> EngineResult<ConsolidateReport> {
        let now = Utc::now();
        {
            let states = self.retry_states.lock().await;
            if let Some(state) = states.get(project_id) {
                if !state.is_due(&self.retry_policy, now) {
                    tracing::debug!(project_id, attempts = state.attempts, "backoff window open, skipping");
                    return Ok(ConsolidateReport {
                        skipped_backoff: true,
                        ..Default::default()
                    });
                }
            }
        }

        let result = self.consolidate_inner(project_id).await;
        let mut states = self.retry_states.lock().await;
        match &result {
            Ok(_) => {
                states.remove(project_id);
            }
            Err(e) if e.is_retryable() => {
                states
                    .entry(project_id.to_string())
                    .or_default()
                    .record_failure(Utc::now());
            }
            Err(_) => {}
        }
        result
    }

    async fn consolidate_inner(&self, project_id: &str) -> EngineResult<ConsolidateReport> {
        let segmentation = self.run_segmentation(project_id).await?;
        let reconciliation = self.run_reconciliation(project_id).await?;
        tracing::info!(
            project_id,
            episodes = segmentation.episodes_created,
            added = reconciliation.added,
            updated = reconciliation.updated,
            deleted = reconciliation.deleted,
            "consolidation pass complete"
        );
        Ok(ConsolidateReport {
            segmentation,
            reconciliation,
            skipped_backoff: false,
        })
    }

    /// Get a cached view payload, regenerating when stale.
    pub async fn get_view(
        &self,
        project_id: &str,
        view_name: &str,
    ) -> EngineResult<serde_json::Value> {
        let view = resolve_view(view_name)?;
        let partition = self.partitions.project(project_id).await?;
        ViewCache::new(
            partition,
            Some(self.partitions.global().clone()),
            self.config.views.clone(),
            self.oracle.clone(),
        )
        .get(view, Utc::now())
        .await
    }

    /// Force regeneration of a view on its next read.
    pub async fn invalidate_view(&self, project_id: &str, view_name: &str) -> EngineResult<()> {
        let view = resolve_view(view_name)?;
        let partition = self.partitions.project(project_id).await?;
        ViewCache::new(
            partition,
            Some(self.partitions.global().clone()),
            self.config.views.clone(),
            self.oracle.clone(),
        )
        .invalidate(view)
        .await
    }

    /// Rank active memory against a query.
    pub async fn search(
        &self,
        project_id: &str,
        query: &SearchQuery,
    ) -> EngineResult<Vec<SearchHit>> {
        let partition = self.partitions.project(project_id).await?;
        Retriever::new(
            partition,
            Some(self.partitions.global().clone()),
            self.config.retrieval.clone(),
            self.oracle.clone(),
        )
        .search(query, Utc::now())
        .await
    }

    /// List a project's active memory items.
    pub async fn list_memories(
        &self,
        project_id: &str,
        filter: &ItemFilter,
    ) -> EngineResult<Vec<MemoryItem>> {
        let partition = self.partitions.project(project_id).await?;
        MemoryStore::new(partition).list(filter).await
    }

    /// List a project's active memory items grouped by kind.
    pub async fn list_memories_grouped(
        &self,
        project_id: &str,
    ) -> EngineResult<std::collections::BTreeMap<String, Vec<MemoryItem>>> {
        let partition = self.partitions.project(project_id).await?;
        MemoryStore::new(partition).list_grouped().await
    }

    /// Whether a consolidation retry would run for this project at `at`.
    pub async fn retry_due(&self, project_id: &str, at: DateTime<Utc>) -> bool {
        let states = self.retry_states.lock().await;
        states
            .get(project_id)
            .map(|s| s.is_due(&self.retry_policy, at))
            .unwrap_or(true)
    }
}
