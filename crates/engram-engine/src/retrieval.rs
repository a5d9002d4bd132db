//! Relevance Retrieval
//!
//! Query-time ranking over active memory items. Scoring is the blended
//! similarity/importance/recency formula from the core crate and is fully
//! deterministic; the optional oracle rerank only permutes the already
//! truncated head and is ignored whenever the oracle misbehaves.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use engram_core::score::{compare_scored, score_item};
use engram_core::{ExtractionOracle, MemoryItem, MemoryKind, RetrievalConfig};

use crate::error::EngineResult;
use crate::memory_store::{ItemFilter, MemoryStore};
use crate::partition::Partition;

/// A retrieval query
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: String,
    /// Precomputed query embedding; absent engages the lexical fallback
    pub vector: Option<Vec<f32>>,
    pub kinds: Option<Vec<MemoryKind>>,
    /// Keep only items whose source events touched one of these paths
    /// (exact match or directory prefix). Path scoping is project-local:
    /// global items have no events here and are filtered out.
    pub scope_paths: Vec<String>,
    /// Result cap; falls back to the configured top_k
    pub top_k: Option<usize>,
}

/// One scored result
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub item: MemoryItem,
    pub score: f64,
}

/// Retrieval service for one project partition.
///
/// The global partition contributes user-scoped items when present.
pub struct Retriever {
    partition: Partition,
    global: Option<Partition>,
    config: RetrievalConfig,
    oracle: Arc<dyn ExtractionOracle>,
}

impl Retriever {
    pub fn new(
        partition: Partition,
        global: Option<Partition>,
        config: RetrievalConfig,
        oracle: Arc<dyn ExtractionOracle>,
    ) -> Self {
        Self {
            partition,
            global,
            config,
            oracle,
        }
    }

    /// Rank active items against the query and return the top results.
    pub async fn search(
        &self,
        query: &SearchQuery,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<SearchHit>> {
        let filter = ItemFilter {
            kinds: query.kinds.clone(),
            ..Default::default()
        };

        let mut items = MemoryStore::new(self.partition.clone()).list(&filter).await?;
        if let Some(global) = &self.global {
            items.extend(MemoryStore::new(global.clone()).list(&filter).await?);
        }

        if !query.scope_paths.is_empty() {
            let db = self.partition.db().read().await;
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                let touched = crate::event_store::file_paths_for(&db, &item.source_event_ids)?;
                if paths_intersect(&query.scope_paths, &touched) {
                    kept.push(item);
                }
            }
            items = kept;
        }

        let mut scored: Vec<(f64, &MemoryItem)> = items
            .iter()
            .map(|item| {
                (
                    score_item(item, &query.text, query.vector.as_deref(), now, &self.config),
                    item,
                )
            })
            .collect();
        scored.sort_by(compare_scored);

        let top_k = query.top_k.unwrap_or(self.config.top_k);
        scored.truncate(top_k);

        let mut hits: Vec<SearchHit> = scored
            .into_iter()
            .map(|(score, item)| SearchHit {
                item: item.clone(),
                score,
            })
            .collect();

        if self.config.oracle_rerank && hits.len() > 1 {
            hits = self.rerank(&query.text, hits).await;
        }

        Ok(hits)
    }

    /// Apply the oracle rerank to the scored head. Anything other than a
    /// clean permutation of the input ids keeps the deterministic order.
    async fn rerank(&self, query: &str, hits: Vec<SearchHit>) -> Vec<SearchHit> {
        let ids: Vec<String> = hits.iter().map(|h| h.item.id.clone()).collect();
        let reranked = match self.oracle.rerank(query, ids.clone()).await {
            Ok(reranked) => reranked,
            Err(e) => {
                tracing::warn!(error = %e, "rerank failed, keeping deterministic order");
                return hits;
            }
        };

        let mut sorted_input = ids.clone();
        sorted_input.sort();
        let mut sorted_output = reranked.clone();
        sorted_output.sort();
        if sorted_input != sorted_output {
            tracing::warn!("rerank output is not a permutation of the input, ignoring");
            return hits;
        }

        let mut by_id: std::collections::HashMap<String, SearchHit> =
            hits.into_iter().map(|h| (h.item.id.clone(), h)).collect();
        reranked
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect()
    }
}

/// True when any scope path matches any touched path exactly or as a
/// directory prefix.
fn paths_intersect(scope_paths: &[String], touched: &[String]) -> bool {
    scope_paths.iter().any(|scope| {
        let prefix = format!("{}/", scope.trim_end_matches('/'));
        touched
            .iter()
            .any(|path| path == scope || path.starts_with(&prefix))
    })
}
