//! Extraction Oracle Boundary
//!
//! The oracle is the external summarization/classification step (an LLM call
//! in production). The engine only sees this trait: it must be correct and
//! fully testable against the deterministic [`StubOracle`], never requiring
//! a live call to validate its invariants.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::item::{MemoryItem, MemoryKind, MemoryScope};

/// Reconciliation decision proposed by the oracle for one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    AddNew,
    UpdateExisting,
    Noop,
    DeleteAndAdd,
}

impl Decision {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ADD_NEW" => Some(Self::AddNew),
            "UPDATE_EXISTING" => Some(Self::UpdateExisting),
            "NOOP" => Some(Self::Noop),
            "DELETE_AND_ADD" => Some(Self::DeleteAndAdd),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddNew => "ADD_NEW",
            Self::UpdateExisting => "UPDATE_EXISTING",
            Self::Noop => "NOOP",
            Self::DeleteAndAdd => "DELETE_AND_ADD",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One candidate memory operation proposed by the oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateOp {
    pub decision: Decision,
    pub kind: MemoryKind,
    pub key: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Confidence/importance in [0, 1]
    pub importance: f64,
    pub scope: MemoryScope,
    /// Existing item the oracle targeted, if it named one
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub source_event_ids: Vec<String>,
}

/// Oracle output for one episode
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionOutput {
    #[serde(default)]
    pub candidates: Vec<CandidateOp>,
    /// Why nothing was extracted, when candidates is empty
    #[serde(default)]
    pub skip_reason: Option<String>,
}

/// Oracle summary for a finalized episode
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeDigest {
    pub summary: String,
    /// Refined importance; None keeps the heuristic baseline
    #[serde(default)]
    pub importance: Option<f64>,
}

/// Everything the oracle sees when extracting candidates from an episode
#[derive(Debug, Clone)]
pub struct ExtractionContext<'a> {
    pub project_id: &'a str,
    pub episode_summary: &'a str,
    pub events: &'a [Event],
    /// Snapshot of existing active memory for the anchor space
    pub existing: &'a [MemoryItem],
}

/// The extraction oracle boundary (consumed).
///
/// Calls may block on external latency; the engine wraps every call in a
/// timeout and treats failures as recoverable (retry with backoff).
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    /// Summarize a finalized episode and optionally refine its importance
    async fn summarize_episode(&self, events: &[Event]) -> Result<EpisodeDigest>;

    /// Propose candidate memory operations for an episode
    async fn extract(&self, context: ExtractionContext<'_>) -> Result<ExtractionOutput>;

    /// Produce a normalized view payload from a ranked item shortlist
    async fn summarize_view(
        &self,
        view_name: &str,
        items: &[MemoryItem],
    ) -> Result<serde_json::Value>;

    /// Rerank item ids for a query; must return a permutation of the input
    async fn rerank(&self, query: &str, item_ids: Vec<String>) -> Result<Vec<String>>;
}

/// Deterministic oracle stub for tests and offline operation.
///
/// `summarize_episode` derives the summary from the first event, `extract`
/// replays queued outputs (empty output once the queue drains), `rerank`
/// returns its input unchanged.
#[derive(Default)]
pub struct StubOracle {
    extractions: Mutex<VecDeque<ExtractionOutput>>,
    fail_calls: bool,
}

impl StubOracle {
    /// Create a stub that extracts nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stub that fails every call, for external-error paths
    pub fn failing() -> Self {
        Self {
            extractions: Mutex::new(VecDeque::new()),
            fail_calls: true,
        }
    }

    /// Queue an extraction output to be returned by the next `extract` call
    pub fn push_extraction(&self, output: ExtractionOutput) {
        self.extractions
            .lock()
            .expect("stub oracle lock poisoned")
            .push_back(output);
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail_calls {
            Err(Error::oracle("stub oracle configured to fail"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ExtractionOracle for StubOracle {
    async fn summarize_episode(&self, events: &[Event]) -> Result<EpisodeDigest> {
        self.check_failure()?;
        let summary = events
            .first()
            .map(|e| {
                let mut s: String = e.content.chars().take(80).collect();
                if s.is_empty() {
                    s = format!("{} activity", e.kind);
                }
                s
            })
            .unwrap_or_default();
        Ok(EpisodeDigest {
            summary,
            importance: None,
        })
    }

    async fn extract(&self, _context: ExtractionContext<'_>) -> Result<ExtractionOutput> {
        self.check_failure()?;
        Ok(self
            .extractions
            .lock()
            .expect("stub oracle lock poisoned")
            .pop_front()
            .unwrap_or_default())
    }

    async fn summarize_view(
        &self,
        view_name: &str,
        items: &[MemoryItem],
    ) -> Result<serde_json::Value> {
        self.check_failure()?;
        let entries: Vec<serde_json::Value> = items
            .iter()
            .map(|item| {
                serde_json::json!({
                    "key": item.key,
                    "content": item.content,
                    "importance": item.importance,
                })
            })
            .collect();
        Ok(serde_json::json!({ "view": view_name, "items": entries }))
    }

    async fn rerank(&self, _query: &str, item_ids: Vec<String>) -> Result<Vec<String>> {
        self.check_failure()?;
        Ok(item_ids)
    }
}
