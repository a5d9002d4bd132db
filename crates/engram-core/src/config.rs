//! Engine Configuration
//!
//! Process-wide configuration for the memory engine. Loaded once at startup
//! and passed by reference into each component; there are no ambient globals.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigValidationError;
use crate::reconcile::MergePolicy;

/// Engine configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory for the global user partition (default: ~/.engram)
    pub data_dir: Option<PathBuf>,

    /// User ID for scoping user-style memories (optional)
    pub user_id: Option<String>,

    /// Episode segmenter configuration
    pub segmenter: SegmenterConfig,

    /// Reconciliation configuration
    pub reconcile: ReconcileConfig,

    /// Cached view configuration
    pub views: ViewConfig,

    /// Retrieval ranker configuration
    pub retrieval: RetrievalConfig,

    /// Extraction oracle call configuration
    pub oracle: OracleConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            user_id: None,
            segmenter: SegmenterConfig::default(),
            reconcile: ReconcileConfig::default(),
            views: ViewConfig::default(),
            retrieval: RetrievalConfig::default(),
            oracle: OracleConfig::default(),
        }
    }
}

/// Episode segmenter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Inactivity gap that starts a new episode, in seconds (default: 1200 = 20 minutes)
    pub inactivity_gap_secs: i64,

    /// Minimum events per episode; smaller runs are merged or deferred (default: 3)
    pub min_episode_events: usize,

    /// Maximum unprocessed events fetched per segmentation batch (default: 500)
    pub batch_size: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            inactivity_gap_secs: 1200, // 20 minutes
            min_episode_events: 3,
            batch_size: 500,
        }
    }
}

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Minimum confidence before an ADD/UPDATE may touch storage (default: 0.7)
    pub confidence_threshold: f64,

    /// How UPDATE_EXISTING combines candidate content with stored content
    pub merge_policy: MergePolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            merge_policy: MergePolicy::Overwrite,
        }
    }
}

/// Per-view staleness policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ViewPolicy {
    /// Maximum payload age before regeneration, in seconds
    pub ttl_seconds: i64,

    /// New-event count since generation that forces regeneration
    pub delta_threshold: i64,
}

/// Cached view configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Style summary view (default: 3600s / 200 events)
    pub style: ViewPolicy,

    /// Project brief view (default: 600s / 100 events)
    pub brief: ViewPolicy,

    /// Pitfalls view (default: 600s / 50 events)
    pub pitfalls: ViewPolicy,

    /// Maximum items handed to the oracle per regeneration (default: 20)
    pub shortlist_cap: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            style: ViewPolicy {
                ttl_seconds: 3600,
                delta_threshold: 200,
            },
            brief: ViewPolicy {
                ttl_seconds: 600,
                delta_threshold: 100,
            },
            pitfalls: ViewPolicy {
                ttl_seconds: 600,
                delta_threshold: 50,
            },
            shortlist_cap: 20,
        }
    }
}

/// Retrieval ranker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Default number of results (default: 5)
    pub top_k: usize,

    /// Weight of vector/lexical similarity in the blended score (default: 0.6)
    pub similarity_weight: f64,

    /// Weight of stored importance (default: 0.25)
    pub importance_weight: f64,

    /// Weight of recency decay (default: 0.15)
    pub recency_weight: f64,

    /// Half-life of the recency decay, in seconds (default: 604800 = 7 days)
    pub recency_half_life_secs: i64,

    /// Pass the scored head through the oracle for a final rerank (default: false)
    pub oracle_rerank: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_weight: 0.6,
            importance_weight: 0.25,
            recency_weight: 0.15,
            recency_half_life_secs: 604800, // 7 days
            oracle_rerank: false,
        }
    }
}

/// Extraction oracle call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Timeout per oracle call, in milliseconds (default: 30000)
    pub timeout_ms: u64,

    /// Base delay for retry backoff, in milliseconds (default: 1000)
    pub retry_base_delay_ms: u64,

    /// Maximum delay for retry backoff, in milliseconds (default: 300000 = 5 minutes)
    pub retry_max_delay_ms: u64,

    /// Maximum retry attempts before a batch is parked for operator attention (default: 8)
    pub retry_max_attempts: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 300_000,
            retry_max_attempts: 8,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigValidationError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the data directory
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Set the user ID
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.segmenter.inactivity_gap_secs <= 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "segmenter.inactivity_gap_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.segmenter.min_episode_events == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "segmenter.min_episode_events".into(),
                message: "must be at least 1".into(),
            });
        }

        if !(0.0..=1.0).contains(&self.reconcile.confidence_threshold) {
            return Err(ConfigValidationError::InvalidValue {
                field: "reconcile.confidence_threshold".into(),
                message: "must be between 0 and 1".into(),
            });
        }

        for (field, weight) in [
            ("retrieval.similarity_weight", self.retrieval.similarity_weight),
            ("retrieval.importance_weight", self.retrieval.importance_weight),
            ("retrieval.recency_weight", self.retrieval.recency_weight),
        ] {
            if weight < 0.0 {
                return Err(ConfigValidationError::InvalidValue {
                    field: field.into(),
                    message: "must not be negative".into(),
                });
            }
        }

        if self.retrieval.recency_half_life_secs <= 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "retrieval.recency_half_life_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.oracle.timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "oracle.timeout_ms".into(),
                message: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}
