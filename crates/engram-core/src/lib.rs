//! Engram Core - Data Model and Policies for the Memory Engine
//!
//! Pure domain logic shared by the engine crate. Nothing in here performs
//! I/O; every algorithm is deterministic and testable in isolation:
//!
//! - **event** - Raw activity events and the canonical dedup hash
//! - **episode** - Episodes and the heuristic importance baseline
//! - **item** - Long-term memory items and the anchor key identity
//! - **oracle** - The extraction-oracle trait, candidate ops, and the
//!   deterministic stub used by tests and offline operation
//! - **segment** - Pure episode segmentation (grouping, gap split, merge)
//! - **reconcile** - Reconciliation policy (confidence gate, merge policy,
//!   decision degradation)
//! - **score** - Retrieval scoring (cosine, lexical overlap, recency decay)
//! - **backoff** - Retry policy for failed oracle batches
//! - **config** - Process-wide engine configuration

pub mod backoff;
pub mod config;
pub mod episode;
pub mod event;
pub mod item;
pub mod oracle;
pub mod reconcile;
pub mod score;
pub mod segment;

mod error;

pub use config::{
    EngineConfig, OracleConfig, ReconcileConfig, RetrievalConfig, SegmenterConfig, ViewConfig,
    ViewPolicy,
};
pub use episode::Episode;
pub use error::{ConfigValidationError, Error, Result};
pub use event::{Event, EventKind, NewEvent};
pub use item::{AnchorKey, MemoryItem, MemoryKind, MemoryScope};
pub use oracle::{
    CandidateOp, Decision, EpisodeDigest, ExtractionContext, ExtractionOracle, ExtractionOutput,
    StubOracle,
};
pub use reconcile::MergePolicy;
