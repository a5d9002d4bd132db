//! Engram Engine - Memory Consolidation and Retrieval
//!
//! Turns a raw stream of development activity into durable, queryable
//! memory. Storage is one SQLite file per project partition plus a global
//! user partition; all policy logic lives in `engram-core` and is exercised
//! here inside partition transactions.
//!
//! Pipeline: [`MemoryEngine::record_event`] appends deduplicated events,
//! [`MemoryEngine::consolidate`] segments them into episodes and reconciles
//! oracle-extracted candidates into memory items, and
//! [`MemoryEngine::get_view`] / [`MemoryEngine::search`] read the results.

pub mod engine;
pub mod episode_store;
pub mod error;
pub mod event_store;
pub mod memory_store;
pub mod partition;
pub mod reconciler;
pub mod retrieval;
pub mod segmenter;
pub mod view_cache;

mod migrations;

pub use engine::{ConsolidateReport, MemoryEngine};
pub use error::{EngineError, EngineResult};
pub use event_store::{EventStore, RecordOutcome};
pub use memory_store::{ItemFilter, MemoryStore};
pub use partition::{GLOBAL_PROJECT_ID, Partition, PartitionSet};
pub use reconciler::{ReconcileReport, Reconciler};
pub use retrieval::{Retriever, SearchHit, SearchQuery};
pub use segmenter::{SegmentReport, Segmenter};
pub use view_cache::{ViewCache, ViewMeta, ViewName};
