//! Retrieval Scoring
//!
//! Deterministic scoring primitives for the retrieval ranker. With vectors
//! on both sides the similarity term is cosine; otherwise it falls back to
//! lexical token overlap. Importance and recency terms are blended in with
//! configurable weights.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::config::RetrievalConfig;
use crate::item::MemoryItem;

/// Cosine similarity between two vectors, normalized to [0, 1].
///
/// Returns 0 when dimensions differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let cos = dot / (norm_a.sqrt() * norm_b.sqrt());
    ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Lexical overlap: fraction of query tokens found in the content.
pub fn lexical_overlap(query: &str, content: &str) -> f64 {
    let content_lower = content.to_lowercase();
    let query_lower = query.to_lowercase();
    let query_words: Vec<&str> = query_lower.split_whitespace().collect();

    if query_words.is_empty() {
        return 0.0;
    }

    let matches = query_words
        .iter()
        .filter(|w| content_lower.contains(*w))
        .count();
    (matches as f64 / query_words.len() as f64).min(1.0)
}

/// Exponential recency decay with the configured half-life.
///
/// Monotonic non-increasing in age; an item updated now scores 1.0.
pub fn recency_decay(updated_at: DateTime<Utc>, now: DateTime<Utc>, half_life_secs: i64) -> f64 {
    let age_secs = (now - updated_at).num_seconds().max(0) as f64;
    0.5f64.powf(age_secs / half_life_secs as f64)
}

/// Blended relevance score for one item against a query.
///
/// `query_vec` engages the vector path only when the item also carries an
/// embedding; otherwise the lexical fallback applies. Both paths share the
/// importance and recency terms, so scoring stays usable offline.
pub fn score_item(
    item: &MemoryItem,
    query: &str,
    query_vec: Option<&[f32]>,
    now: DateTime<Utc>,
    config: &RetrievalConfig,
) -> f64 {
    let similarity = match (query_vec, item.embedding.as_deref()) {
        (Some(qv), Some(iv)) => cosine_similarity(qv, iv),
        _ => lexical_overlap(query, &format!("{} {}", item.key, item.content)),
    };

    config.similarity_weight * similarity
        + config.importance_weight * item.importance
        + config.recency_weight
            * recency_decay(item.updated_at, now, config.recency_half_life_secs)
}

/// Deterministic ordering for scored items: score descending, then
/// importance, then `updated_at`, then id for full reproducibility.
pub fn compare_scored(a: &(f64, &MemoryItem), b: &(f64, &MemoryItem)) -> Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.1.importance
                .partial_cmp(&a.1.importance)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.1.updated_at.cmp(&a.1.updated_at))
        .then_with(|| a.1.id.cmp(&b.1.id))
}
