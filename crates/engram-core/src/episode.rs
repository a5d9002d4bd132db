//! Episodes
//!
//! A bounded, ordered grouping of events representing one semantic work
//! session. Immutable once created except for the processed marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind};

/// A persisted episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub project_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub event_count: usize,
    /// Oracle-produced short summary
    pub summary: String,
    /// Importance in [0, 1]
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub source_event_ids: Vec<String>,
    /// Set once when reconciliation consumes the episode
    pub processed_at: Option<DateTime<Utc>>,
}

/// Heuristic importance baseline for an episode, before optional oracle
/// refinement.
///
/// Longer sessions and sessions that touch code or run tests score higher.
/// Monotonic in event count, capped at 1.0.
pub fn baseline_importance(events: &[Event]) -> f64 {
    if events.is_empty() {
        return 0.0;
    }

    let size_factor = ((events.len() as f64).ln() / 5.0).min(0.4);

    let code_changes = events
        .iter()
        .filter(|e| e.kind == EventKind::CodeChange)
        .count();
    let test_runs = events.iter().filter(|e| e.kind == EventKind::TestRun).count();

    let mut score = 0.3 + size_factor;
    if code_changes > 0 {
        score += 0.15;
    }
    if test_runs > 0 {
        score += 0.15;
    }

    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(kind: EventKind) -> Event {
        Event {
            id: "e".into(),
            project_id: "/p".into(),
            user_id: None,
            source: "editor".into(),
            session_id: None,
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
            kind,
            content: String::new(),
            file_paths: vec![],
            dedup_hash: "h".into(),
            processed_at: None,
        }
    }

    #[test]
    fn test_baseline_importance_empty() {
        assert_eq!(baseline_importance(&[]), 0.0);
    }

    #[test]
    fn test_baseline_importance_monotonic_in_size() {
        let small: Vec<Event> = (0..3).map(|_| event(EventKind::Message)).collect();
        let large: Vec<Event> = (0..30).map(|_| event(EventKind::Message)).collect();
        assert!(baseline_importance(&large) > baseline_importance(&small));
    }

    #[test]
    fn test_baseline_importance_code_and_tests_boost() {
        let chat: Vec<Event> = (0..5).map(|_| event(EventKind::Message)).collect();
        let mut work = chat.clone();
        work[0].kind = EventKind::CodeChange;
        work[1].kind = EventKind::TestRun;
        assert!(baseline_importance(&work) > baseline_importance(&chat));
    }

    #[test]
    fn test_baseline_importance_bounded() {
        let huge: Vec<Event> = (0..10_000)
            .map(|_| event(EventKind::CodeChange))
            .collect();
        assert!(baseline_importance(&huge) <= 1.0);
    }
}
