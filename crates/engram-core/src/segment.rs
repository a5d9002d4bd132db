//! Episode Segmentation
//!
//! Pure segmentation of an ordered batch of unprocessed events into episode
//! runs. Grouping is by `(project_id, user_id, session_id)`; a run boundary
//! opens whenever the inactivity gap between consecutive events exceeds the
//! configured threshold. Runs below the minimum size merge into a neighbor
//! (earlier preferred); a lone undersized run is deferred, not emitted, so
//! its events stay unprocessed until more arrive.
//!
//! A group is always segmented to completion or not at all; there is no
//! mid-group restart that could re-split already-committed runs.

use std::collections::BTreeMap;

use crate::config::SegmenterConfig;
use crate::event::Event;

/// Grouping key for segmentation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub project_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

impl GroupKey {
    fn for_event(event: &Event) -> Self {
        Self {
            project_id: event.project_id.clone(),
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
        }
    }
}

/// A finalized run of events destined to become one episode
#[derive(Debug, Clone)]
pub struct EpisodeRun {
    pub group: GroupKey,
    /// Events in timestamp order
    pub events: Vec<Event>,
}

/// Result of segmenting one batch
#[derive(Debug, Clone, Default)]
pub struct SegmentOutcome {
    /// Finalized runs, each meeting the minimum event count
    pub runs: Vec<EpisodeRun>,
    /// Event ids deferred for a later batch (lone undersized runs)
    pub deferred: Vec<String>,
}

/// Segment a batch of events into episode runs.
///
/// Events may arrive in any order; each group is sorted by timestamp before
/// splitting. Output ordering is deterministic: groups in key order, runs in
/// time order within a group.
pub fn segment(events: Vec<Event>, config: &SegmenterConfig) -> SegmentOutcome {
    let mut groups: BTreeMap<GroupKey, Vec<Event>> = BTreeMap::new();
    for event in events {
        groups
            .entry(GroupKey::for_event(&event))
            .or_default()
            .push(event);
    }

    let mut outcome = SegmentOutcome::default();

    for (group, mut group_events) in groups {
        group_events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

        let mut runs = split_on_gaps(group_events, config.inactivity_gap_secs);
        merge_undersized(&mut runs, config.min_episode_events);

        if runs.len() == 1 && runs[0].len() < config.min_episode_events {
            // Lone undersized run: wait for more events
            outcome
                .deferred
                .extend(runs.remove(0).into_iter().map(|e| e.id));
            continue;
        }

        for events in runs {
            outcome.runs.push(EpisodeRun {
                group: group.clone(),
                events,
            });
        }
    }

    outcome
}

/// Split a time-ordered event list wherever the gap exceeds the threshold.
fn split_on_gaps(events: Vec<Event>, gap_secs: i64) -> Vec<Vec<Event>> {
    let mut runs: Vec<Vec<Event>> = Vec::new();
    let mut current: Vec<Event> = Vec::new();

    for event in events {
        if let Some(prev) = current.last() {
            let gap = (event.timestamp - prev.timestamp).num_seconds();
            if gap > gap_secs {
                runs.push(std::mem::take(&mut current));
            }
        }
        current.push(event);
    }

    if !current.is_empty() {
        runs.push(current);
    }

    runs
}

/// Merge runs below the minimum size into the nearest neighbor, preferring
/// the earlier one. Repeats until every remaining run meets the minimum or
/// only one run is left.
fn merge_undersized(runs: &mut Vec<Vec<Event>>, min_events: usize) {
    loop {
        if runs.len() <= 1 {
            return;
        }

        let Some(idx) = runs.iter().position(|r| r.len() < min_events) else {
            return;
        };

        let undersized = runs.remove(idx);
        if idx > 0 {
            // Prefer the earlier neighbor
            runs[idx - 1].extend(undersized);
        } else {
            let mut merged = undersized;
            merged.extend(std::mem::take(&mut runs[0]));
            runs[0] = merged;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use crate::event::EventKind;

    fn event_at(id: &str, minutes: i64, session: Option<&str>) -> Event {
        Event {
            id: id.into(),
            project_id: "/p".into(),
            user_id: Some("u-1".into()),
            source: "editor".into(),
            session_id: session.map(String::from),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
                + Duration::minutes(minutes),
            kind: EventKind::Message,
            content: format!("event {id}"),
            file_paths: vec![],
            dedup_hash: id.into(),
            processed_at: None,
        }
    }

    fn config() -> SegmenterConfig {
        SegmenterConfig::default()
    }

    #[test]
    fn test_gap_split_and_backward_merge() {
        // Gaps of 2, 3, 25, 4 minutes: the 25-minute gap splits, leaving a
        // two-event tail that merges back into the first run.
        let events = vec![
            event_at("e1", 0, Some("s")),
            event_at("e2", 2, Some("s")),
            event_at("e3", 5, Some("s")),
            event_at("e4", 30, Some("s")),
            event_at("e5", 34, Some("s")),
        ];

        let outcome = segment(events, &config());
        assert_eq!(outcome.runs.len(), 1);
        assert_eq!(outcome.runs[0].events.len(), 5);
        assert!(outcome.deferred.is_empty());
    }

    #[test]
    fn test_two_full_episodes() {
        let mut events: Vec<Event> = (0..3).map(|i| event_at(&format!("a{i}"), i, Some("s"))).collect();
        events.extend((0..4).map(|i| event_at(&format!("b{i}"), 60 + i, Some("s"))));

        let outcome = segment(events, &config());
        assert_eq!(outcome.runs.len(), 2);
        assert_eq!(outcome.runs[0].events.len(), 3);
        assert_eq!(outcome.runs[1].events.len(), 4);
        for run in &outcome.runs {
            assert!(run.events.len() >= 3);
        }
    }

    #[test]
    fn test_lone_undersized_run_deferred() {
        let events = vec![event_at("e1", 0, Some("s")), event_at("e2", 1, Some("s"))];

        let outcome = segment(events, &config());
        assert!(outcome.runs.is_empty());
        assert_eq!(outcome.deferred, vec!["e1".to_string(), "e2".to_string()]);
    }

    #[test]
    fn test_null_session_is_its_own_group() {
        let mut events: Vec<Event> = (0..3).map(|i| event_at(&format!("a{i}"), i, Some("s"))).collect();
        events.extend((0..3).map(|i| event_at(&format!("n{i}"), i, None)));

        let outcome = segment(events, &config());
        assert_eq!(outcome.runs.len(), 2);
        let sessions: Vec<_> = outcome
            .runs
            .iter()
            .map(|r| r.group.session_id.clone())
            .collect();
        assert!(sessions.contains(&None));
        assert!(sessions.contains(&Some("s".into())));
    }

    #[test]
    fn test_undersized_head_merges_forward() {
        // Two-event head, 3-event tail after a gap: no earlier neighbor, so
        // the head merges into the later run.
        let mut events = vec![event_at("h1", 0, Some("s")), event_at("h2", 1, Some("s"))];
        events.extend((0..3).map(|i| event_at(&format!("t{i}"), 40 + i, Some("s"))));

        let outcome = segment(events, &config());
        assert_eq!(outcome.runs.len(), 1);
        assert_eq!(outcome.runs[0].events.len(), 5);
        // Time order preserved across the merge
        assert_eq!(outcome.runs[0].events[0].id, "h1");
        assert_eq!(outcome.runs[0].events[4].id, "t2");
    }

    #[test]
    fn test_unsorted_input_is_ordered() {
        let events = vec![
            event_at("e3", 5, Some("s")),
            event_at("e1", 0, Some("s")),
            event_at("e2", 2, Some("s")),
        ];

        let outcome = segment(events, &config());
        assert_eq!(outcome.runs.len(), 1);
        let ids: Vec<_> = outcome.runs[0].events.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["e1", "e2", "e3"]);
    }
}
