//! Raw Activity Events
//!
//! Immutable units of developer activity delivered by external watchers.
//! Deduplication happens here: every event carries a canonical hash so the
//! event store can drop re-deliveries of the same activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Timestamp bucket width used by the dedup hash, in seconds (5 minutes).
const DEDUP_BUCKET_SECS: i64 = 300;

/// Event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    Response,
    CodeChange,
    TestRun,
    Command,
    FileOpen,
}

impl EventKind {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "message" => Some(Self::Message),
            "response" => Some(Self::Response),
            "code_change" => Some(Self::CodeChange),
            "test_run" => Some(Self::TestRun),
            "command" => Some(Self::Command),
            "file_open" => Some(Self::FileOpen),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Response => "response",
            Self::CodeChange => "code_change",
            Self::TestRun => "test_run",
            Self::Command => "command",
            Self::FileOpen => "file_open",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored raw activity event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Absolute project path; the stable partition key
    pub project_id: String,
    pub user_id: Option<String>,
    /// Source tool tag (e.g. "terminal", "editor")
    pub source: String,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    /// Opaque content payload
    pub content: String,
    /// File paths touched by this event
    pub file_paths: Vec<String>,
    pub dedup_hash: String,
    /// Set once when the segmenter consumes the event
    pub processed_at: Option<DateTime<Utc>>,
}

/// Input for recording a new event
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub project_id: String,
    pub user_id: Option<String>,
    pub source: String,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub content: String,
    pub file_paths: Vec<String>,
}

impl NewEvent {
    /// Compute the canonical dedup hash for this event.
    ///
    /// Deterministic and order-independent over file paths: project id,
    /// source tool, kind, session id, timestamp floored to a 5-minute
    /// bucket, sorted paths, and a whitespace/case-folded content signature.
    pub fn dedup_hash(&self) -> String {
        let mut hasher = Sha256::new();

        hasher.update(self.project_id.as_bytes());
        hasher.update([0]);
        hasher.update(self.source.as_bytes());
        hasher.update([0]);
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update([0]);
        if let Some(session_id) = &self.session_id {
            hasher.update(session_id.as_bytes());
        }
        hasher.update([0]);

        let bucket = self.timestamp.timestamp().div_euclid(DEDUP_BUCKET_SECS);
        hasher.update(bucket.to_le_bytes());

        let mut paths: Vec<&str> = self.file_paths.iter().map(String::as_str).collect();
        paths.sort_unstable();
        for path in paths {
            hasher.update([0]);
            hasher.update(path.as_bytes());
        }

        hasher.update([0]);
        hasher.update(content_signature(&self.content).as_bytes());

        hex::encode(hasher.finalize())
    }
}

/// Lightly normalized content signature: lowercased, whitespace collapsed.
fn content_signature(content: &str) -> String {
    content
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_event() -> NewEvent {
        NewEvent {
            project_id: "/home/dev/proj".into(),
            user_id: Some("u-1".into()),
            source: "terminal".into(),
            session_id: Some("s-1".into()),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 30).unwrap(),
            kind: EventKind::Command,
            content: "cargo   Test\n--all".into(),
            file_paths: vec!["src/lib.rs".into(), "Cargo.toml".into()],
        }
    }

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(base_event().dedup_hash(), base_event().dedup_hash());
    }

    #[test]
    fn test_hash_path_order_independent() {
        let a = base_event();
        let mut b = base_event();
        b.file_paths.reverse();
        assert_eq!(a.dedup_hash(), b.dedup_hash());
    }

    #[test]
    fn test_hash_folds_whitespace_and_case() {
        let a = base_event();
        let mut b = base_event();
        b.content = "CARGO test --all".into();
        assert_eq!(a.dedup_hash(), b.dedup_hash());
    }

    #[test]
    fn test_hash_same_time_bucket() {
        let a = base_event();
        let mut b = base_event();
        // Still inside the same 5-minute bucket
        b.timestamp = Utc.with_ymd_and_hms(2025, 3, 1, 12, 4, 59).unwrap();
        assert_eq!(a.dedup_hash(), b.dedup_hash());

        let mut c = base_event();
        c.timestamp = Utc.with_ymd_and_hms(2025, 3, 1, 12, 5, 1).unwrap();
        assert_ne!(a.dedup_hash(), c.dedup_hash());
    }

    #[test]
    fn test_hash_differs_across_projects() {
        let a = base_event();
        let mut b = base_event();
        b.project_id = "/home/dev/other".into();
        assert_ne!(a.dedup_hash(), b.dedup_hash());
    }

    #[test]
    fn test_event_kind_conversion() {
        assert_eq!(EventKind::from_str("code_change"), Some(EventKind::CodeChange));
        assert_eq!(EventKind::CodeChange.as_str(), "code_change");
        assert_eq!(EventKind::from_str("bogus"), None);
    }
}
