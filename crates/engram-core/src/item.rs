//! Long-Term Memory Items
//!
//! The durable knowledge unit produced by reconciliation. Identity across
//! time is the anchor key: `(project_id, kind, key, scope, user_id)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a memory applies to one user globally or to one project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    User,
    Project,
}

impl MemoryScope {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "project" => Some(Self::Project),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
        }
    }
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Memory item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    UserStyle,
    ProjectFact,
    Pitfall,
    Recipe,
}

impl MemoryKind {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user_style" => Some(Self::UserStyle),
            "project_fact" => Some(Self::ProjectFact),
            "pitfall" => Some(Self::Pitfall),
            "recipe" => Some(Self::Recipe),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserStyle => "user_style",
            Self::ProjectFact => "project_fact",
            Self::Pitfall => "pitfall",
            Self::Recipe => "recipe",
        }
    }

    /// The scope this kind naturally lives in
    pub fn default_scope(&self) -> MemoryScope {
        match self {
            Self::UserStyle => MemoryScope::User,
            Self::ProjectFact | Self::Pitfall | Self::Recipe => MemoryScope::Project,
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The identity under which reconciliation looks up "does this already exist"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorKey {
    pub project_id: String,
    pub kind: MemoryKind,
    pub key: String,
    pub scope: MemoryScope,
    pub user_id: Option<String>,
}

/// A long-term memory item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub project_id: String,
    pub user_id: Option<String>,
    pub scope: MemoryScope,
    pub kind: MemoryKind,
    /// Logical key within the anchor (e.g. "framework", "lint-rules")
    pub key: String,
    pub content: String,
    pub tags: Vec<String>,
    /// Importance in [0, 1]
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_episode_id: Option<String>,
    pub source_event_ids: Vec<String>,
    /// Pre-computed embedding vector, if the caller supplied one
    pub embedding: Option<Vec<f32>>,
    /// Weak back-references to related items (ids only, resolved at read time)
    pub related_ids: Vec<String>,
    /// How often reconciliation re-confirmed this exact fact
    pub use_count: i64,
    /// Soft-delete flag; rows are never hard-deleted
    pub deleted: bool,
}

impl MemoryItem {
    /// The anchor key identifying this item across time
    pub fn anchor(&self) -> AnchorKey {
        AnchorKey {
            project_id: self.project_id.clone(),
            kind: self.kind,
            key: self.key.clone(),
            scope: self.scope,
            user_id: self.user_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_conversion() {
        assert_eq!(MemoryKind::from_str("pitfall"), Some(MemoryKind::Pitfall));
        assert_eq!(MemoryKind::UserStyle.as_str(), "user_style");
        assert_eq!(MemoryKind::from_str("nope"), None);
    }

    #[test]
    fn test_default_scope() {
        assert_eq!(MemoryKind::UserStyle.default_scope(), MemoryScope::User);
        assert_eq!(MemoryKind::ProjectFact.default_scope(), MemoryScope::Project);
    }

    #[test]
    fn test_anchor_equality() {
        let a = AnchorKey {
            project_id: "/p".into(),
            kind: MemoryKind::ProjectFact,
            key: "framework".into(),
            scope: MemoryScope::Project,
            user_id: None,
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.key = "runtime".into();
        assert_ne!(a, b);
    }
}
