//! Reconciliation Policy
//!
//! Pure decision logic for applying oracle candidates to long-term memory.
//! The storage layer executes the plan this module produces; the policy
//! itself never touches I/O, which keeps every invariant testable against
//! the stub oracle.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::item::MemoryItem;
use crate::oracle::{CandidateOp, Decision};

/// How UPDATE_EXISTING combines candidate content with stored content.
///
/// The source drafts disagree on merge-vs-overwrite, so the strategy is
/// pluggable. Overwrite is the default: fresher signal wins, matching the
/// importance rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Candidate content replaces stored content
    #[default]
    Overwrite,
    /// Candidate content is appended to stored content, deduped on exact repeat
    Append,
}

impl MergePolicy {
    /// Combine existing content with candidate content
    pub fn merge(&self, existing: &str, candidate: &str) -> String {
        match self {
            Self::Overwrite => candidate.to_string(),
            Self::Append => {
                if existing.contains(candidate) {
                    existing.to_string()
                } else if existing.is_empty() {
                    candidate.to_string()
                } else {
                    format!("{existing}\n\n{candidate}")
                }
            }
        }
    }
}

/// Planned storage mutation for one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    /// Insert a new active row
    Insert,
    /// Merge into the existing row
    Update {
        target_id: String,
        merged_content: String,
    },
    /// Existing row carries this exact fact already: bump its use count
    Reinforce { target_id: String },
    /// Soft-delete the existing row, insert a new active row
    DeleteAndInsert { target_id: String },
    /// No mutation
    Noop,
    /// Below the confidence gate: counted, never stored
    Gated,
}

/// Validate a candidate before planning.
///
/// Validation failures are per-candidate: the caller logs and skips them
/// without aborting the batch.
pub fn validate_candidate(candidate: &CandidateOp) -> Result<()> {
    if candidate.key.trim().is_empty() {
        return Err(Error::invalid_candidate("empty key"));
    }
    if !(0.0..=1.0).contains(&candidate.importance) {
        return Err(Error::invalid_value(
            "importance",
            format!("{} is outside [0, 1]", candidate.importance),
        ));
    }
    if candidate.decision != Decision::Noop && candidate.content.trim().is_empty() {
        return Err(Error::invalid_candidate("empty content for a mutating decision"));
    }
    Ok(())
}

/// Plan the storage action for one validated candidate against the current
/// active row at its anchor (if any).
///
/// Rules:
/// - NOOP never mutates, gated or not.
/// - Mutating candidates below `confidence_threshold` are gated.
/// - A missing anchor degrades any decision to a plain insert.
/// - ADD_NEW against an anchor whose active row already holds the exact
///   candidate content reinforces that row instead of duplicating it.
pub fn plan(
    candidate: &CandidateOp,
    existing: Option<&MemoryItem>,
    confidence_threshold: f64,
    merge_policy: MergePolicy,
) -> ReconcileAction {
    if candidate.decision == Decision::Noop {
        return ReconcileAction::Noop;
    }

    if candidate.importance < confidence_threshold {
        return ReconcileAction::Gated;
    }

    let Some(existing) = existing else {
        // UPDATE/DELETE against a nonexistent anchor degrades to ADD
        return ReconcileAction::Insert;
    };

    match candidate.decision {
        Decision::AddNew => {
            if existing.content == candidate.content {
                ReconcileAction::Reinforce {
                    target_id: existing.id.clone(),
                }
            } else {
                ReconcileAction::Insert
            }
        }
        Decision::UpdateExisting => ReconcileAction::Update {
            target_id: existing.id.clone(),
            merged_content: merge_policy.merge(&existing.content, &candidate.content),
        },
        Decision::DeleteAndAdd => ReconcileAction::DeleteAndInsert {
            target_id: existing.id.clone(),
        },
        Decision::Noop => ReconcileAction::Noop,
    }
}
