//! Conflict detection between a branch ref and its target ref.
//!
//! Diff computation is delegated to the version-control collaborator; this
//! module only classifies. Used twice: as an advisory pre-check exposed to
//! users, and as the mandatory gate inside the convergence service
//! immediately before merging.

use std::collections::HashSet;
use std::sync::Arc;

use crate::ports::{Result, VersionControl};
use crate::types::{BranchDiff, ConflictDetail, ConflictType, ReviewComment};

/// Outcome of a conflict check.
#[derive(Debug, Clone, Default)]
pub struct ConflictReport {
    pub has_conflicts: bool,
    pub conflicts: Vec<ConflictDetail>,
}

/// Classifies non-mergeable overlaps between two refs.
pub struct ConflictDetector {
    vcs: Arc<dyn VersionControl>,
}

impl ConflictDetector {
    pub fn new(vcs: Arc<dyn VersionControl>) -> Self {
        Self { vcs }
    }

    /// Check whether `source_ref` can converge into `target_ref` cleanly.
    ///
    /// Asks the collaborator for the change summary in both directions and
    /// intersects: a file modified on both sides is an overlap conflict; a
    /// file modified on one side and deleted on the other is a
    /// delete/modify collision.
    pub async fn check_conflicts(
        &self,
        source_ref: &str,
        target_ref: &str,
    ) -> Result<ConflictReport> {
        let ours = self.vcs.get_change_summary(source_ref, target_ref).await?;
        let theirs = self.vcs.get_change_summary(target_ref, source_ref).await?;

        let their_modified: HashSet<&String> = theirs.modified.iter().collect();
        let their_deleted: HashSet<&String> = theirs.deleted.iter().collect();
        let their_added: HashSet<&String> = theirs.added.iter().collect();

        let mut conflicts = Vec::new();

        for path in &ours.modified {
            if their_modified.contains(path) {
                conflicts.push(ConflictDetail {
                    path: path.clone(),
                    conflict_type: ConflictType::ContentOverlap,
                    description: format!("'{path}' was modified on both the branch and the target"),
                });
            } else if their_deleted.contains(path) {
                conflicts.push(ConflictDetail {
                    path: path.clone(),
                    conflict_type: ConflictType::DeleteModify,
                    description: format!(
                        "'{path}' was modified on the branch but deleted on the target"
                    ),
                });
            }
        }

        for path in &ours.deleted {
            if their_modified.contains(path) {
                conflicts.push(ConflictDetail {
                    path: path.clone(),
                    conflict_type: ConflictType::DeleteModify,
                    description: format!(
                        "'{path}' was deleted on the branch but modified on the target"
                    ),
                });
            }
        }

        // Both sides adding the same path cannot merge either.
        for path in &ours.added {
            if their_added.contains(path) {
                conflicts.push(ConflictDetail {
                    path: path.clone(),
                    conflict_type: ConflictType::ContentOverlap,
                    description: format!("'{path}' was added independently on both sides"),
                });
            }
        }

        crate::metrics::emit_conflict_check(source_ref, target_ref, conflicts.len());

        Ok(ConflictReport {
            has_conflicts: !conflicts.is_empty(),
            conflicts,
        })
    }

    /// Latest diff for a branch, used by comment re-anchoring.
    pub async fn branch_diff(
        &self,
        source_ref: &str,
        target_ref: &str,
        base_commit: Option<&str>,
        head_commit: Option<&str>,
    ) -> Result<BranchDiff> {
        self.vcs
            .get_branch_diff(source_ref, target_ref, base_commit, head_commit)
            .await
    }
}

/// Re-run hunk identification for an anchored comment against the latest
/// diff. Returns the reason the anchor is stale, or `None` if a hunk still
/// covers it. Unanchored comments never go stale.
pub fn stale_anchor_reason(diff: &BranchDiff, comment: &ReviewComment) -> Option<String> {
    let anchor = comment.anchor.as_ref()?;

    let file = match diff.files.iter().find(|f| f.path == anchor.path) {
        Some(f) => f,
        None => {
            return Some(format!(
                "file '{}' is no longer part of the diff",
                anchor.path
            ));
        }
    };

    // Exact hunk survived resubmission.
    if file.hunks.iter().any(|h| h.key(&anchor.path) == anchor.hunk_id) {
        return None;
    }

    // A different hunk now covers the anchored line — still mappable.
    if file.hunks.iter().any(|h| h.covers_line(anchor.line)) {
        return None;
    }

    Some(format!(
        "no hunk in '{}' covers line {} after resubmission",
        anchor.path, anchor.line
    ))
}
