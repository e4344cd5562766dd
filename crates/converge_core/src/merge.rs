//! Merge orchestration — the single write path against the ref store.

use std::sync::Arc;

use crate::ports::{MergeRequest, Result, VersionControl};

/// Result of an atomic merge attempt. Either the target ref advanced to
/// `merge_commit`, or nothing changed (`rolled_back` when effects applied
/// during the attempt were reverted).
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub success: bool,
    pub merge_commit: Option<String>,
    pub error: Option<String>,
    pub rolled_back: bool,
}

pub struct MergeOrchestrator {
    vcs: Arc<dyn VersionControl>,
}

impl MergeOrchestrator {
    pub fn new(vcs: Arc<dyn VersionControl>) -> Self {
        Self { vcs }
    }

    /// Advance the target ref as a single atomic operation.
    ///
    /// Collaborator errors are folded into a failed `MergeResult` rather
    /// than propagated — the convergence service needs a terminal report
    /// on every path so it can release the lock with the right outcome.
    pub async fn atomic_merge(&self, request: &MergeRequest) -> Result<MergeResult> {
        match self.vcs.atomic_merge_ref(request).await {
            Ok(outcome) => {
                if outcome.success {
                    if let Some(commit) = &outcome.merge_commit {
                        crate::metrics::emit_merge(request.branch_id, &request.target_ref, commit);
                    }
                } else {
                    tracing::warn!(
                        target: "converge.merge",
                        branch_id = %request.branch_id,
                        target_ref = %request.target_ref,
                        error = outcome.error.as_deref().unwrap_or("unknown"),
                        rolled_back = outcome.rolled_back,
                        "merge failed"
                    );
                }
                Ok(MergeResult {
                    success: outcome.success,
                    merge_commit: outcome.merge_commit,
                    error: outcome.error,
                    rolled_back: outcome.rolled_back,
                })
            }
            Err(e) => {
                tracing::warn!(
                    target: "converge.merge",
                    branch_id = %request.branch_id,
                    target_ref = %request.target_ref,
                    error = %e,
                    "merge primitive errored"
                );
                Ok(MergeResult {
                    success: false,
                    merge_commit: None,
                    error: Some(e.to_string()),
                    rolled_back: false,
                })
            }
        }
    }
}
