//! Storage and version-control port traits for the convergence pipeline.
//! Implemented by converge_postgres (persistence) and by the host's ref
//! store adapter (version control) — core logic depends only on these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ConvergeError;
use crate::types::*;

pub type Result<T> = std::result::Result<T, ConvergeError>;

// ── Branches ───────────────────────────────────────────────────

#[async_trait]
pub trait BranchStore: Send + Sync {
    async fn insert_branch(&self, branch: &Branch) -> Result<()>;

    /// Load a branch by ID. `NotFound` if absent.
    async fn get_branch(&self, branch_id: Uuid) -> Result<Branch>;

    /// Persist a lifecycle state change.
    async fn update_state(&self, branch_id: Uuid, state: BranchState) -> Result<()>;

    /// Replace the assigned-reviewer set.
    async fn set_reviewers(&self, branch_id: Uuid, reviewers: &[Uuid]) -> Result<()>;

    /// Set required approvals and advance the review cycle counter.
    async fn set_review_round(
        &self,
        branch_id: Uuid,
        required_approvals: u32,
        review_cycle: u32,
    ) -> Result<()>;

    /// Append a lifecycle transition to the audit log.
    async fn log_transition(&self, entry: &TransitionLogEntry) -> Result<()>;

    /// Transition log for a branch, oldest first.
    async fn get_transition_log(&self, branch_id: Uuid) -> Result<Vec<TransitionLogEntry>>;
}

// ── Reviews ────────────────────────────────────────────────────

/// Snapshot returned by [`ReviewStore::record_decision`].
#[derive(Debug, Clone)]
pub struct DecisionSnapshot {
    pub review: Review,
    /// Completed approvals in the review's cycle, counted in the same
    /// transactional boundary as the decision write.
    pub approval_count: u32,
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn insert_reviews(&self, reviews: &[Review]) -> Result<()>;

    /// Load a review by ID. `NotFound` if absent.
    async fn get_review(&self, review_id: Uuid) -> Result<Review>;

    /// Reviews for one branch cycle.
    async fn list_reviews(&self, branch_id: Uuid, cycle: u32) -> Result<Vec<Review>>;

    /// Record a reviewer decision and count the cycle's approvals atomically.
    ///
    /// Implementations must serialize concurrent decisions for the same
    /// branch (e.g. `SELECT ... FOR UPDATE` on the branch row) so that two
    /// reviewers approving at the same instant still produce a single
    /// quorum-tipping count. Fails with `Conflict` if the review is already
    /// terminal.
    async fn record_decision(
        &self,
        review_id: Uuid,
        decision: ReviewDecision,
        decided_at: DateTime<Utc>,
    ) -> Result<DecisionSnapshot>;

    /// Cancel every non-cancelled review in a cycle except `keep`.
    /// Cancelled rows are retained — reviews are never deleted.
    async fn cancel_cycle(&self, branch_id: Uuid, cycle: u32, keep: Option<Uuid>) -> Result<()>;

    /// Discard a reviewer's pending review for a cycle, if any.
    /// Completed reviews are left untouched (audit preservation).
    async fn discard_pending(&self, branch_id: Uuid, cycle: u32, reviewer_id: Uuid) -> Result<()>;
}

// ── Review comments ────────────────────────────────────────────

#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn insert_comment(&self, comment: &ReviewComment) -> Result<()>;

    /// Load a comment by ID. `NotFound` if absent.
    async fn get_comment(&self, comment_id: Uuid) -> Result<ReviewComment>;

    /// All comments on a branch across cycles, oldest first.
    async fn list_comments(&self, branch_id: Uuid) -> Result<Vec<ReviewComment>>;

    /// Flag a comment whose anchoring hunk no longer exists.
    /// The comment body is preserved — outdated comments are never deleted.
    async fn mark_outdated(&self, comment_id: Uuid, reason: &str) -> Result<()>;
}

// ── Convergence operations ─────────────────────────────────────

#[async_trait]
pub trait OperationStore: Send + Sync {
    /// Insert a new operation, guarded: fails with `Conflict` if a
    /// non-terminal operation already exists for the branch. The guard must
    /// be atomic at the store (conditional insert), not read-then-write.
    async fn insert_guarded(&self, op: &ConvergenceOperation) -> Result<()>;

    /// Load an operation by ID. `NotFound` if absent.
    async fn get_operation(&self, operation_id: Uuid) -> Result<ConvergenceOperation>;

    async fn update_status(&self, operation_id: Uuid, status: OperationStatus) -> Result<()>;

    /// Persist validation results and any conflict details.
    async fn set_validation(
        &self,
        operation_id: Uuid,
        validation: &ValidationResults,
        conflicts: &[ConflictDetail],
    ) -> Result<()>;

    /// Record the merge commit produced by a successful convergence.
    async fn set_merge_commit(&self, operation_id: Uuid, merge_commit: &str) -> Result<()>;

    /// Move an operation to a terminal status with its completion timestamp.
    async fn complete(
        &self,
        operation_id: Uuid,
        status: OperationStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<()>;

    /// All operations for a branch, newest first.
    async fn list_for_branch(&self, branch_id: Uuid) -> Result<Vec<ConvergenceOperation>>;

    /// Most recent operation for a branch, if any.
    async fn latest_for_branch(&self, branch_id: Uuid) -> Result<Option<ConvergenceOperation>>;
}

// ── Convergence lock ───────────────────────────────────────────

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomic acquire-if-absent on (branch_id, target_ref).
    /// Returns `false` when another operation currently holds the lock —
    /// two concurrent publishes race safely and exactly one acquires.
    async fn try_acquire(
        &self,
        branch_id: Uuid,
        target_ref: &str,
        operation_id: Uuid,
    ) -> Result<bool>;

    /// Release the lock held by `operation_id`, tagging the outcome.
    /// Idempotent: releasing an already-released or unknown lock is a no-op.
    async fn release(&self, operation_id: Uuid, outcome: LockOutcome) -> Result<()>;
}

// ── Version control ────────────────────────────────────────────

/// Input to the atomic merge primitive.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub branch_ref: String,
    pub target_ref: String,
    pub branch_id: Uuid,
    pub publisher_id: Uuid,
    pub message: String,
}

/// Report from the ref store's atomic merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub success: bool,
    pub merge_commit: Option<String>,
    pub error: Option<String>,
    /// True when effects already applied during the attempt were reverted.
    pub rolled_back: bool,
}

/// The version-control collaborator: ref reads, diff computation, and the
/// atomic merge primitive. The pipeline never mutates refs except through
/// [`VersionControl::atomic_merge_ref`].
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// File-level change summary of `source_ref` relative to `target_ref`.
    async fn get_change_summary(&self, source_ref: &str, target_ref: &str)
        -> Result<ChangeSummary>;

    /// Full diff with per-file hunks between two refs.
    async fn get_branch_diff(
        &self,
        source_ref: &str,
        target_ref: &str,
        base_commit: Option<&str>,
        head_commit: Option<&str>,
    ) -> Result<BranchDiff>;

    /// Number of commits `source_ref` is ahead of `target_ref`.
    async fn commits_ahead(&self, source_ref: &str, target_ref: &str) -> Result<u32>;

    /// Advance the target ref to a commit incorporating the branch, or leave
    /// it untouched. Never produces a partial state.
    async fn atomic_merge_ref(&self, request: &MergeRequest) -> Result<MergeOutcome>;
}
