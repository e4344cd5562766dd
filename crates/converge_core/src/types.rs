//! Convergence pipeline value types — branches, operations, reviews, comments.
//! Pure value types — no sqlx, no DB dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Branch lifecycle state ─────────────────────────────────────

/// Lifecycle state of a branch.
///
/// Transitions (driven only by the state machine):
///   draft → review → approved → published
///   review → draft (changes requested)
///   draft | review | published → archived
/// `archived` is terminal — no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchState {
    Draft,
    Review,
    Approved,
    Published,
    Archived,
}

impl BranchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Review => "review",
            Self::Approved => "approved",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "review" => Some(Self::Review),
            "approved" => Some(Self::Approved),
            "published" => Some(Self::Published),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Whether this state has no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived)
    }
}

impl std::fmt::Display for BranchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Branch ─────────────────────────────────────────────────────

/// An isolated unit of content work with its own lifecycle state and refs.
///
/// A branch occupies exactly one lifecycle state at any instant; state
/// changes only through the state machine. Published branches are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub branch_id: Uuid,
    pub title: String,
    pub owner_id: Uuid,
    pub state: BranchState,
    /// Ref the contributor's work lives on.
    pub work_ref: String,
    /// Ref this branch converges into.
    pub base_ref: String,
    pub head_commit: Option<String>,
    pub base_commit: Option<String>,
    /// Assigned reviewers — always disjoint from the owner.
    pub reviewers: Vec<Uuid>,
    pub required_approvals: u32,
    /// Incremented each time a change request supersedes the current cycle.
    pub review_cycle: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    pub fn is_reviewer(&self, user_id: Uuid) -> bool {
        self.reviewers.contains(&user_id)
    }
}

// ── Transition log ─────────────────────────────────────────────

/// Audit record of one lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub entry_id: Uuid,
    pub branch_id: Uuid,
    pub from_state: BranchState,
    pub to_state: BranchState,
    pub event: String,
    pub actor_id: Uuid,
    pub reason: Option<String>,
    /// Event-specific context, e.g. `{approval_count, required_approvals}`
    /// on quorum approval or `{operation_id, merge_commit}` on publish.
    pub metadata: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

// ── Convergence operation ──────────────────────────────────────

/// Status of a convergence (publish) operation.
///
/// pending → validating → merging → succeeded | failed | rolled_back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Validating,
    Merging,
    Succeeded,
    Failed,
    RolledBack,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Merging => "merging",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "validating" => Some(Self::Validating),
            "merging" => Some(Self::Merging),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }

    /// Terminal operations are immutable audit records.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::RolledBack)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Results of the three independent pre-merge checks.
/// All three always run and are reported — never short-circuited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResults {
    pub branch_approved: bool,
    pub has_commits_ahead: bool,
    pub no_conflicts: bool,
}

impl ValidationResults {
    pub fn passed(&self) -> bool {
        self.branch_approved && self.has_commits_ahead && self.no_conflicts
    }
}

/// One attempt to merge a branch into its target ref.
/// At most one non-terminal operation exists per branch at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceOperation {
    pub operation_id: Uuid,
    pub branch_id: Uuid,
    pub publisher_id: Uuid,
    pub status: OperationStatus,
    pub target_ref: String,
    /// Publisher-supplied merge commit message, if any.
    pub message: Option<String>,
    pub validation: Option<ValidationResults>,
    pub has_conflicts: bool,
    pub conflicts: Vec<ConflictDetail>,
    pub merge_commit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ── Conflicts ──────────────────────────────────────────────────

/// Kind of non-mergeable overlap between two refs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Same file modified on both sides.
    ContentOverlap,
    /// Modified on one side, deleted on the other.
    DeleteModify,
    /// Reported by the merge primitive itself.
    MergeFailure,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentOverlap => "content_overlap",
            Self::DeleteModify => "delete_modify",
            Self::MergeFailure => "merge_failure",
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One detected conflict between a branch and its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub path: String,
    pub conflict_type: ConflictType,
    pub description: String,
}

// ── Convergence lock ───────────────────────────────────────────

/// Outcome tag recorded when a lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOutcome {
    Succeeded,
    Failed,
    RolledBack,
}

impl LockOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for LockOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Reviews ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Completed,
    Cancelled,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// A review in terminal status cannot be re-decided.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::ChangesRequested => "changes_requested",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Self::Approved),
            "changes_requested" => Some(Self::ChangesRequested),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One reviewer's assignment against one submission cycle of a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub review_id: Uuid,
    pub branch_id: Uuid,
    pub reviewer_id: Uuid,
    pub requested_by: Uuid,
    pub status: ReviewStatus,
    pub decision: Option<ReviewDecision>,
    pub cycle: u32,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

// ── Review comments ────────────────────────────────────────────

/// Anchor tying a comment to a location in the branch diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentAnchor {
    pub path: String,
    /// Line in the new version of the file.
    pub line: u32,
    /// Stable key of the hunk the comment was written against.
    pub hunk_id: String,
}

/// An entry in a review's comment thread. Thread depth is capped at 2:
/// a comment may have replies, replies may not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub comment_id: Uuid,
    pub review_id: Uuid,
    pub branch_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub anchor: Option<CommentAnchor>,
    pub parent_id: Option<Uuid>,
    /// Set when the anchoring hunk no longer exists after resubmission.
    /// Outdated comments are preserved, never deleted.
    pub outdated: bool,
    pub outdated_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Version-control collaborator views ─────────────────────────

/// File-level summary of changes between two refs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

/// A contiguous region of changed lines in a file diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
}

impl DiffHunk {
    /// Stable key identifying this hunk within its file.
    pub fn key(&self, path: &str) -> String {
        format!(
            "{}@-{},{}+{},{}",
            path, self.old_start, self.old_lines, self.new_start, self.new_lines
        )
    }

    /// Whether a line in the new version of the file falls inside this hunk.
    pub fn covers_line(&self, line: u32) -> bool {
        line >= self.new_start && line < self.new_start + self.new_lines.max(1)
    }
}

/// Per-file portion of a branch diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub hunks: Vec<DiffHunk>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub files_changed: u32,
    pub insertions: u32,
    pub deletions: u32,
}

/// Full diff between two refs, with per-file hunks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchDiff {
    pub files: Vec<FileDiff>,
    pub stats: DiffStats,
}
