//! Row types bridging Postgres and the core domain types.
//!
//! Status columns are TEXT with CHECK constraints; parsing back into the
//! domain enums happens in the `TryFrom` impls, with a `String` error the
//! stores map to `ConvergeError::Internal` (a bad row is a bug, not input).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use converge_core::types::{
    Branch, BranchState, CommentAnchor, ConflictDetail, ConvergenceOperation, OperationStatus,
    Review, ReviewComment, ReviewDecision, ReviewStatus, TransitionLogEntry, ValidationResults,
};

#[derive(Debug, sqlx::FromRow)]
pub struct PgBranchRow {
    pub branch_id: Uuid,
    pub title: String,
    pub owner_id: Uuid,
    pub state: String,
    pub work_ref: String,
    pub base_ref: String,
    pub head_commit: Option<String>,
    pub base_commit: Option<String>,
    pub reviewers: Vec<Uuid>,
    pub required_approvals: i32,
    pub review_cycle: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgBranchRow> for Branch {
    type Error = String;

    fn try_from(row: PgBranchRow) -> Result<Self, Self::Error> {
        Ok(Branch {
            branch_id: row.branch_id,
            title: row.title,
            owner_id: row.owner_id,
            state: BranchState::parse(&row.state)
                .ok_or_else(|| format!("unknown branch state '{}'", row.state))?,
            work_ref: row.work_ref,
            base_ref: row.base_ref,
            head_commit: row.head_commit,
            base_commit: row.base_commit,
            reviewers: row.reviewers,
            required_approvals: row.required_approvals as u32,
            review_cycle: row.review_cycle as u32,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PgTransitionLogRow {
    pub entry_id: Uuid,
    pub branch_id: Uuid,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
    pub actor_id: Uuid,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl TryFrom<PgTransitionLogRow> for TransitionLogEntry {
    type Error = String;

    fn try_from(row: PgTransitionLogRow) -> Result<Self, Self::Error> {
        Ok(TransitionLogEntry {
            entry_id: row.entry_id,
            branch_id: row.branch_id,
            from_state: BranchState::parse(&row.from_state)
                .ok_or_else(|| format!("unknown branch state '{}'", row.from_state))?,
            to_state: BranchState::parse(&row.to_state)
                .ok_or_else(|| format!("unknown branch state '{}'", row.to_state))?,
            event: row.event,
            actor_id: row.actor_id,
            reason: row.reason,
            metadata: row.metadata,
            occurred_at: row.occurred_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PgReviewRow {
    pub review_id: Uuid,
    pub branch_id: Uuid,
    pub reviewer_id: Uuid,
    pub requested_by: Uuid,
    pub status: String,
    pub decision: Option<String>,
    pub cycle: i32,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl TryFrom<PgReviewRow> for Review {
    type Error = String;

    fn try_from(row: PgReviewRow) -> Result<Self, Self::Error> {
        let decision = row
            .decision
            .as_deref()
            .map(|d| {
                ReviewDecision::parse(d).ok_or_else(|| format!("unknown review decision '{d}'"))
            })
            .transpose()?;
        Ok(Review {
            review_id: row.review_id,
            branch_id: row.branch_id,
            reviewer_id: row.reviewer_id,
            requested_by: row.requested_by,
            status: ReviewStatus::parse(&row.status)
                .ok_or_else(|| format!("unknown review status '{}'", row.status))?,
            decision,
            cycle: row.cycle as u32,
            created_at: row.created_at,
            decided_at: row.decided_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PgCommentRow {
    pub comment_id: Uuid,
    pub review_id: Uuid,
    pub branch_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub anchor: Option<serde_json::Value>,
    pub parent_id: Option<Uuid>,
    pub outdated: bool,
    pub outdated_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgCommentRow> for ReviewComment {
    type Error = String;

    fn try_from(row: PgCommentRow) -> Result<Self, Self::Error> {
        let anchor: Option<CommentAnchor> = row
            .anchor
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| format!("bad comment anchor: {e}"))?;
        Ok(ReviewComment {
            comment_id: row.comment_id,
            review_id: row.review_id,
            branch_id: row.branch_id,
            author_id: row.author_id,
            body: row.body,
            anchor,
            parent_id: row.parent_id,
            outdated: row.outdated,
            outdated_reason: row.outdated_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PgOperationRow {
    pub operation_id: Uuid,
    pub branch_id: Uuid,
    pub publisher_id: Uuid,
    pub status: String,
    pub target_ref: String,
    pub message: Option<String>,
    pub validation: Option<serde_json::Value>,
    pub has_conflicts: bool,
    pub conflicts: serde_json::Value,
    pub merge_commit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PgOperationRow> for ConvergenceOperation {
    type Error = String;

    fn try_from(row: PgOperationRow) -> Result<Self, Self::Error> {
        let validation: Option<ValidationResults> = row
            .validation
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| format!("bad validation results: {e}"))?;
        let conflicts: Vec<ConflictDetail> = serde_json::from_value(row.conflicts)
            .map_err(|e| format!("bad conflict details: {e}"))?;
        Ok(ConvergenceOperation {
            operation_id: row.operation_id,
            branch_id: row.branch_id,
            publisher_id: row.publisher_id,
            status: OperationStatus::parse(&row.status)
                .ok_or_else(|| format!("unknown operation status '{}'", row.status))?,
            target_ref: row.target_ref,
            message: row.message,
            validation,
            has_conflicts: row.has_conflicts,
            conflicts,
            merge_commit: row.merge_commit,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}
