//! Postgres implementations of the converge_core storage port traits.
//!
//! Each adapter is a newtype wrapping PgPool. All SQL is runtime-checked
//! (sqlx::query, not sqlx::query!) to avoid a compile-time DB requirement.
//!
//! The one-active-operation-per-branch guard is the partial unique index
//! `one_active_operation_per_branch`; `insert_guarded` maps its violation to
//! `ConvergeError::Conflict`. Decision recording serializes per branch with
//! `SELECT ... FOR UPDATE` on the branch row so the quorum count is exact.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use converge_core::error::ConvergeError;
use converge_core::ports::{
    BranchStore, CommentStore, DecisionSnapshot, OperationStore, Result, ReviewStore,
};
use converge_core::types::*;

use crate::rows::{PgBranchRow, PgCommentRow, PgOperationRow, PgReviewRow, PgTransitionLogRow};

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ── PgBranchStore ─────────────────────────────────────────────

pub struct PgBranchStore {
    pool: PgPool,
}

impl PgBranchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const BRANCH_COLS: &str = "branch_id, title, owner_id, state, work_ref, base_ref, \
     head_commit, base_commit, reviewers, required_approvals, review_cycle, \
     created_at, updated_at";

#[async_trait]
impl BranchStore for PgBranchStore {
    async fn insert_branch(&self, branch: &Branch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO converge.branches
                (branch_id, title, owner_id, state, work_ref, base_ref,
                 head_commit, base_commit, reviewers, required_approvals,
                 review_cycle, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(branch.branch_id)
        .bind(&branch.title)
        .bind(branch.owner_id)
        .bind(branch.state.as_str())
        .bind(&branch.work_ref)
        .bind(&branch.base_ref)
        .bind(branch.head_commit.as_deref())
        .bind(branch.base_commit.as_deref())
        .bind(&branch.reviewers)
        .bind(branch.required_approvals as i32)
        .bind(branch.review_cycle as i32)
        .bind(branch.created_at)
        .bind(branch.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn get_branch(&self, branch_id: Uuid) -> Result<Branch> {
        let row = sqlx::query_as::<_, PgBranchRow>(&format!(
            "SELECT {BRANCH_COLS} FROM converge.branches WHERE branch_id = $1"
        ))
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .ok_or_else(|| ConvergeError::NotFound(format!("branch {branch_id} not found")))?;
        row.try_into()
            .map_err(|e: String| ConvergeError::Internal(anyhow!(e)))
    }

    async fn update_state(&self, branch_id: Uuid, state: BranchState) -> Result<()> {
        let result = sqlx::query(
            "UPDATE converge.branches SET state = $2, updated_at = now() WHERE branch_id = $1",
        )
        .bind(branch_id)
        .bind(state.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Err(ConvergeError::NotFound(format!(
                "branch {branch_id} not found"
            )));
        }
        Ok(())
    }

    async fn set_reviewers(&self, branch_id: Uuid, reviewers: &[Uuid]) -> Result<()> {
        let result = sqlx::query(
            "UPDATE converge.branches SET reviewers = $2, updated_at = now() WHERE branch_id = $1",
        )
        .bind(branch_id)
        .bind(reviewers)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Err(ConvergeError::NotFound(format!(
                "branch {branch_id} not found"
            )));
        }
        Ok(())
    }

    async fn set_review_round(
        &self,
        branch_id: Uuid,
        required_approvals: u32,
        review_cycle: u32,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE converge.branches
            SET required_approvals = $2, review_cycle = $3, updated_at = now()
            WHERE branch_id = $1
            "#,
        )
        .bind(branch_id)
        .bind(required_approvals as i32)
        .bind(review_cycle as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Err(ConvergeError::NotFound(format!(
                "branch {branch_id} not found"
            )));
        }
        Ok(())
    }

    async fn log_transition(&self, entry: &TransitionLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO converge.transition_log
                (entry_id, branch_id, from_state, to_state, event,
                 actor_id, reason, metadata, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.entry_id)
        .bind(entry.branch_id)
        .bind(entry.from_state.as_str())
        .bind(entry.to_state.as_str())
        .bind(&entry.event)
        .bind(entry.actor_id)
        .bind(entry.reason.as_deref())
        .bind(&entry.metadata)
        .bind(entry.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn get_transition_log(&self, branch_id: Uuid) -> Result<Vec<TransitionLogEntry>> {
        let rows = sqlx::query_as::<_, PgTransitionLogRow>(
            r#"
            SELECT entry_id, branch_id, from_state, to_state, event,
                   actor_id, reason, metadata, occurred_at
            FROM converge.transition_log
            WHERE branch_id = $1
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter()
            .map(|r| {
                r.try_into()
                    .map_err(|e: String| ConvergeError::Internal(anyhow!(e)))
            })
            .collect()
    }
}

// ── PgReviewStore ─────────────────────────────────────────────

pub struct PgReviewStore {
    pool: PgPool,
}

impl PgReviewStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const REVIEW_COLS: &str = "review_id, branch_id, reviewer_id, requested_by, \
     status, decision, cycle, created_at, decided_at";

#[async_trait]
impl ReviewStore for PgReviewStore {
    async fn insert_reviews(&self, reviews: &[Review]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;
        for review in reviews {
            sqlx::query(
                r#"
                INSERT INTO converge.reviews
                    (review_id, branch_id, reviewer_id, requested_by,
                     status, decision, cycle, created_at, decided_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(review.review_id)
            .bind(review.branch_id)
            .bind(review.reviewer_id)
            .bind(review.requested_by)
            .bind(review.status.as_str())
            .bind(review.decision.map(|d| d.as_str()))
            .bind(review.cycle as i32)
            .bind(review.created_at)
            .bind(review.decided_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        }
        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn get_review(&self, review_id: Uuid) -> Result<Review> {
        let row = sqlx::query_as::<_, PgReviewRow>(&format!(
            "SELECT {REVIEW_COLS} FROM converge.reviews WHERE review_id = $1"
        ))
        .bind(review_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .ok_or_else(|| ConvergeError::NotFound(format!("review {review_id} not found")))?;
        row.try_into()
            .map_err(|e: String| ConvergeError::Internal(anyhow!(e)))
    }

    async fn list_reviews(&self, branch_id: Uuid, cycle: u32) -> Result<Vec<Review>> {
        let rows = sqlx::query_as::<_, PgReviewRow>(&format!(
            r#"
            SELECT {REVIEW_COLS}
            FROM converge.reviews
            WHERE branch_id = $1 AND cycle = $2
            ORDER BY created_at ASC
            "#
        ))
        .bind(branch_id)
        .bind(cycle as i32)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter()
            .map(|r| {
                r.try_into()
                    .map_err(|e: String| ConvergeError::Internal(anyhow!(e)))
            })
            .collect()
    }

    async fn record_decision(
        &self,
        review_id: Uuid,
        decision: ReviewDecision,
        decided_at: DateTime<Utc>,
    ) -> Result<DecisionSnapshot> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        let row = sqlx::query_as::<_, PgReviewRow>(&format!(
            "SELECT {REVIEW_COLS} FROM converge.reviews WHERE review_id = $1"
        ))
        .bind(review_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?
        .ok_or_else(|| ConvergeError::NotFound(format!("review {review_id} not found")))?;
        let review: Review = row
            .try_into()
            .map_err(|e: String| ConvergeError::Internal(anyhow!(e)))?;

        // Serialize concurrent decisions on the same branch so the approval
        // count each decider observes is exact.
        sqlx::query("SELECT branch_id FROM converge.branches WHERE branch_id = $1 FOR UPDATE")
            .bind(review.branch_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;

        if review.status != ReviewStatus::Pending {
            return Err(ConvergeError::Conflict(format!(
                "review {review_id} is already {}",
                review.status
            )));
        }

        let updated = sqlx::query_as::<_, PgReviewRow>(&format!(
            r#"
            UPDATE converge.reviews
            SET status = 'completed', decision = $2, decided_at = $3
            WHERE review_id = $1 AND status = 'pending'
            RETURNING {REVIEW_COLS}
            "#
        ))
        .bind(review_id)
        .bind(decision.as_str())
        .bind(decided_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?
        .ok_or_else(|| ConvergeError::Conflict(format!("review {review_id} already decided")))?;
        let review: Review = updated
            .try_into()
            .map_err(|e: String| ConvergeError::Internal(anyhow!(e)))?;

        let approval_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM converge.reviews
            WHERE branch_id = $1 AND cycle = $2
              AND status = 'completed' AND decision = 'approved'
            "#,
        )
        .bind(review.branch_id)
        .bind(review.cycle as i32)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;

        tx.commit().await.map_err(|e| anyhow!(e))?;

        Ok(DecisionSnapshot {
            review,
            approval_count: approval_count as u32,
        })
    }

    async fn cancel_cycle(&self, branch_id: Uuid, cycle: u32, keep: Option<Uuid>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE converge.reviews
            SET status = 'cancelled'
            WHERE branch_id = $1 AND cycle = $2
              AND status <> 'cancelled'
              AND ($3::uuid IS NULL OR review_id <> $3)
            "#,
        )
        .bind(branch_id)
        .bind(cycle as i32)
        .bind(keep)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn discard_pending(&self, branch_id: Uuid, cycle: u32, reviewer_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE converge.reviews
            SET status = 'cancelled'
            WHERE branch_id = $1 AND cycle = $2 AND reviewer_id = $3
              AND status = 'pending'
            "#,
        )
        .bind(branch_id)
        .bind(cycle as i32)
        .bind(reviewer_id)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }
}

// ── PgCommentStore ────────────────────────────────────────────

pub struct PgCommentStore {
    pool: PgPool,
}

impl PgCommentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COMMENT_COLS: &str = "comment_id, review_id, branch_id, author_id, body, \
     anchor, parent_id, outdated, outdated_reason, created_at, updated_at";

#[async_trait]
impl CommentStore for PgCommentStore {
    async fn insert_comment(&self, comment: &ReviewComment) -> Result<()> {
        let anchor = comment
            .anchor
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| anyhow!(e))?;
        sqlx::query(
            r#"
            INSERT INTO converge.review_comments
                (comment_id, review_id, branch_id, author_id, body,
                 anchor, parent_id, outdated, outdated_reason,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(comment.comment_id)
        .bind(comment.review_id)
        .bind(comment.branch_id)
        .bind(comment.author_id)
        .bind(&comment.body)
        .bind(anchor)
        .bind(comment.parent_id)
        .bind(comment.outdated)
        .bind(comment.outdated_reason.as_deref())
        .bind(comment.created_at)
        .bind(comment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn get_comment(&self, comment_id: Uuid) -> Result<ReviewComment> {
        let row = sqlx::query_as::<_, PgCommentRow>(&format!(
            "SELECT {COMMENT_COLS} FROM converge.review_comments WHERE comment_id = $1"
        ))
        .bind(comment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .ok_or_else(|| ConvergeError::NotFound(format!("comment {comment_id} not found")))?;
        row.try_into()
            .map_err(|e: String| ConvergeError::Internal(anyhow!(e)))
    }

    async fn list_comments(&self, branch_id: Uuid) -> Result<Vec<ReviewComment>> {
        let rows = sqlx::query_as::<_, PgCommentRow>(&format!(
            r#"
            SELECT {COMMENT_COLS}
            FROM converge.review_comments
            WHERE branch_id = $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter()
            .map(|r| {
                r.try_into()
                    .map_err(|e: String| ConvergeError::Internal(anyhow!(e)))
            })
            .collect()
    }

    async fn mark_outdated(&self, comment_id: Uuid, reason: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE converge.review_comments
            SET outdated = TRUE, outdated_reason = $2, updated_at = now()
            WHERE comment_id = $1
            "#,
        )
        .bind(comment_id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Err(ConvergeError::NotFound(format!(
                "comment {comment_id} not found"
            )));
        }
        Ok(())
    }
}

// ── PgOperationStore ──────────────────────────────────────────

pub struct PgOperationStore {
    pool: PgPool,
}

impl PgOperationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const OPERATION_COLS: &str = "operation_id, branch_id, publisher_id, status, \
     target_ref, message, validation, has_conflicts, conflicts, merge_commit, \
     created_at, completed_at";

#[async_trait]
impl OperationStore for PgOperationStore {
    async fn insert_guarded(&self, op: &ConvergenceOperation) -> Result<()> {
        let conflicts = serde_json::to_value(&op.conflicts).map_err(|e| anyhow!(e))?;
        let validation = op
            .validation
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| anyhow!(e))?;
        // The partial unique index one_active_operation_per_branch makes this
        // insert the atomic guard: a second non-terminal operation violates it.
        let result = sqlx::query(
            r#"
            INSERT INTO converge.convergence_operations
                (operation_id, branch_id, publisher_id, status, target_ref,
                 message, validation, has_conflicts, conflicts, merge_commit,
                 created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(op.operation_id)
        .bind(op.branch_id)
        .bind(op.publisher_id)
        .bind(op.status.as_str())
        .bind(&op.target_ref)
        .bind(op.message.as_deref())
        .bind(validation)
        .bind(op.has_conflicts)
        .bind(conflicts)
        .bind(op.merge_commit.as_deref())
        .bind(op.created_at)
        .bind(op.completed_at)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(ConvergeError::Conflict(format!(
                "a convergence operation is already active for branch {}",
                op.branch_id
            ))),
            Err(e) => Err(ConvergeError::Internal(anyhow!(e))),
        }
    }

    async fn get_operation(&self, operation_id: Uuid) -> Result<ConvergenceOperation> {
        let row = sqlx::query_as::<_, PgOperationRow>(&format!(
            "SELECT {OPERATION_COLS} FROM converge.convergence_operations WHERE operation_id = $1"
        ))
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?
        .ok_or_else(|| ConvergeError::NotFound(format!("operation {operation_id} not found")))?;
        row.try_into()
            .map_err(|e: String| ConvergeError::Internal(anyhow!(e)))
    }

    async fn update_status(&self, operation_id: Uuid, status: OperationStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE converge.convergence_operations SET status = $2 WHERE operation_id = $1",
        )
        .bind(operation_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Err(ConvergeError::NotFound(format!(
                "operation {operation_id} not found"
            )));
        }
        Ok(())
    }

    async fn set_validation(
        &self,
        operation_id: Uuid,
        validation: &ValidationResults,
        conflicts: &[ConflictDetail],
    ) -> Result<()> {
        let validation = serde_json::to_value(validation).map_err(|e| anyhow!(e))?;
        let conflict_json = serde_json::to_value(conflicts).map_err(|e| anyhow!(e))?;
        let result = sqlx::query(
            r#"
            UPDATE converge.convergence_operations
            SET validation = $2, has_conflicts = $3, conflicts = $4
            WHERE operation_id = $1
            "#,
        )
        .bind(operation_id)
        .bind(validation)
        .bind(!conflicts.is_empty())
        .bind(conflict_json)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Err(ConvergeError::NotFound(format!(
                "operation {operation_id} not found"
            )));
        }
        Ok(())
    }

    async fn set_merge_commit(&self, operation_id: Uuid, merge_commit: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE converge.convergence_operations SET merge_commit = $2 WHERE operation_id = $1",
        )
        .bind(operation_id)
        .bind(merge_commit)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Err(ConvergeError::NotFound(format!(
                "operation {operation_id} not found"
            )));
        }
        Ok(())
    }

    async fn complete(
        &self,
        operation_id: Uuid,
        status: OperationStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE converge.convergence_operations
            SET status = $2, completed_at = $3
            WHERE operation_id = $1
            "#,
        )
        .bind(operation_id)
        .bind(status.as_str())
        .bind(completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Err(ConvergeError::NotFound(format!(
                "operation {operation_id} not found"
            )));
        }
        Ok(())
    }

    async fn list_for_branch(&self, branch_id: Uuid) -> Result<Vec<ConvergenceOperation>> {
        let rows = sqlx::query_as::<_, PgOperationRow>(&format!(
            r#"
            SELECT {OPERATION_COLS}
            FROM converge.convergence_operations
            WHERE branch_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        rows.into_iter()
            .map(|r| {
                r.try_into()
                    .map_err(|e: String| ConvergeError::Internal(anyhow!(e)))
            })
            .collect()
    }

    async fn latest_for_branch(&self, branch_id: Uuid) -> Result<Option<ConvergenceOperation>> {
        let row = sqlx::query_as::<_, PgOperationRow>(&format!(
            r#"
            SELECT {OPERATION_COLS}
            FROM converge.convergence_operations
            WHERE branch_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(|r| {
            r.try_into()
                .map_err(|e: String| ConvergeError::Internal(anyhow!(e)))
        })
        .transpose()
    }
}
