//! Review quorum engine.
//!
//! Decides, after each review decision, whether the branch should
//! auto-transition: approvals count toward the branch's quorum, a change
//! request supersedes the whole cycle. Also owns the comment thread
//! operations, including re-anchoring after resubmission.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::conflict::{stale_anchor_reason, ConflictDetector};
use crate::error::ConvergeError;
use crate::lifecycle;
use crate::ports::{BranchStore, CommentStore, Result, ReviewStore};
use crate::principal::Principal;
use crate::state_machine::BranchEvent;
use crate::types::{
    Branch, BranchState, CommentAnchor, Review, ReviewComment, ReviewDecision, ReviewStatus,
};

/// Result of an approval, for the caller's UI.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub review: Review,
    pub approval_count: u32,
    pub required_approvals: u32,
    /// True when this approval tipped the quorum and the branch moved to
    /// `approved`. At most one approval per cycle sets this.
    pub branch_approved: bool,
}

pub struct ReviewService {
    branches: Arc<dyn BranchStore>,
    reviews: Arc<dyn ReviewStore>,
    comments: Arc<dyn CommentStore>,
    detector: Arc<ConflictDetector>,
}

impl ReviewService {
    pub fn new(
        branches: Arc<dyn BranchStore>,
        reviews: Arc<dyn ReviewStore>,
        comments: Arc<dyn CommentStore>,
        detector: Arc<ConflictDetector>,
    ) -> Self {
        Self {
            branches,
            reviews,
            comments,
            detector,
        }
    }

    // ── Submission ───────────────────────────────────────────────

    /// Move a draft into review, assigning reviewers for the current cycle.
    ///
    /// One pending review is created per assigned reviewer. On resubmission
    /// after a change request, previously anchored comments are re-validated
    /// against the fresh diff and orphans are marked outdated.
    pub async fn submit_for_review(
        &self,
        branch_id: Uuid,
        reviewers: &[Uuid],
        required_approvals: u32,
        principal: &Principal,
    ) -> Result<Vec<Review>> {
        let branch = self.branches.get_branch(branch_id).await?;

        let unique: HashSet<Uuid> = reviewers.iter().copied().collect();
        if unique.is_empty() {
            return Err(ConvergeError::InvalidInput(
                "at least one reviewer must be assigned".into(),
            ));
        }
        if unique.contains(&branch.owner_id) {
            return Err(ConvergeError::InvalidInput(
                "the branch owner cannot be assigned as a reviewer".into(),
            ));
        }
        if required_approvals == 0 || required_approvals as usize > unique.len() {
            return Err(ConvergeError::InvalidInput(format!(
                "required approvals must be between 1 and {}",
                unique.len()
            )));
        }

        lifecycle::apply_transition(
            self.branches.as_ref(),
            &branch,
            BranchEvent::SubmitForReview,
            principal,
            None,
            Some(json!({
                "reviewers": unique.len(),
                "required_approvals": required_approvals,
                "cycle": branch.review_cycle,
            })),
        )
        .await?;

        self.branches
            .set_reviewers(branch_id, &unique.iter().copied().collect::<Vec<_>>())
            .await?;
        self.branches
            .set_review_round(branch_id, required_approvals, branch.review_cycle)
            .await?;

        let now = Utc::now();
        let new_reviews: Vec<Review> = unique
            .into_iter()
            .map(|reviewer_id| Review {
                review_id: Uuid::new_v4(),
                branch_id,
                reviewer_id,
                requested_by: principal.user_id,
                status: ReviewStatus::Pending,
                decision: None,
                cycle: branch.review_cycle,
                created_at: now,
                decided_at: None,
            })
            .collect();
        self.reviews.insert_reviews(&new_reviews).await?;

        // Resubmission may have invalidated inline anchors.
        if branch.review_cycle > 1 {
            self.refresh_comments(branch_id).await?;
        }

        Ok(new_reviews)
    }

    // ── Decisions ────────────────────────────────────────────────

    /// Record an approval; fires the branch's `Approve` transition exactly
    /// once per cycle, when the quorum threshold is crossed.
    pub async fn approve(&self, review_id: Uuid, principal: &Principal) -> Result<ApprovalOutcome> {
        let review = self.reviews.get_review(review_id).await?;
        let branch = self.branches.get_branch(review.branch_id).await?;
        self.guard_decision(&review, &branch, principal)?;

        let snapshot = self
            .reviews
            .record_decision(review_id, ReviewDecision::Approved, Utc::now())
            .await?;

        crate::metrics::emit_review_decision(
            review_id,
            branch.branch_id,
            ReviewDecision::Approved.as_str(),
            snapshot.approval_count,
        );

        // Each decision adds exactly one approval, so exactly one decider
        // observes the crossing even under concurrent submissions.
        let branch_approved = snapshot.approval_count == branch.required_approvals;
        if branch_approved {
            lifecycle::apply_transition(
                self.branches.as_ref(),
                &branch,
                BranchEvent::Approve,
                principal,
                None,
                Some(json!({
                    "approval_count": snapshot.approval_count,
                    "required_approvals": branch.required_approvals,
                })),
            )
            .await?;
        }

        Ok(ApprovalOutcome {
            review: snapshot.review,
            approval_count: snapshot.approval_count,
            required_approvals: branch.required_approvals,
            branch_approved,
        })
    }

    /// Record a change request: every other review of the cycle is
    /// invalidated, the cycle counter advances, and the branch returns to
    /// draft. Comments are preserved across cycles.
    pub async fn request_changes(
        &self,
        review_id: Uuid,
        principal: &Principal,
        reason: String,
    ) -> Result<Review> {
        if reason.trim().is_empty() {
            return Err(ConvergeError::InvalidInput(
                "a change request requires a reason".into(),
            ));
        }

        let review = self.reviews.get_review(review_id).await?;
        let branch = self.branches.get_branch(review.branch_id).await?;
        self.guard_decision(&review, &branch, principal)?;

        let snapshot = self
            .reviews
            .record_decision(review_id, ReviewDecision::ChangesRequested, Utc::now())
            .await?;

        crate::metrics::emit_review_decision(
            review_id,
            branch.branch_id,
            ReviewDecision::ChangesRequested.as_str(),
            snapshot.approval_count,
        );

        // Supersede the cycle: prior approvals no longer count.
        self.reviews
            .cancel_cycle(branch.branch_id, branch.review_cycle, Some(review_id))
            .await?;
        let next_cycle = branch.review_cycle + 1;
        self.branches
            .set_review_round(branch.branch_id, branch.required_approvals, next_cycle)
            .await?;
        crate::metrics::emit_cycle_invalidated(branch.branch_id, branch.review_cycle, next_cycle);

        lifecycle::apply_transition(
            self.branches.as_ref(),
            &branch,
            BranchEvent::RequestChanges,
            principal,
            Some(reason),
            Some(json!({ "superseded_cycle": branch.review_cycle })),
        )
        .await?;

        Ok(snapshot.review)
    }

    /// Shared decision guards: pending review, deciding reviewer, no
    /// self-review (independent of role, including administrators), branch
    /// still in review, current cycle.
    fn guard_decision(
        &self,
        review: &Review,
        branch: &Branch,
        principal: &Principal,
    ) -> Result<()> {
        if review.status.is_terminal() {
            return Err(ConvergeError::InvalidInput("review already completed".into()));
        }
        if review.reviewer_id != principal.user_id {
            return Err(ConvergeError::Forbidden(
                "only the assigned reviewer may decide this review".into(),
            ));
        }
        if review.reviewer_id == branch.owner_id {
            return Err(ConvergeError::Forbidden(
                "self-review is forbidden regardless of role".into(),
            ));
        }
        if branch.state != BranchState::Review {
            return Err(ConvergeError::InvalidInput(format!(
                "branch is {}, not under review",
                branch.state
            )));
        }
        if review.cycle != branch.review_cycle {
            return Err(ConvergeError::InvalidInput(
                "review belongs to a superseded cycle".into(),
            ));
        }
        Ok(())
    }

    // ── Reviewer removal ─────────────────────────────────────────

    /// Unassign a reviewer. Their pending review is discarded (completed
    /// reviews are kept for audit). Removing the last reviewer returns the
    /// branch to draft through the state machine and clears the list.
    pub async fn remove_reviewer(
        &self,
        branch_id: Uuid,
        reviewer_id: Uuid,
        principal: &Principal,
    ) -> Result<Branch> {
        let branch = self.branches.get_branch(branch_id).await?;

        if branch.owner_id != principal.user_id && !principal.is_administrator() {
            return Err(ConvergeError::Forbidden(
                "only the branch owner or an administrator may remove reviewers".into(),
            ));
        }
        if !branch.is_reviewer(reviewer_id) {
            return Err(ConvergeError::NotFound(format!(
                "reviewer {reviewer_id} is not assigned to branch {branch_id}"
            )));
        }

        self.reviews
            .discard_pending(branch_id, branch.review_cycle, reviewer_id)
            .await?;

        let remaining: Vec<Uuid> = branch
            .reviewers
            .iter()
            .copied()
            .filter(|r| *r != reviewer_id)
            .collect();

        if remaining.is_empty() && branch.state == BranchState::Review {
            // Nobody left to review: same semantics as a change request,
            // driven by the pipeline rather than a reviewer.
            lifecycle::apply_system_transition(
                self.branches.as_ref(),
                &branch,
                BranchEvent::RequestChanges,
                principal.user_id,
                Some("last assigned reviewer removed".into()),
                Some(json!({ "removed_reviewer": reviewer_id })),
            )
            .await?;
            self.branches
                .set_review_round(branch_id, branch.required_approvals, branch.review_cycle + 1)
                .await?;
        }

        self.branches.set_reviewers(branch_id, &remaining).await?;
        self.branches.get_branch(branch_id).await
    }

    // ── Comments ─────────────────────────────────────────────────

    /// Add a top-level comment to a review, optionally anchored to a hunk.
    pub async fn add_comment(
        &self,
        review_id: Uuid,
        principal: &Principal,
        body: String,
        anchor: Option<CommentAnchor>,
    ) -> Result<ReviewComment> {
        if body.trim().is_empty() {
            return Err(ConvergeError::InvalidInput("comment body is required".into()));
        }
        let review = self.reviews.get_review(review_id).await?;

        let now = Utc::now();
        let comment = ReviewComment {
            comment_id: Uuid::new_v4(),
            review_id,
            branch_id: review.branch_id,
            author_id: principal.user_id,
            body,
            anchor,
            parent_id: None,
            outdated: false,
            outdated_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.comments.insert_comment(&comment).await?;
        Ok(comment)
    }

    /// Reply to a comment. Thread depth is capped at 2 — replying to a
    /// reply is rejected.
    pub async fn reply_to_comment(
        &self,
        parent_id: Uuid,
        principal: &Principal,
        body: String,
    ) -> Result<ReviewComment> {
        if body.trim().is_empty() {
            return Err(ConvergeError::InvalidInput("comment body is required".into()));
        }
        let parent = self.comments.get_comment(parent_id).await?;
        if parent.parent_id.is_some() {
            return Err(ConvergeError::InvalidInput(
                "comment threads are capped at depth 2; cannot reply to a reply".into(),
            ));
        }

        let now = Utc::now();
        let comment = ReviewComment {
            comment_id: Uuid::new_v4(),
            review_id: parent.review_id,
            branch_id: parent.branch_id,
            author_id: principal.user_id,
            body,
            anchor: None,
            parent_id: Some(parent_id),
            outdated: false,
            outdated_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.comments.insert_comment(&comment).await?;
        Ok(comment)
    }

    /// Re-validate anchored comments against the branch's latest diff.
    /// Comments whose hunk disappeared are flagged outdated with a
    /// human-readable reason — never silently dropped. Returns the number
    /// of comments newly marked outdated.
    pub async fn refresh_comments(&self, branch_id: Uuid) -> Result<u32> {
        let branch = self.branches.get_branch(branch_id).await?;
        let diff = self
            .detector
            .branch_diff(
                &branch.work_ref,
                &branch.base_ref,
                branch.base_commit.as_deref(),
                branch.head_commit.as_deref(),
            )
            .await?;

        let mut newly_outdated = 0;
        for comment in self.comments.list_comments(branch_id).await? {
            if comment.outdated {
                continue;
            }
            if let Some(reason) = stale_anchor_reason(&diff, &comment) {
                self.comments.mark_outdated(comment.comment_id, &reason).await?;
                newly_outdated += 1;
            }
        }
        Ok(newly_outdated)
    }

    /// Reviews for the branch's current cycle.
    pub async fn current_reviews(&self, branch_id: Uuid) -> Result<Vec<Review>> {
        let branch = self.branches.get_branch(branch_id).await?;
        self.reviews.list_reviews(branch_id, branch.review_cycle).await
    }
}
