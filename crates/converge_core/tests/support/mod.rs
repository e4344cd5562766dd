//! In-memory port implementations for integration tests.
//!
//! `MemStore` implements every storage trait over a single mutex-held state,
//! mirroring the transactional guarantees the Postgres adapter provides:
//! guarded operation insert, atomic decision counting, insert-if-absent lock.
//! `FakeVcs` is scripted per test.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use converge_core::error::ConvergeError;
use converge_core::ports::{
    BranchStore, CommentStore, DecisionSnapshot, LockStore, MergeOutcome, MergeRequest,
    OperationStore, Result, ReviewStore, VersionControl,
};
use converge_core::types::*;
use converge_core::{
    BranchService, ConflictDetector, ConvergenceService, CreateBranchInput, Principal, Role,
    ReviewService,
};

// ── MemStore ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LockRow {
    pub operation_id: Uuid,
    pub branch_id: Uuid,
    pub target_ref: String,
    pub released: bool,
    pub outcome: Option<LockOutcome>,
}

#[derive(Default)]
struct State {
    branches: HashMap<Uuid, Branch>,
    log: Vec<TransitionLogEntry>,
    reviews: HashMap<Uuid, Review>,
    review_order: Vec<Uuid>,
    comments: HashMap<Uuid, ReviewComment>,
    comment_order: Vec<Uuid>,
    operations: HashMap<Uuid, ConvergenceOperation>,
    operation_order: Vec<Uuid>,
    locks: Vec<LockRow>,
}

#[derive(Default)]
pub struct MemStore {
    state: Mutex<State>,
}

impl MemStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every lock row ever created, for pairing assertions.
    pub fn lock_history(&self) -> Vec<LockRow> {
        self.state.lock().unwrap().locks.clone()
    }

    pub fn live_locks(&self) -> Vec<LockRow> {
        self.state
            .lock()
            .unwrap()
            .locks
            .iter()
            .filter(|l| !l.released)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BranchStore for MemStore {
    async fn insert_branch(&self, branch: &Branch) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .branches
            .insert(branch.branch_id, branch.clone());
        Ok(())
    }

    async fn get_branch(&self, branch_id: Uuid) -> Result<Branch> {
        self.state
            .lock()
            .unwrap()
            .branches
            .get(&branch_id)
            .cloned()
            .ok_or_else(|| ConvergeError::NotFound(format!("branch {branch_id} not found")))
    }

    async fn update_state(&self, branch_id: Uuid, state: BranchState) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let branch = guard
            .branches
            .get_mut(&branch_id)
            .ok_or_else(|| ConvergeError::NotFound(format!("branch {branch_id} not found")))?;
        branch.state = state;
        branch.updated_at = Utc::now();
        Ok(())
    }

    async fn set_reviewers(&self, branch_id: Uuid, reviewers: &[Uuid]) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let branch = guard
            .branches
            .get_mut(&branch_id)
            .ok_or_else(|| ConvergeError::NotFound(format!("branch {branch_id} not found")))?;
        branch.reviewers = reviewers.to_vec();
        Ok(())
    }

    async fn set_review_round(
        &self,
        branch_id: Uuid,
        required_approvals: u32,
        review_cycle: u32,
    ) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let branch = guard
            .branches
            .get_mut(&branch_id)
            .ok_or_else(|| ConvergeError::NotFound(format!("branch {branch_id} not found")))?;
        branch.required_approvals = required_approvals;
        branch.review_cycle = review_cycle;
        Ok(())
    }

    async fn log_transition(&self, entry: &TransitionLogEntry) -> Result<()> {
        self.state.lock().unwrap().log.push(entry.clone());
        Ok(())
    }

    async fn get_transition_log(&self, branch_id: Uuid) -> Result<Vec<TransitionLogEntry>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|e| e.branch_id == branch_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReviewStore for MemStore {
    async fn insert_reviews(&self, reviews: &[Review]) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        for review in reviews {
            guard.reviews.insert(review.review_id, review.clone());
            guard.review_order.push(review.review_id);
        }
        Ok(())
    }

    async fn get_review(&self, review_id: Uuid) -> Result<Review> {
        self.state
            .lock()
            .unwrap()
            .reviews
            .get(&review_id)
            .cloned()
            .ok_or_else(|| ConvergeError::NotFound(format!("review {review_id} not found")))
    }

    async fn list_reviews(&self, branch_id: Uuid, cycle: u32) -> Result<Vec<Review>> {
        let guard = self.state.lock().unwrap();
        Ok(guard
            .review_order
            .iter()
            .filter_map(|id| guard.reviews.get(id))
            .filter(|r| r.branch_id == branch_id && r.cycle == cycle)
            .cloned()
            .collect())
    }

    async fn record_decision(
        &self,
        review_id: Uuid,
        decision: ReviewDecision,
        decided_at: DateTime<Utc>,
    ) -> Result<DecisionSnapshot> {
        // The whole decide-and-count runs under one mutex acquisition,
        // matching the adapter's transaction boundary.
        let mut guard = self.state.lock().unwrap();
        let review = guard
            .reviews
            .get_mut(&review_id)
            .ok_or_else(|| ConvergeError::NotFound(format!("review {review_id} not found")))?;
        if review.status.is_terminal() {
            return Err(ConvergeError::Conflict(format!(
                "review {review_id} is already {}",
                review.status
            )));
        }
        review.status = ReviewStatus::Completed;
        review.decision = Some(decision);
        review.decided_at = Some(decided_at);
        let review = review.clone();

        let approval_count = guard
            .reviews
            .values()
            .filter(|r| {
                r.branch_id == review.branch_id
                    && r.cycle == review.cycle
                    && r.status == ReviewStatus::Completed
                    && r.decision == Some(ReviewDecision::Approved)
            })
            .count() as u32;

        Ok(DecisionSnapshot {
            review,
            approval_count,
        })
    }

    async fn cancel_cycle(&self, branch_id: Uuid, cycle: u32, keep: Option<Uuid>) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        for review in guard.reviews.values_mut() {
            if review.branch_id == branch_id
                && review.cycle == cycle
                && review.status != ReviewStatus::Cancelled
                && Some(review.review_id) != keep
            {
                review.status = ReviewStatus::Cancelled;
            }
        }
        Ok(())
    }

    async fn discard_pending(&self, branch_id: Uuid, cycle: u32, reviewer_id: Uuid) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        for review in guard.reviews.values_mut() {
            if review.branch_id == branch_id
                && review.cycle == cycle
                && review.reviewer_id == reviewer_id
                && review.status == ReviewStatus::Pending
            {
                review.status = ReviewStatus::Cancelled;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommentStore for MemStore {
    async fn insert_comment(&self, comment: &ReviewComment) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        guard.comments.insert(comment.comment_id, comment.clone());
        guard.comment_order.push(comment.comment_id);
        Ok(())
    }

    async fn get_comment(&self, comment_id: Uuid) -> Result<ReviewComment> {
        self.state
            .lock()
            .unwrap()
            .comments
            .get(&comment_id)
            .cloned()
            .ok_or_else(|| ConvergeError::NotFound(format!("comment {comment_id} not found")))
    }

    async fn list_comments(&self, branch_id: Uuid) -> Result<Vec<ReviewComment>> {
        let guard = self.state.lock().unwrap();
        Ok(guard
            .comment_order
            .iter()
            .filter_map(|id| guard.comments.get(id))
            .filter(|c| c.branch_id == branch_id)
            .cloned()
            .collect())
    }

    async fn mark_outdated(&self, comment_id: Uuid, reason: &str) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let comment = guard
            .comments
            .get_mut(&comment_id)
            .ok_or_else(|| ConvergeError::NotFound(format!("comment {comment_id} not found")))?;
        comment.outdated = true;
        comment.outdated_reason = Some(reason.to_string());
        comment.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl OperationStore for MemStore {
    async fn insert_guarded(&self, op: &ConvergenceOperation) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let active = guard
            .operations
            .values()
            .any(|o| o.branch_id == op.branch_id && !o.status.is_terminal());
        if active {
            return Err(ConvergeError::Conflict(format!(
                "a convergence operation is already active for branch {}",
                op.branch_id
            )));
        }
        guard.operations.insert(op.operation_id, op.clone());
        guard.operation_order.push(op.operation_id);
        Ok(())
    }

    async fn get_operation(&self, operation_id: Uuid) -> Result<ConvergenceOperation> {
        self.state
            .lock()
            .unwrap()
            .operations
            .get(&operation_id)
            .cloned()
            .ok_or_else(|| ConvergeError::NotFound(format!("operation {operation_id} not found")))
    }

    async fn update_status(&self, operation_id: Uuid, status: OperationStatus) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let op = guard
            .operations
            .get_mut(&operation_id)
            .ok_or_else(|| ConvergeError::NotFound(format!("operation {operation_id} not found")))?;
        op.status = status;
        Ok(())
    }

    async fn set_validation(
        &self,
        operation_id: Uuid,
        validation: &ValidationResults,
        conflicts: &[ConflictDetail],
    ) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let op = guard
            .operations
            .get_mut(&operation_id)
            .ok_or_else(|| ConvergeError::NotFound(format!("operation {operation_id} not found")))?;
        op.validation = Some(*validation);
        op.has_conflicts = !conflicts.is_empty();
        op.conflicts = conflicts.to_vec();
        Ok(())
    }

    async fn set_merge_commit(&self, operation_id: Uuid, merge_commit: &str) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let op = guard
            .operations
            .get_mut(&operation_id)
            .ok_or_else(|| ConvergeError::NotFound(format!("operation {operation_id} not found")))?;
        op.merge_commit = Some(merge_commit.to_string());
        Ok(())
    }

    async fn complete(
        &self,
        operation_id: Uuid,
        status: OperationStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let op = guard
            .operations
            .get_mut(&operation_id)
            .ok_or_else(|| ConvergeError::NotFound(format!("operation {operation_id} not found")))?;
        op.status = status;
        op.completed_at = Some(completed_at);
        Ok(())
    }

    async fn list_for_branch(&self, branch_id: Uuid) -> Result<Vec<ConvergenceOperation>> {
        let guard = self.state.lock().unwrap();
        let mut ops: Vec<ConvergenceOperation> = guard
            .operation_order
            .iter()
            .filter_map(|id| guard.operations.get(id))
            .filter(|o| o.branch_id == branch_id)
            .cloned()
            .collect();
        ops.reverse();
        Ok(ops)
    }

    async fn latest_for_branch(&self, branch_id: Uuid) -> Result<Option<ConvergenceOperation>> {
        Ok(self.list_for_branch(branch_id).await?.into_iter().next())
    }
}

#[async_trait]
impl LockStore for MemStore {
    async fn try_acquire(
        &self,
        branch_id: Uuid,
        target_ref: &str,
        operation_id: Uuid,
    ) -> Result<bool> {
        let mut guard = self.state.lock().unwrap();
        let held = guard
            .locks
            .iter()
            .any(|l| l.branch_id == branch_id && l.target_ref == target_ref && !l.released);
        if held {
            return Ok(false);
        }
        guard.locks.push(LockRow {
            operation_id,
            branch_id,
            target_ref: target_ref.to_string(),
            released: false,
            outcome: None,
        });
        Ok(true)
    }

    async fn release(&self, operation_id: Uuid, outcome: LockOutcome) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        for lock in guard.locks.iter_mut() {
            if lock.operation_id == operation_id && !lock.released {
                lock.released = true;
                lock.outcome = Some(outcome);
            }
        }
        Ok(())
    }
}

// ── FakeVcs ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum MergeBehavior {
    Succeed,
    Fail { rolled_back: bool },
    Error,
}

pub struct FakeVcs {
    pub ahead: Mutex<u32>,
    summaries: Mutex<HashMap<(String, String), ChangeSummary>>,
    diff: Mutex<BranchDiff>,
    merge: Mutex<MergeBehavior>,
    merges: Mutex<Vec<MergeRequest>>,
}

impl FakeVcs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ahead: Mutex::new(1),
            summaries: Mutex::new(HashMap::new()),
            diff: Mutex::new(BranchDiff::default()),
            merge: Mutex::new(MergeBehavior::Succeed),
            merges: Mutex::new(Vec::new()),
        })
    }

    pub fn set_ahead(&self, commits: u32) {
        *self.ahead.lock().unwrap() = commits;
    }

    pub fn set_summary(&self, source: &str, target: &str, summary: ChangeSummary) {
        self.summaries
            .lock()
            .unwrap()
            .insert((source.to_string(), target.to_string()), summary);
    }

    pub fn set_diff(&self, diff: BranchDiff) {
        *self.diff.lock().unwrap() = diff;
    }

    pub fn set_merge(&self, behavior: MergeBehavior) {
        *self.merge.lock().unwrap() = behavior;
    }

    pub fn merge_attempts(&self) -> usize {
        self.merges.lock().unwrap().len()
    }

    pub fn last_merge(&self) -> Option<MergeRequest> {
        self.merges.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn get_change_summary(
        &self,
        source_ref: &str,
        target_ref: &str,
    ) -> Result<ChangeSummary> {
        Ok(self
            .summaries
            .lock()
            .unwrap()
            .get(&(source_ref.to_string(), target_ref.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_branch_diff(
        &self,
        _source_ref: &str,
        _target_ref: &str,
        _base_commit: Option<&str>,
        _head_commit: Option<&str>,
    ) -> Result<BranchDiff> {
        Ok(self.diff.lock().unwrap().clone())
    }

    async fn commits_ahead(&self, _source_ref: &str, _target_ref: &str) -> Result<u32> {
        Ok(*self.ahead.lock().unwrap())
    }

    async fn atomic_merge_ref(&self, request: &MergeRequest) -> Result<MergeOutcome> {
        self.merges.lock().unwrap().push(request.clone());
        match *self.merge.lock().unwrap() {
            MergeBehavior::Succeed => Ok(MergeOutcome {
                success: true,
                merge_commit: Some(format!("merge-{}", request.branch_id.simple())),
                error: None,
                rolled_back: false,
            }),
            MergeBehavior::Fail { rolled_back } => Ok(MergeOutcome {
                success: false,
                merge_commit: None,
                error: Some("target ref advanced during merge".to_string()),
                rolled_back,
            }),
            MergeBehavior::Error => Err(ConvergeError::Internal(anyhow!("ref store unavailable"))),
        }
    }
}

// ── Environment ───────────────────────────────────────────────

pub struct TestEnv {
    pub store: Arc<MemStore>,
    pub vcs: Arc<FakeVcs>,
    pub branches: BranchService,
    pub reviews: ReviewService,
    pub convergence: ConvergenceService,
}

impl TestEnv {
    pub fn new() -> Self {
        let store = MemStore::new();
        let vcs = FakeVcs::new();

        let branch_store: Arc<dyn BranchStore> = store.clone();
        let review_store: Arc<dyn ReviewStore> = store.clone();
        let comment_store: Arc<dyn CommentStore> = store.clone();
        let operation_store: Arc<dyn OperationStore> = store.clone();
        let lock_store: Arc<dyn LockStore> = store.clone();
        let vcs_port: Arc<dyn VersionControl> = vcs.clone();

        let detector = Arc::new(ConflictDetector::new(vcs_port.clone()));

        Self {
            branches: BranchService::new(branch_store.clone()),
            reviews: ReviewService::new(
                branch_store.clone(),
                review_store,
                comment_store,
                detector,
            ),
            convergence: ConvergenceService::new(
                branch_store,
                operation_store,
                lock_store,
                vcs_port,
            ),
            store,
            vcs,
        }
    }
}

// ── Principals and fixtures ───────────────────────────────────

pub fn contributor() -> Principal {
    Principal::new(Uuid::new_v4(), vec![Role::Contributor])
}

pub fn publisher() -> Principal {
    Principal::new(Uuid::new_v4(), vec![Role::Publisher])
}

pub fn admin() -> Principal {
    Principal::new(Uuid::new_v4(), vec![Role::Administrator])
}

pub fn viewer() -> Principal {
    Principal::new(Uuid::new_v4(), vec![Role::Viewer])
}

pub async fn draft_branch(env: &TestEnv, owner: &Principal) -> Branch {
    env.branches
        .create_branch(
            CreateBranchInput {
                title: "Autumn style refresh".to_string(),
                work_ref: "branches/autumn-style".to_string(),
                base_ref: "main".to_string(),
                head_commit: Some("abc123".to_string()),
                base_commit: Some("def456".to_string()),
            },
            owner,
        )
        .await
        .expect("create branch")
}

/// Draft branch submitted for review with the given reviewers.
pub async fn branch_in_review(
    env: &TestEnv,
    owner: &Principal,
    reviewers: &[&Principal],
    required_approvals: u32,
) -> (Branch, Vec<Review>) {
    let branch = draft_branch(env, owner).await;
    let reviewer_ids: Vec<Uuid> = reviewers.iter().map(|p| p.user_id).collect();
    let reviews = env
        .reviews
        .submit_for_review(branch.branch_id, &reviewer_ids, required_approvals, owner)
        .await
        .expect("submit for review");
    let branch = env.branches.get_branch(branch.branch_id).await.unwrap();
    (branch, reviews)
}

/// Branch taken all the way to `approved` by a single reviewer.
/// Returns (branch, owner, reviewer).
pub async fn approved_branch(env: &TestEnv) -> (Branch, Principal, Principal) {
    let owner = contributor();
    let reviewer = contributor();
    let (branch, reviews) = branch_in_review(env, &owner, &[&reviewer], 1).await;
    env.reviews
        .approve(reviews[0].review_id, &reviewer)
        .await
        .expect("approve");
    let branch = env.branches.get_branch(branch.branch_id).await.unwrap();
    (branch, owner, reviewer)
}

/// The review assigned to `reviewer` in a batch.
pub fn review_for(reviews: &[Review], reviewer: &Principal) -> Review {
    reviews
        .iter()
        .find(|r| r.reviewer_id == reviewer.user_id)
        .cloned()
        .expect("reviewer has a review")
}
