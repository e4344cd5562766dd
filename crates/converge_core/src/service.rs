//! Convergence service — the top-level publish orchestrator.
//!
//! Validates preconditions, acquires the per-(branch, target-ref) lock, runs
//! conflict detection, invokes the merge orchestrator, drives the branch's
//! publish transition, and always releases the lock. Every exit path after
//! acquisition funnels through a single release-with-outcome point, and a
//! started operation always ends terminal and inspectable — never stuck in
//! `merging`.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::conflict::ConflictDetector;
use crate::error::ConvergeError;
use crate::lifecycle;
use crate::lock::ConvergenceLock;
use crate::merge::MergeOrchestrator;
use crate::ports::{
    BranchStore, LockStore, MergeRequest, OperationStore, Result, VersionControl,
};
use crate::principal::Principal;
use crate::state_machine::BranchEvent;
use crate::types::{
    Branch, BranchState, ConflictDetail, ConflictType, ConvergenceOperation, LockOutcome,
    OperationStatus, ValidationResults,
};

/// Input for creating a convergence operation.
#[derive(Debug, Clone)]
pub struct CreateConvergenceInput {
    pub branch_id: Uuid,
    /// Optional merge commit message override.
    pub message: Option<String>,
}

/// Aggregate of the three independent pre-merge checks.
/// All three always run and are reported, never short-circuited.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub results: ValidationResults,
    pub conflicts: Vec<ConflictDetail>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.results.passed()
    }
}

pub struct ConvergenceService {
    branches: Arc<dyn BranchStore>,
    operations: Arc<dyn OperationStore>,
    lock: ConvergenceLock,
    detector: ConflictDetector,
    merger: MergeOrchestrator,
    vcs: Arc<dyn VersionControl>,
}

impl ConvergenceService {
    pub fn new(
        branches: Arc<dyn BranchStore>,
        operations: Arc<dyn OperationStore>,
        locks: Arc<dyn LockStore>,
        vcs: Arc<dyn VersionControl>,
    ) -> Self {
        Self {
            branches,
            operations,
            lock: ConvergenceLock::new(locks),
            detector: ConflictDetector::new(vcs.clone()),
            merger: MergeOrchestrator::new(vcs.clone()),
            vcs,
        }
    }

    // ── create ───────────────────────────────────────────────────

    /// Create a pending convergence operation for an approved branch.
    ///
    /// The store's guarded insert enforces the invariant that at most one
    /// non-terminal operation exists per branch — a duplicate request gets
    /// `Conflict`, not a second operation.
    pub async fn create(
        &self,
        input: CreateConvergenceInput,
        principal: &Principal,
    ) -> Result<ConvergenceOperation> {
        if !principal.can_publish() {
            return Err(ConvergeError::Forbidden(
                "convergence requires the publisher or administrator role".into(),
            ));
        }

        let branch = self.branches.get_branch(input.branch_id).await?;
        if branch.state != BranchState::Approved {
            return Err(ConvergeError::InvalidInput(format!(
                "branch must be approved before convergence, currently {}",
                branch.state
            )));
        }

        let op = ConvergenceOperation {
            operation_id: Uuid::new_v4(),
            branch_id: branch.branch_id,
            publisher_id: principal.user_id,
            status: OperationStatus::Pending,
            target_ref: branch.base_ref.clone(),
            message: input.message,
            validation: None,
            has_conflicts: false,
            conflicts: Vec::new(),
            merge_commit: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.operations.insert_guarded(&op).await?;

        crate::metrics::emit_operation_created(op.operation_id, op.branch_id, op.publisher_id);
        Ok(op)
    }

    // ── validate ─────────────────────────────────────────────────

    /// Advisory pre-publish validation: branch approved, commits ahead of
    /// base, no conflicts. Runs without the lock; `execute` re-validates
    /// after acquisition since state may have changed in between.
    pub async fn validate(&self, branch_id: Uuid) -> Result<ValidationReport> {
        let branch = self.branches.get_branch(branch_id).await?;
        self.validation_report(&branch).await
    }

    async fn validation_report(&self, branch: &Branch) -> Result<ValidationReport> {
        let branch_approved = branch.state == BranchState::Approved;
        let ahead = self
            .vcs
            .commits_ahead(&branch.work_ref, &branch.base_ref)
            .await?;
        let conflict_report = self
            .detector
            .check_conflicts(&branch.work_ref, &branch.base_ref)
            .await?;

        Ok(ValidationReport {
            results: ValidationResults {
                branch_approved,
                has_commits_ahead: ahead > 0,
                no_conflicts: !conflict_report.has_conflicts,
            },
            conflicts: conflict_report.conflicts,
        })
    }

    // ── execute ──────────────────────────────────────────────────

    /// The critical path: lock, validate, merge, publish.
    ///
    /// A failed validation is not an error — the operation ends `failed`
    /// and is returned for inspection. Lock acquisition failure surfaces as
    /// `Conflict` before any mutation. After acquisition, every path —
    /// including errors — releases the lock with a terminal outcome tag.
    pub async fn execute(
        &self,
        operation_id: Uuid,
        principal: &Principal,
    ) -> Result<ConvergenceOperation> {
        let start = Instant::now();

        if !principal.can_publish() {
            return Err(ConvergeError::Forbidden(
                "convergence requires the publisher or administrator role".into(),
            ));
        }

        let op = self.operations.get_operation(operation_id).await?;
        if op.status != OperationStatus::Pending {
            return Err(ConvergeError::Conflict(format!(
                "operation is {}, only pending operations can start",
                op.status
            )));
        }

        let acquisition = self
            .lock
            .acquire(op.branch_id, &op.target_ref, operation_id)
            .await?;
        if !acquisition.acquired {
            // Fail fast before any mutation — nothing to release.
            return Err(ConvergeError::Conflict(acquisition.reason.unwrap_or_else(
                || "another convergence is already in progress".into(),
            )));
        }

        // Single release-with-outcome path for everything past acquisition.
        let outcome = match self.run_locked(&op, principal).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The operation must end terminal and inspectable, and the
                // lock must never be abandoned, before the error propagates.
                let _ = self
                    .operations
                    .complete(operation_id, OperationStatus::Failed, Utc::now())
                    .await;
                let _ = self.lock.release(operation_id, LockOutcome::Failed).await;
                crate::metrics::emit_operation_finished(
                    operation_id,
                    OperationStatus::Failed,
                    start.elapsed().as_millis() as u64,
                );
                return Err(e);
            }
        };
        self.lock.release(operation_id, outcome).await?;

        let finished = self.operations.get_operation(operation_id).await?;
        crate::metrics::emit_operation_finished(
            operation_id,
            finished.status,
            start.elapsed().as_millis() as u64,
        );
        Ok(finished)
    }

    /// Pipeline body run while holding the lock. Returns the outcome tag to
    /// release with; all successful returns leave the operation terminal.
    async fn run_locked(
        &self,
        op: &ConvergenceOperation,
        principal: &Principal,
    ) -> Result<LockOutcome> {
        self.operations
            .update_status(op.operation_id, OperationStatus::Validating)
            .await?;

        // Authoritative validation, inside the lock.
        let branch = self.branches.get_branch(op.branch_id).await?;
        let report = self.validation_report(&branch).await?;
        self.operations
            .set_validation(op.operation_id, &report.results, &report.conflicts)
            .await?;

        if !report.passed() {
            self.operations
                .complete(op.operation_id, OperationStatus::Failed, Utc::now())
                .await?;
            return Ok(LockOutcome::Failed);
        }

        self.operations
            .update_status(op.operation_id, OperationStatus::Merging)
            .await?;

        let request = MergeRequest {
            branch_ref: branch.work_ref.clone(),
            target_ref: op.target_ref.clone(),
            branch_id: branch.branch_id,
            publisher_id: op.publisher_id,
            message: op
                .message
                .clone()
                .unwrap_or_else(|| format!("Converge '{}' into {}", branch.title, op.target_ref)),
        };
        let merge = self.merger.atomic_merge(&request).await?;

        if !merge.success {
            let mut conflicts = report.conflicts.clone();
            conflicts.push(ConflictDetail {
                path: op.target_ref.clone(),
                conflict_type: ConflictType::MergeFailure,
                description: merge
                    .error
                    .unwrap_or_else(|| "merge failed without detail".into()),
            });
            self.operations
                .set_validation(op.operation_id, &report.results, &conflicts)
                .await?;

            let (status, outcome) = if merge.rolled_back {
                (OperationStatus::RolledBack, LockOutcome::RolledBack)
            } else {
                (OperationStatus::Failed, LockOutcome::Failed)
            };
            self.operations
                .complete(op.operation_id, status, Utc::now())
                .await?;
            return Ok(outcome);
        }

        let merge_commit = merge.merge_commit.ok_or_else(|| {
            ConvergeError::Internal(anyhow::anyhow!("merge reported success without a commit"))
        })?;
        self.operations
            .set_merge_commit(op.operation_id, &merge_commit)
            .await?;

        lifecycle::apply_transition(
            self.branches.as_ref(),
            &branch,
            BranchEvent::Publish,
            principal,
            None,
            Some(json!({
                "operation_id": op.operation_id,
                "merge_commit": merge_commit,
            })),
        )
        .await?;

        self.operations
            .complete(op.operation_id, OperationStatus::Succeeded, Utc::now())
            .await?;
        Ok(LockOutcome::Succeeded)
    }

    // ── cancel ───────────────────────────────────────────────────

    /// Cancel a pending operation. Only the initiating publisher may cancel,
    /// and only before execution starts — a validating or merging operation
    /// runs to a terminal outcome to preserve the single-writer invariant.
    pub async fn cancel(
        &self,
        operation_id: Uuid,
        principal: &Principal,
    ) -> Result<ConvergenceOperation> {
        let op = self.operations.get_operation(operation_id).await?;

        if op.status != OperationStatus::Pending {
            return Err(ConvergeError::Conflict(format!(
                "operation is {}, only pending operations can be cancelled",
                op.status
            )));
        }
        if op.publisher_id != principal.user_id {
            return Err(ConvergeError::Forbidden(
                "only the initiating publisher may cancel this operation".into(),
            ));
        }

        self.operations
            .complete(operation_id, OperationStatus::Failed, Utc::now())
            .await?;
        self.operations.get_operation(operation_id).await
    }

    // ── queries ──────────────────────────────────────────────────

    pub async fn get_by_id(&self, operation_id: Uuid) -> Result<ConvergenceOperation> {
        self.operations.get_operation(operation_id).await
    }

    /// All operations for a branch, newest first.
    pub async fn get_by_branch(&self, branch_id: Uuid) -> Result<Vec<ConvergenceOperation>> {
        self.operations.list_for_branch(branch_id).await
    }

    pub async fn get_latest(&self, branch_id: Uuid) -> Result<Option<ConvergenceOperation>> {
        self.operations.latest_for_branch(branch_id).await
    }
}
