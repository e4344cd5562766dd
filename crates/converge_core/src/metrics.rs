//! Structured log events for the pipeline.
//!
//! Thin `tracing` emitters with stable targets so operators can filter on
//! `converge.metrics.*`. Contention and rejection are routine outcomes and
//! are emitted at info, never error.

use uuid::Uuid;

use crate::state_machine::BranchEvent;
use crate::types::{BranchState, LockOutcome, OperationStatus};

pub fn emit_transition(
    branch_id: Uuid,
    event: BranchEvent,
    from: BranchState,
    to: BranchState,
    actor_id: Uuid,
) {
    tracing::info!(
        target: "converge.metrics.transition",
        %branch_id,
        event = event.as_str(),
        from = from.as_str(),
        to = to.as_str(),
        %actor_id,
        "branch transition"
    );
}

pub fn emit_transition_denied(branch_id: Uuid, event: BranchEvent, reason: &str) {
    tracing::info!(
        target: "converge.metrics.transition",
        %branch_id,
        event = event.as_str(),
        reason,
        "transition denied"
    );
}

pub fn emit_review_decision(review_id: Uuid, branch_id: Uuid, decision: &str, approvals: u32) {
    tracing::info!(
        target: "converge.metrics.review",
        %review_id,
        %branch_id,
        decision,
        approvals,
        "review decision"
    );
}

pub fn emit_cycle_invalidated(branch_id: Uuid, cycle: u32, next_cycle: u32) {
    tracing::info!(
        target: "converge.metrics.review",
        %branch_id,
        cycle,
        next_cycle,
        "review cycle invalidated"
    );
}

pub fn emit_conflict_check(source_ref: &str, target_ref: &str, conflict_count: usize) {
    tracing::debug!(
        target: "converge.metrics.conflict",
        source_ref,
        target_ref,
        conflict_count,
        "conflict check"
    );
}

pub fn emit_lock_acquired(branch_id: Uuid, target_ref: &str, operation_id: Uuid) {
    tracing::debug!(
        target: "converge.metrics.lock",
        %branch_id,
        target_ref,
        %operation_id,
        "convergence lock acquired"
    );
}

pub fn emit_lock_contended(branch_id: Uuid, target_ref: &str) {
    tracing::info!(
        target: "converge.metrics.lock",
        %branch_id,
        target_ref,
        "convergence lock contended"
    );
}

pub fn emit_lock_released(operation_id: Uuid, outcome: LockOutcome) {
    tracing::debug!(
        target: "converge.metrics.lock",
        %operation_id,
        outcome = outcome.as_str(),
        "convergence lock released"
    );
}

pub fn emit_operation_created(operation_id: Uuid, branch_id: Uuid, publisher_id: Uuid) {
    tracing::info!(
        target: "converge.metrics.operation",
        %operation_id,
        %branch_id,
        %publisher_id,
        "convergence operation created"
    );
}

pub fn emit_operation_finished(operation_id: Uuid, status: OperationStatus, duration_ms: u64) {
    tracing::info!(
        target: "converge.metrics.operation",
        %operation_id,
        status = status.as_str(),
        duration_ms,
        "convergence operation finished"
    );
}

pub fn emit_merge(branch_id: Uuid, target_ref: &str, merge_commit: &str) {
    tracing::info!(
        target: "converge.metrics.merge",
        %branch_id,
        target_ref,
        merge_commit,
        "merge committed"
    );
}
