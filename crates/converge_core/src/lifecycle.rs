//! Shared transition driving — the one place branch state is mutated.
//!
//! Every service funnels lifecycle changes through here so that each state
//! change pairs with exactly one transition log entry and one metrics event.

use chrono::Utc;
use uuid::Uuid;

use crate::error::ConvergeError;
use crate::ports::{BranchStore, Result};
use crate::principal::Principal;
use crate::state_machine::{self, BranchEvent, TransitionContext, TransitionDecision};
use crate::types::{Branch, BranchState, TransitionLogEntry};

/// Relationship context for a principal acting on a branch.
pub fn context_for(branch: &Branch, principal: &Principal) -> TransitionContext {
    TransitionContext {
        is_owner: branch.owner_id == principal.user_id,
        is_assigned_reviewer: branch.is_reviewer(principal.user_id),
    }
}

/// Map a state-machine denial into the error taxonomy: a missing edge is a
/// wrong-lifecycle-state problem (400), a failed role or relationship gate
/// is forbidden (403).
pub fn denial_to_error(state: BranchState, event: BranchEvent, reason: String) -> ConvergeError {
    if state_machine::has_edge(state, event) {
        ConvergeError::Forbidden(reason)
    } else {
        ConvergeError::InvalidInput(reason)
    }
}

/// Drive a user-initiated transition: consult the state machine, persist the
/// new state, and append the audit entry.
pub async fn apply_transition(
    branches: &dyn BranchStore,
    branch: &Branch,
    event: BranchEvent,
    principal: &Principal,
    reason: Option<String>,
    metadata: Option<serde_json::Value>,
) -> Result<BranchState> {
    let ctx = context_for(branch, principal);
    let decision = state_machine::transition(branch.state, event, principal, &ctx);
    commit(branches, branch, event, decision, principal.user_id, reason, metadata).await
}

/// Drive a pipeline-derived transition (edge table only, no role gates).
pub async fn apply_system_transition(
    branches: &dyn BranchStore,
    branch: &Branch,
    event: BranchEvent,
    actor_id: Uuid,
    reason: Option<String>,
    metadata: Option<serde_json::Value>,
) -> Result<BranchState> {
    let decision = state_machine::system_transition(branch.state, event);
    commit(branches, branch, event, decision, actor_id, reason, metadata).await
}

async fn commit(
    branches: &dyn BranchStore,
    branch: &Branch,
    event: BranchEvent,
    decision: TransitionDecision,
    actor_id: Uuid,
    reason: Option<String>,
    metadata: Option<serde_json::Value>,
) -> Result<BranchState> {
    let target = match decision {
        TransitionDecision::Allowed { target } => target,
        TransitionDecision::Denied { reason } => {
            crate::metrics::emit_transition_denied(branch.branch_id, event, &reason);
            return Err(denial_to_error(branch.state, event, reason));
        }
    };

    branches.update_state(branch.branch_id, target).await?;
    branches
        .log_transition(&TransitionLogEntry {
            entry_id: Uuid::new_v4(),
            branch_id: branch.branch_id,
            from_state: branch.state,
            to_state: target,
            event: event.as_str().to_string(),
            actor_id,
            reason,
            metadata,
            occurred_at: Utc::now(),
        })
        .await?;

    crate::metrics::emit_transition(branch.branch_id, event, branch.state, target, actor_id);
    Ok(target)
}
