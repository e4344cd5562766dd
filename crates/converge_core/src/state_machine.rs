//! Branch lifecycle state machine.
//!
//! Pure mapping from (current state, event, actor) to a target state or a
//! rejection reason. No I/O — callers persist the resulting state and the
//! transition log entry themselves.
//!
//! A rejected transition is a local, recoverable result: it never errors,
//! callers branch on [`TransitionDecision::allowed`].

use serde::{Deserialize, Serialize};

use crate::principal::Principal;
use crate::types::BranchState;

/// Lifecycle event driving a branch transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchEvent {
    SubmitForReview,
    RequestChanges,
    Approve,
    Publish,
    Archive,
}

pub const ALL_EVENTS: [BranchEvent; 5] = [
    BranchEvent::SubmitForReview,
    BranchEvent::RequestChanges,
    BranchEvent::Approve,
    BranchEvent::Publish,
    BranchEvent::Archive,
];

impl BranchEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubmitForReview => "SUBMIT_FOR_REVIEW",
            Self::RequestChanges => "REQUEST_CHANGES",
            Self::Approve => "APPROVE",
            Self::Publish => "PUBLISH",
            Self::Archive => "ARCHIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUBMIT_FOR_REVIEW" => Some(Self::SubmitForReview),
            "REQUEST_CHANGES" => Some(Self::RequestChanges),
            "APPROVE" => Some(Self::Approve),
            "PUBLISH" => Some(Self::Publish),
            "ARCHIVE" => Some(Self::Archive),
            _ => None,
        }
    }
}

impl std::fmt::Display for BranchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Relationship of the actor to the branch under transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionContext {
    pub is_owner: bool,
    pub is_assigned_reviewer: bool,
}

/// Result of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionDecision {
    Allowed { target: BranchState },
    Denied { reason: String },
}

impl TransitionDecision {
    pub fn allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn target(&self) -> Option<BranchState> {
        match self {
            Self::Allowed { target } => Some(*target),
            Self::Denied { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allowed { .. } => None,
            Self::Denied { reason } => Some(reason),
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }
}

/// The valid-edge table. Everything not listed here is rejected regardless
/// of role — skipping states is never possible.
fn target_for(state: BranchState, event: BranchEvent) -> Option<BranchState> {
    use BranchEvent::*;
    use BranchState::*;
    match (state, event) {
        (Draft, SubmitForReview) => Some(Review),
        (Review, RequestChanges) => Some(Draft),
        (Review, Approve) => Some(Approved),
        (Approved, Publish) => Some(Published),
        (Draft, Archive) | (Review, Archive) | (Published, Archive) => Some(Archived),
        _ => None,
    }
}

/// Attempt a lifecycle transition.
///
/// Edge validity is checked first; role and relationship gates second.
/// Administrators bypass role and assignment checks but never the
/// owner check on `Approve`/`RequestChanges` — self-review stays forbidden
/// for every role.
pub fn transition(
    state: BranchState,
    event: BranchEvent,
    principal: &Principal,
    ctx: &TransitionContext,
) -> TransitionDecision {
    let target = match target_for(state, event) {
        Some(t) => t,
        None => {
            return TransitionDecision::denied(format!(
                "cannot transition from {state} via {event}"
            ));
        }
    };

    // Self-review prohibition comes before any administrator bypass.
    if matches!(event, BranchEvent::Approve | BranchEvent::RequestChanges) && ctx.is_owner {
        return TransitionDecision::denied(format!(
            "branch owner may not {event} their own branch"
        ));
    }

    if principal.is_administrator() {
        return TransitionDecision::Allowed { target };
    }

    match event {
        BranchEvent::SubmitForReview => {
            if !ctx.is_owner {
                return TransitionDecision::denied("only the branch owner may submit for review");
            }
            if !principal.is_contributor_or_above() {
                return TransitionDecision::denied(
                    "submitting for review requires the contributor role",
                );
            }
        }
        BranchEvent::Approve | BranchEvent::RequestChanges => {
            if !ctx.is_assigned_reviewer {
                return TransitionDecision::denied(format!(
                    "{event} requires an assigned-reviewer relationship to the branch"
                ));
            }
        }
        BranchEvent::Publish => {
            if !principal.can_publish() {
                return TransitionDecision::denied(
                    "publishing requires the publisher or administrator role",
                );
            }
        }
        BranchEvent::Archive => {
            // Owners may archive their own drafts; anything else needs admin.
            if !(state == BranchState::Draft && ctx.is_owner) {
                return TransitionDecision::denied(format!(
                    "archiving a {state} branch requires the administrator role"
                ));
            }
        }
    }

    TransitionDecision::Allowed { target }
}

/// Attempt a transition on behalf of the pipeline itself rather than a
/// user — only the edge table applies, role and relationship gates do not.
/// Used for derived transitions such as returning a branch to draft when
/// its last reviewer is removed.
pub fn system_transition(state: BranchState, event: BranchEvent) -> TransitionDecision {
    match target_for(state, event) {
        Some(target) => TransitionDecision::Allowed { target },
        None => TransitionDecision::denied(format!("cannot transition from {state} via {event}")),
    }
}

/// Whether the edge table contains (state, event), ignoring roles.
/// Lets callers distinguish a wrong-state rejection from a role rejection.
pub fn has_edge(state: BranchState, event: BranchEvent) -> bool {
    target_for(state, event).is_some()
}

/// Events with at least one valid edge out of `state`, for UI affordances.
pub fn allowed_events(state: BranchState) -> Vec<BranchEvent> {
    ALL_EVENTS
        .into_iter()
        .filter(|event| target_for(state, *event).is_some())
        .collect()
}

/// Whether the actor could perform `event` from `state`.
pub fn can_perform(
    state: BranchState,
    event: BranchEvent,
    principal: &Principal,
    ctx: &TransitionContext,
) -> bool {
    transition(state, event, principal, ctx).allowed()
}
