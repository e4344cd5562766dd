//! Convergence pipeline core.
//!
//! The branch lifecycle and convergence pipeline of the content-governance
//! portal: contributors edit on isolated branches, reviewers approve or
//! reject, publishers converge an approved branch into a shared target line.
//!
//! This crate is pure domain logic plus port traits — persistence and the
//! version-control ref store are external collaborators behind [`ports`]
//! traits. The PostgreSQL adapter lives in `converge_postgres`.
//!
//! Components, leaf-first:
//! - [`state_machine`] — pure lifecycle transition mapping, no I/O
//! - [`review`] — review quorum engine and comment threads
//! - [`conflict`] — conflict detection and comment re-anchoring
//! - [`lock`] — per-(branch, target-ref) mutual exclusion
//! - [`merge`] — the atomic ref-advance orchestration
//! - [`service`] — the convergence service tying them together

pub mod branch;
pub mod conflict;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod merge;
pub mod metrics;
pub mod ports;
pub mod principal;
pub mod review;
pub mod service;
pub mod state_machine;
pub mod types;

pub use branch::{BranchService, CreateBranchInput};
pub use conflict::{ConflictDetector, ConflictReport};
pub use error::ConvergeError;
pub use lock::{Acquisition, ConvergenceLock};
pub use merge::{MergeOrchestrator, MergeResult};
pub use principal::{Principal, Role};
pub use review::{ApprovalOutcome, ReviewService};
pub use service::{ConvergenceService, CreateConvergenceInput, ValidationReport};
pub use state_machine::{
    allowed_events, can_perform, transition, BranchEvent, TransitionContext, TransitionDecision,
};
