//! Branch lifecycle service — creation and archival.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::ConvergeError;
use crate::lifecycle;
use crate::ports::{BranchStore, Result};
use crate::principal::Principal;
use crate::state_machine::BranchEvent;
use crate::types::{Branch, BranchState, TransitionLogEntry};

/// Input for creating a branch.
#[derive(Debug, Clone)]
pub struct CreateBranchInput {
    pub title: String,
    pub work_ref: String,
    pub base_ref: String,
    pub head_commit: Option<String>,
    pub base_commit: Option<String>,
}

pub struct BranchService {
    branches: Arc<dyn BranchStore>,
}

impl BranchService {
    pub fn new(branches: Arc<dyn BranchStore>) -> Self {
        Self { branches }
    }

    /// Create a new draft branch owned by the caller.
    pub async fn create_branch(
        &self,
        input: CreateBranchInput,
        principal: &Principal,
    ) -> Result<Branch> {
        if !principal.is_contributor_or_above() {
            return Err(ConvergeError::Forbidden(
                "creating a branch requires the contributor role".into(),
            ));
        }
        if input.title.trim().is_empty() {
            return Err(ConvergeError::InvalidInput("branch title is required".into()));
        }
        if input.work_ref.trim().is_empty() || input.base_ref.trim().is_empty() {
            return Err(ConvergeError::InvalidInput(
                "work ref and base ref are required".into(),
            ));
        }
        if input.work_ref == input.base_ref {
            return Err(ConvergeError::InvalidInput(
                "work ref and base ref must differ".into(),
            ));
        }

        let now = Utc::now();
        let branch = Branch {
            branch_id: Uuid::new_v4(),
            title: input.title,
            owner_id: principal.user_id,
            state: BranchState::Draft,
            work_ref: input.work_ref,
            base_ref: input.base_ref,
            head_commit: input.head_commit,
            base_commit: input.base_commit,
            reviewers: Vec::new(),
            required_approvals: 1,
            review_cycle: 1,
            created_at: now,
            updated_at: now,
        };
        self.branches.insert_branch(&branch).await?;
        Ok(branch)
    }

    /// Archive a branch: owners may archive their own drafts, anything else
    /// requires an administrator. Archived is terminal.
    pub async fn archive(&self, branch_id: Uuid, principal: &Principal) -> Result<Branch> {
        let branch = self.branches.get_branch(branch_id).await?;
        lifecycle::apply_transition(
            self.branches.as_ref(),
            &branch,
            BranchEvent::Archive,
            principal,
            None,
            None,
        )
        .await?;
        self.branches.get_branch(branch_id).await
    }

    pub async fn get_branch(&self, branch_id: Uuid) -> Result<Branch> {
        self.branches.get_branch(branch_id).await
    }

    /// Lifecycle audit trail, oldest first.
    pub async fn transition_log(&self, branch_id: Uuid) -> Result<Vec<TransitionLogEntry>> {
        self.branches.get_transition_log(branch_id).await
    }
}
