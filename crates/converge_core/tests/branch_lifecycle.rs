//! Branch creation and archival integration tests.

mod support;

use converge_core::error::ConvergeError;
use converge_core::state_machine::BranchEvent;
use converge_core::types::BranchState;
use converge_core::CreateBranchInput;

use support::*;

fn input() -> CreateBranchInput {
    CreateBranchInput {
        title: "Autumn style refresh".to_string(),
        work_ref: "branches/autumn-style".to_string(),
        base_ref: "main".to_string(),
        head_commit: None,
        base_commit: None,
    }
}

#[tokio::test]
async fn creation_requires_contributor_and_valid_refs() {
    let env = TestEnv::new();

    let err = env
        .branches
        .create_branch(input(), &viewer())
        .await
        .unwrap_err();
    assert!(matches!(err, ConvergeError::Forbidden(_)));

    let mut same_refs = input();
    same_refs.work_ref = "main".to_string();
    let err = env
        .branches
        .create_branch(same_refs, &contributor())
        .await
        .unwrap_err();
    assert!(matches!(err, ConvergeError::InvalidInput(_)));

    let mut untitled = input();
    untitled.title = "  ".to_string();
    let err = env
        .branches
        .create_branch(untitled, &contributor())
        .await
        .unwrap_err();
    assert!(matches!(err, ConvergeError::InvalidInput(_)));

    let branch = env
        .branches
        .create_branch(input(), &contributor())
        .await
        .unwrap();
    assert_eq!(branch.state, BranchState::Draft);
    assert_eq!(branch.review_cycle, 1);
    assert!(branch.reviewers.is_empty());
}

#[tokio::test]
async fn owner_archives_a_draft_and_archived_is_terminal() {
    let env = TestEnv::new();
    let owner = contributor();
    let branch = draft_branch(&env, &owner).await;

    let branch = env.branches.archive(branch.branch_id, &owner).await.unwrap();
    assert_eq!(branch.state, BranchState::Archived);

    let log = env.branches.transition_log(branch.branch_id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].event, BranchEvent::Archive.as_str());

    // No way out of archived, not even for an administrator.
    let err = env
        .branches
        .archive(branch.branch_id, &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, ConvergeError::InvalidInput(_)));
}

#[tokio::test]
async fn archiving_a_branch_in_review_requires_admin() {
    let env = TestEnv::new();
    let owner = contributor();
    let reviewer = contributor();
    let (branch, _) = branch_in_review(&env, &owner, &[&reviewer], 1).await;

    let err = env
        .branches
        .archive(branch.branch_id, &owner)
        .await
        .unwrap_err();
    assert!(matches!(err, ConvergeError::Forbidden(_)));

    let branch = env
        .branches
        .archive(branch.branch_id, &admin())
        .await
        .unwrap();
    assert_eq!(branch.state, BranchState::Archived);
}

#[tokio::test]
async fn the_transition_log_tells_the_whole_story() {
    let env = TestEnv::new();
    let (branch, _, _) = approved_branch(&env).await;

    let log = env.branches.transition_log(branch.branch_id).await.unwrap();
    let events: Vec<&str> = log.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(
        events,
        vec![
            BranchEvent::SubmitForReview.as_str(),
            BranchEvent::Approve.as_str(),
        ]
    );
    assert_eq!(log[0].from_state, BranchState::Draft);
    assert_eq!(log[1].to_state, BranchState::Approved);
}
