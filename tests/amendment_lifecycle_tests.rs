// End-to-end amendment lifecycle: capture at proposal acceptance, compare
// after the site visit, then amend, reject, revise or override.

mod common;

use common::*;
use reserve_flow::persistence::WorkflowStore;
use reserve_flow::scope::{ElementCounts, ScopeChangeMode, ScopeComparisonStatus, TenantScopeChangeSettings};
use reserve_flow::workflows::{ActorRole, StageEvent, StudyRequest, StudyStatus};
use reserve_flow::WorkflowError;
use uuid::Uuid;

/// A study accepted with an estimate of 10/5/0, walked to site visit data entry
/// with 14/5/0 elements observed.
async fn study_after_site_visit(wf: &Workflow) -> StudyRequest {
    let mut study = wf.study_at(StudyStatus::ProposalSent).await;
    assert!(wf
        .transitions
        .try_transition(&mut study, StudyStatus::ProposalAccepted, &client())
        .await
        .unwrap());

    wf.counts.set_estimate(study.id, ElementCounts::new(10, 5, 0)).await;
    wf.scope.capture_original_scope(study.id, &staff()).await.unwrap();

    wf.transitions.run_auto_advance(&mut study).await.unwrap();
    wf.advance_until(&mut study, StudyStatus::SiteVisitDataEntered).await;

    wf.counts.set_current(study.id, ElementCounts::new(14, 5, 0)).await;
    study
}

#[tokio::test]
async fn test_variance_over_threshold_requires_amendment() {
    let wf = Workflow::new(amendment_policy(20.0));
    let study = study_after_site_visit(&wf).await;

    let evaluation = wf.scope.compare_and_evaluate(study.id, &specialist()).await.unwrap();

    assert_eq!(evaluation.variance_count, 4);
    assert_eq!(evaluation.variance_percent, 26.67);
    assert!(evaluation.exceeds_threshold);
    assert!(evaluation.should_block_workflow);
    assert!(evaluation.message.contains("Amendment required."));
    assert_eq!(evaluation.comparison.status, ScopeComparisonStatus::ExceedsThreshold);
    assert_eq!(evaluation.comparison.actual, Some(ElementCounts::new(14, 5, 0)));
    assert_eq!(evaluation.comparison.compared_by_user_id.as_deref(), Some("field-ray"));
}

#[tokio::test]
async fn test_no_action_mode_never_blocks() {
    let wf = Workflow::new(TenantScopeChangeSettings {
        mode: ScopeChangeMode::NoAction,
        variance_percent_threshold: Some(20.0),
        ..Default::default()
    });
    let study = study_after_site_visit(&wf).await;

    let evaluation = wf.scope.compare_and_evaluate(study.id, &specialist()).await.unwrap();

    assert_eq!(evaluation.comparison.status, ScopeComparisonStatus::WithinThreshold);
    assert!(!evaluation.should_block_workflow);
}

#[tokio::test]
async fn test_accepted_amendment_resumes_at_funding_plan() {
    let wf = Workflow::new(amendment_policy(20.0));
    let study = study_after_site_visit(&wf).await;
    let evaluation = wf.scope.compare_and_evaluate(study.id, &specialist()).await.unwrap();
    let comparison_id = evaluation.comparison.id;
    let amendment_id = Uuid::new_v4();

    let sent = wf
        .scope
        .mark_amendment_sent(comparison_id, amendment_id, &staff())
        .await
        .unwrap();
    assert!(sent.transitioned);
    assert_eq!(sent.study.status, StudyStatus::AmendmentPending);
    assert!(sent.study.amendment_required);
    assert!(!sent.study.amendment_accepted);
    assert_eq!(sent.comparison.status, ScopeComparisonStatus::AmendmentPending);
    assert_eq!(sent.comparison.amendment_proposal_id, Some(amendment_id));
    assert_eq!(wf.reload(&study).await, sent.study);

    let accepted = wf.scope.accept_amendment(comparison_id, &client()).await.unwrap();
    assert!(accepted.transitioned);
    assert_eq!(accepted.study.status, StudyStatus::FundingPlanReady);
    assert_eq!(accepted.study.current_proposal_id, Some(amendment_id));
    assert!(accepted.study.amendment_accepted);
    assert!(accepted.study.amendment_accepted_at.is_some());
    assert_eq!(accepted.comparison.status, ScopeComparisonStatus::AmendmentAccepted);
    assert_eq!(accepted.comparison.amendment_accepted_by.as_deref(), Some("hoa-board"));

    let stored = wf.reload(&study).await;
    assert_eq!(stored.status, StudyStatus::FundingPlanReady);
    assert_eq!(stored.current_proposal_id, Some(amendment_id));

    let notifications = wf.notifier.notifications().await;
    let parked = notifications
        .iter()
        .find(|n| n.event == StageEvent::entered(StudyStatus::AmendmentPending))
        .expect("client told about the amendment");
    assert!(parked.recipients.contains(ActorRole::Client));
    assert!(notifications
        .iter()
        .any(|n| n.event == StageEvent::entered(StudyStatus::FundingPlanReady)));
}

#[tokio::test]
async fn test_rejected_amendment_leaves_study_parked() {
    let wf = Workflow::new(amendment_policy(20.0));
    let study = study_after_site_visit(&wf).await;
    let evaluation = wf.scope.compare_and_evaluate(study.id, &specialist()).await.unwrap();
    let comparison_id = evaluation.comparison.id;
    wf.scope
        .mark_amendment_sent(comparison_id, Uuid::new_v4(), &staff())
        .await
        .unwrap();
    let parked = wf.reload(&study).await;

    let rejected = wf
        .scope
        .reject_amendment(comparison_id, &client(), "price too high")
        .await
        .unwrap();

    assert_eq!(rejected.status, ScopeComparisonStatus::AmendmentRejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("price too high"));
    let stored = wf.reload(&study).await;
    assert_eq!(stored.status, StudyStatus::AmendmentPending);
    assert_eq!(stored, parked);
}

#[tokio::test]
async fn test_revision_loop_keeps_history() {
    let wf = Workflow::new(amendment_policy(20.0));
    let study = study_after_site_visit(&wf).await;
    let comparison_id = wf
        .scope
        .compare_and_evaluate(study.id, &specialist())
        .await
        .unwrap()
        .comparison
        .id;

    let first = Uuid::new_v4();
    wf.scope.mark_amendment_sent(comparison_id, first, &staff()).await.unwrap();
    wf.scope
        .reject_amendment(comparison_id, &client(), "too many common elements")
        .await
        .unwrap();

    let revised = wf
        .scope
        .prepare_revised_amendment(comparison_id, &staff())
        .await
        .unwrap();
    assert_eq!(revised.status, ScopeComparisonStatus::ExceedsThreshold);
    assert_eq!(revised.revision_count, 1);
    assert_eq!(revised.amendment_proposal_id, None);
    assert_eq!(revised.rejection_reason, None);
    assert_eq!(revised.notes.len(), 1);
    assert!(revised.notes[0].text.contains(&first.to_string()));
    assert!(revised.notes[0].text.contains("too many common elements"));

    // The study is already parked, so sending again only updates the flags.
    let second = Uuid::new_v4();
    let resent = wf.scope.mark_amendment_sent(comparison_id, second, &staff()).await.unwrap();
    assert!(!resent.transitioned);
    assert_eq!(resent.study.status, StudyStatus::AmendmentPending);

    wf.scope
        .reject_amendment(comparison_id, &client(), "still too high")
        .await
        .unwrap();
    let revised = wf
        .scope
        .prepare_revised_amendment(comparison_id, &staff())
        .await
        .unwrap();
    assert_eq!(revised.revision_count, 2);
    assert_eq!(revised.notes.len(), 2);
    assert!(revised.notes_text().contains("too many common elements"));
    assert!(revised.notes_text().contains("still too high"));

    let third = Uuid::new_v4();
    wf.scope.mark_amendment_sent(comparison_id, third, &staff()).await.unwrap();
    let accepted = wf.scope.accept_amendment(comparison_id, &client()).await.unwrap();
    assert_eq!(accepted.study.status, StudyStatus::FundingPlanReady);
    assert_eq!(accepted.study.current_proposal_id, Some(third));
}

#[tokio::test]
async fn test_prepare_revision_requires_rejection() {
    let wf = Workflow::new(amendment_policy(20.0));
    let study = study_after_site_visit(&wf).await;
    let comparison = wf
        .scope
        .compare_and_evaluate(study.id, &specialist())
        .await
        .unwrap()
        .comparison;

    let err = wf
        .scope
        .prepare_revised_amendment(comparison.id, &staff())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::PreconditionViolation { .. }));

    let err = wf
        .scope
        .reject_amendment(comparison.id, &client(), "no amendment yet")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::PreconditionViolation { .. }));
}

#[tokio::test]
async fn test_override_lets_the_study_continue() {
    let wf = Workflow::new(amendment_policy(20.0));
    let mut study = study_after_site_visit(&wf).await;
    let comparison = wf
        .scope
        .compare_and_evaluate(study.id, &specialist())
        .await
        .unwrap()
        .comparison;

    let overridden = wf
        .scope
        .override_variance(comparison.id, &staff(), "extra elements are decorative")
        .await
        .unwrap();
    assert_eq!(overridden.status, ScopeComparisonStatus::Overridden);
    assert_eq!(overridden.overridden_by_user_id.as_deref(), Some("staff-ana"));
    assert!(overridden.overridden_at.is_some());

    study = wf.reload(&study).await;
    assert!(wf
        .transitions
        .try_transition(&mut study, StudyStatus::FundingPlanReady, &specialist())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_recapture_uses_latest_counts() {
    let wf = Workflow::new(amendment_policy(20.0));
    let study = wf.study_at(StudyStatus::ProposalAccepted).await;

    wf.counts.set_current(study.id, ElementCounts::new(4, 0, 0)).await;
    let first = wf.scope.capture_original_scope(study.id, &staff()).await.unwrap();
    wf.counts.set_estimate(study.id, ElementCounts::new(8, 2, 1)).await;
    let second = wf.scope.capture_original_scope(study.id, &staff()).await.unwrap();

    assert_eq!(first.id, second.id);
    let stored = wf
        .store
        .load_comparison_for_study(wf.tenant, study.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.original, ElementCounts::new(8, 2, 1));
    assert_eq!(stored.status, ScopeComparisonStatus::Pending);
}

#[tokio::test]
async fn test_zero_baseline_counts_as_full_variance() {
    let wf = Workflow::new(amendment_policy(50.0));
    let study = wf.study_at(StudyStatus::SiteVisitDataEntered).await;
    wf.scope.capture_original_scope(study.id, &staff()).await.unwrap();

    wf.counts.set_current(study.id, ElementCounts::new(5, 0, 0)).await;
    let evaluation = wf.scope.compare_and_evaluate(study.id, &specialist()).await.unwrap();
    assert_eq!(evaluation.variance_percent, 100.0);
    assert!(evaluation.should_block_workflow);
}

#[tokio::test]
async fn test_admin_can_unstick_an_archived_study() {
    let wf = Workflow::new(TenantScopeChangeSettings::default());
    let mut study = wf.study_at(StudyStatus::RequestArchived).await;

    assert!(!wf
        .transitions
        .try_transition(&mut study, StudyStatus::ReportInProcess, &staff())
        .await
        .unwrap());
    assert_eq!(wf.reload(&study).await.status, StudyStatus::RequestArchived);

    assert!(wf
        .transitions
        .force_transition(&mut study, StudyStatus::ReportInProcess, &admin())
        .await
        .unwrap());
    assert_eq!(wf.reload(&study).await.status, StudyStatus::ReportInProcess);
}
