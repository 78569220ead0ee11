// Scope comparison and amendment sub-workflow
//
// Runs at two points of the study lifecycle: original scope is captured when
// the proposal is accepted and compared after site visit data entry. When the
// variance needs an amendment, this engine parks the study in
// `AmendmentPending` through the transition engine and resumes it at
// `FundingPlanReady` once the amendment is accepted.

use chrono::Utc;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::policy::TenantPolicyProvider;
use super::types::{
    ElementCounts, ScopeComparison, ScopeComparisonStatus, ScopeSource, TenantScopeChangeSettings,
};
use super::variance::{self, VarianceOutcome};
use crate::error::{WorkflowError, WorkflowResult};
use crate::observability::workflow_metrics;
use crate::persistence::{ChangeSet, ElementCountSource, PersistenceError, WorkflowStore};
use crate::time_operation;
use crate::workflows::{Actor, StudyRequest, StudyStatus, TenantId, TransitionEngine, TransitionPlan};

/// Result of comparing the observed scope against the captured original.
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceEvaluation {
    pub comparison: ScopeComparison,
    pub variance_count: i64,
    pub variance_percent: f64,
    pub exceeds_threshold: bool,
    pub should_block_workflow: bool,
    pub message: String,
}

/// An amendment step that also touched the study.
#[derive(Debug, Clone, PartialEq)]
pub struct AmendmentStep {
    pub comparison: ScopeComparison,
    pub study: StudyRequest,
    /// Whether the study changed stage as part of the step.
    pub transitioned: bool,
}

pub struct ScopeComparisonEngine {
    tenant_id: TenantId,
    transitions: Arc<TransitionEngine>,
    store: Arc<dyn WorkflowStore>,
    counts: Arc<dyn ElementCountSource>,
    policy: Arc<dyn TenantPolicyProvider>,
}

impl ScopeComparisonEngine {
    pub fn new(
        tenant_id: TenantId,
        transitions: Arc<TransitionEngine>,
        store: Arc<dyn WorkflowStore>,
        counts: Arc<dyn ElementCountSource>,
        policy: Arc<dyn TenantPolicyProvider>,
    ) -> Self {
        Self {
            tenant_id,
            transitions,
            store,
            counts,
            policy,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Evaluate counts against a policy without loading or storing anything.
    pub fn evaluate_preview(
        original: &ElementCounts,
        actual: &ElementCounts,
        settings: &TenantScopeChangeSettings,
    ) -> VarianceOutcome {
        variance::evaluate(original, actual, settings)
    }

    /// Record the scope the proposal was priced on.
    ///
    /// Prefers the client's estimate from the originating request and falls
    /// back to the elements attached to the study. Capturing again, including
    /// a concurrent duplicate capture, overwrites the originals of the one
    /// comparison per study.
    ///
    /// Once an amendment decision exists (sent, accepted, rejected or
    /// overridden) re-capture fails with `PreconditionViolation`.
    pub async fn capture_original_scope(
        &self,
        study_id: Uuid,
        actor: &Actor,
    ) -> WorkflowResult<ScopeComparison> {
        self.load_study(study_id).await?;

        let (original, source) = match self.counts.estimated_counts(self.tenant_id, study_id).await? {
            Some(estimate) => (estimate, ScopeSource::ClientEstimate),
            None => (
                self.counts.current_counts(self.tenant_id, study_id).await?,
                ScopeSource::AttachedElements,
            ),
        };

        let mut attempt = 1;
        let comparison = loop {
            let existing = self
                .store
                .load_comparison_for_study(self.tenant_id, study_id)
                .await?;
            let mut comparison = match existing {
                None => ScopeComparison::new(self.tenant_id, study_id, original, source),
                Some(comparison) => recapture(comparison, original, source, actor)?,
            };

            match self.commit_comparison(&mut comparison).await {
                Ok(()) => break comparison,
                // Another capture got there first; overwrite what it stored.
                Err(e) if e.is_retryable() && attempt < CAPTURE_ATTEMPTS => {
                    debug!(study_id = %study_id, attempt, "Original scope capture raced, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            study_id = %study_id,
            comparison_id = %comparison.id,
            source = %source,
            total = original.total(),
            "Captured original scope"
        );
        Ok(comparison)
    }

    /// Compare current element counts against the captured original and
    /// decide whether the variance blocks the workflow.
    pub async fn compare_and_evaluate(
        &self,
        study_id: Uuid,
        actor: &Actor,
    ) -> WorkflowResult<VarianceEvaluation> {
        time_operation!("compare_and_evaluate");

        let mut comparison = self
            .store
            .load_comparison_for_study(self.tenant_id, study_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("scope comparison", study_id))?;

        if comparison.status == ScopeComparisonStatus::Overridden {
            debug!(comparison_id = %comparison.id, "Variance overridden, skipping re-evaluation");
            let message = format!(
                "Variance overridden by {}: {}",
                comparison.overridden_by_user_id.as_deref().unwrap_or("unknown"),
                comparison.override_reason.as_deref().unwrap_or("no reason given")
            );
            return Ok(VarianceEvaluation {
                variance_count: comparison.variance_count,
                variance_percent: comparison.variance_percent,
                exceeds_threshold: false,
                should_block_workflow: false,
                message,
                comparison,
            });
        }

        if !comparison.status.accepts_comparison() {
            return Err(WorkflowError::precondition(
                "compare_and_evaluate",
                "Pending, WithinThreshold or ExceedsThreshold",
                comparison.status,
            ));
        }

        let actual = self.counts.current_counts(self.tenant_id, study_id).await?;
        let settings = self.policy.get_settings(self.tenant_id).await?;
        let outcome = variance::evaluate(&comparison.original, &actual, &settings);

        let now = Utc::now();
        comparison.actual = Some(actual);
        comparison.compared_at = Some(now);
        comparison.compared_by_user_id = Some(actor.user_id.clone());
        comparison.variance_count = outcome.variance_count;
        comparison.variance_percent = outcome.variance_percent;
        // A repeated comparison before any amendment decision replaces the
        // previous result instead of following the sub-workflow edges.
        comparison.status = outcome.status;
        comparison.updated_at = now;

        self.commit_comparison(&mut comparison).await?;

        workflow_metrics().record_scope_evaluation(outcome.should_block_workflow);
        info!(
            study_id = %study_id,
            comparison_id = %comparison.id,
            mode = %settings.mode,
            variance_count = outcome.variance_count,
            variance_percent = outcome.variance_percent,
            blocking = outcome.should_block_workflow,
            "Evaluated scope variance"
        );

        Ok(VarianceEvaluation {
            comparison,
            variance_count: outcome.variance_count,
            variance_percent: outcome.variance_percent,
            exceeds_threshold: outcome.exceeds_threshold,
            should_block_workflow: outcome.should_block_workflow,
            message: outcome.message,
        })
    }

    /// Link an amendment proposal and park the study while the client decides.
    pub async fn mark_amendment_sent(
        &self,
        comparison_id: Uuid,
        amendment_proposal_id: Uuid,
        actor: &Actor,
    ) -> WorkflowResult<AmendmentStep> {
        let mut comparison = self.load_comparison(comparison_id).await?;
        let mut study = self.load_study(comparison.study_id).await?;

        let settings = self.policy.get_settings(self.tenant_id).await?;
        if study.status.is_complete() && !settings.allow_amendments_after_completion {
            return Err(WorkflowError::policy(format!(
                "study {} is {} and the tenant does not allow amendments after completion",
                study.id, study.status
            )));
        }

        advance(
            &mut comparison,
            "mark_amendment_sent",
            ScopeComparisonStatus::AmendmentPending,
        )?;
        comparison.amendment_proposal_id = Some(amendment_proposal_id);
        comparison.amendment_sent_at = Some(comparison.updated_at);
        comparison.amendment_sent_by = Some(actor.user_id.clone());

        study.amendment_required = true;
        study.amendment_accepted = false;
        study.amendment_accepted_at = None;

        let plan = self
            .transitions
            .plan_transition(&study, StudyStatus::AmendmentPending, actor);
        if plan.is_none() {
            warn!(
                study_id = %study.id,
                status = %study.status,
                "Study cannot move to AmendmentPending from its current stage, leaving it in place"
            );
        }

        let step = self.commit_step(comparison, study, plan).await?;
        info!(
            comparison_id = %comparison_id,
            amendment_proposal_id = %amendment_proposal_id,
            actor = %actor,
            "Amendment sent"
        );
        Ok(step)
    }

    /// Client accepted the amendment: adopt it as the active proposal and
    /// resume the study at funding plan.
    pub async fn accept_amendment(
        &self,
        comparison_id: Uuid,
        actor: &Actor,
    ) -> WorkflowResult<AmendmentStep> {
        let mut comparison = self.load_comparison(comparison_id).await?;
        if comparison.status != ScopeComparisonStatus::AmendmentPending {
            return Err(WorkflowError::precondition(
                "accept_amendment",
                ScopeComparisonStatus::AmendmentPending,
                comparison.status,
            ));
        }
        let mut study = self.load_study(comparison.study_id).await?;

        advance(
            &mut comparison,
            "accept_amendment",
            ScopeComparisonStatus::AmendmentAccepted,
        )?;
        let now = comparison.updated_at;
        comparison.amendment_accepted_at = Some(now);
        comparison.amendment_accepted_by = Some(actor.user_id.clone());

        if comparison.amendment_proposal_id.is_some() {
            study.current_proposal_id = comparison.amendment_proposal_id;
        }
        study.amendment_accepted = true;
        study.amendment_accepted_at = Some(now);

        // Financial info and site visit results stay valid; only planning
        // needs to reflect the revised scope.
        let plan = self
            .transitions
            .plan_transition(&study, StudyStatus::FundingPlanReady, actor);
        if plan.is_none() {
            warn!(
                study_id = %study.id,
                status = %study.status,
                "Study is not parked for an amendment, not resuming at FundingPlanReady"
            );
        }

        let step = self.commit_step(comparison, study, plan).await?;
        info!(comparison_id = %comparison_id, actor = %actor, "Amendment accepted");
        Ok(step)
    }

    /// Record the client's rejection. The study stays parked for staff to decide.
    pub async fn reject_amendment(
        &self,
        comparison_id: Uuid,
        actor: &Actor,
        reason: &str,
    ) -> WorkflowResult<ScopeComparison> {
        let mut comparison = self.load_comparison(comparison_id).await?;
        advance(
            &mut comparison,
            "reject_amendment",
            ScopeComparisonStatus::AmendmentRejected,
        )?;
        comparison.amendment_rejected_at = Some(comparison.updated_at);
        comparison.rejection_reason = Some(reason.to_string());

        self.commit_comparison(&mut comparison).await?;

        info!(
            comparison_id = %comparison_id,
            study_id = %comparison.study_id,
            actor = %actor,
            reason,
            "Amendment rejected"
        );
        Ok(comparison)
    }

    /// Reopen a rejected amendment so a revised one can be sent.
    pub async fn prepare_revised_amendment(
        &self,
        comparison_id: Uuid,
        actor: &Actor,
    ) -> WorkflowResult<ScopeComparison> {
        let mut comparison = self.load_comparison(comparison_id).await?;
        if comparison.status != ScopeComparisonStatus::AmendmentRejected {
            return Err(WorkflowError::precondition(
                "prepare_revised_amendment",
                ScopeComparisonStatus::AmendmentRejected,
                comparison.status,
            ));
        }

        let revision = comparison.revision_count + 1;
        let note = format!(
            "Revision {}: amendment {} sent {} by {} was rejected {}. Reason: {}",
            revision,
            display_or(comparison.amendment_proposal_id.map(|id| id.to_string())),
            display_or(comparison.amendment_sent_at.map(|at| at.format("%Y-%m-%d").to_string())),
            display_or(comparison.amendment_sent_by.clone()),
            display_or(comparison.amendment_rejected_at.map(|at| at.format("%Y-%m-%d").to_string())),
            display_or(comparison.rejection_reason.clone()),
        );
        comparison.add_note(actor.user_id.clone(), note);

        advance(
            &mut comparison,
            "prepare_revised_amendment",
            ScopeComparisonStatus::ExceedsThreshold,
        )?;
        comparison.amendment_proposal_id = None;
        comparison.amendment_sent_at = None;
        comparison.amendment_sent_by = None;
        comparison.amendment_accepted_at = None;
        comparison.amendment_accepted_by = None;
        comparison.amendment_rejected_at = None;
        comparison.rejection_reason = None;
        comparison.revision_count = revision;

        self.commit_comparison(&mut comparison).await?;

        info!(
            comparison_id = %comparison_id,
            revision,
            actor = %actor,
            "Prepared revised amendment"
        );
        Ok(comparison)
    }

    /// Accept the variance without an amendment. Final for this comparison.
    pub async fn override_variance(
        &self,
        comparison_id: Uuid,
        actor: &Actor,
        reason: &str,
    ) -> WorkflowResult<ScopeComparison> {
        let mut comparison = self.load_comparison(comparison_id).await?;

        let settings = self.policy.get_settings(self.tenant_id).await?;
        if !settings.allow_staff_override {
            return Err(WorkflowError::policy(
                "tenant does not allow staff to override scope variance",
            ));
        }

        advance(
            &mut comparison,
            "override_variance",
            ScopeComparisonStatus::Overridden,
        )?;
        comparison.overridden_by_user_id = Some(actor.user_id.clone());
        comparison.overridden_at = Some(comparison.updated_at);
        comparison.override_reason = Some(reason.to_string());
        comparison.add_note(actor.user_id.clone(), format!("Variance overridden: {reason}"));

        self.commit_comparison(&mut comparison).await?;

        warn!(
            comparison_id = %comparison_id,
            study_id = %comparison.study_id,
            variance_count = comparison.variance_count,
            actor = %actor,
            reason,
            "Scope variance overridden"
        );
        Ok(comparison)
    }

    async fn load_comparison(&self, comparison_id: Uuid) -> WorkflowResult<ScopeComparison> {
        self.store
            .load_comparison(self.tenant_id, comparison_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("scope comparison", comparison_id))
    }

    async fn load_study(&self, study_id: Uuid) -> WorkflowResult<StudyRequest> {
        self.store
            .load_study(self.tenant_id, study_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("study", study_id))
    }

    /// Commit a comparison on its own and adopt the stored version.
    async fn commit_comparison(&self, comparison: &mut ScopeComparison) -> WorkflowResult<()> {
        let receipt = self
            .store
            .commit(ChangeSet::comparison(comparison.clone()))
            .await
            .map_err(conflict_metrics)?;
        if let Some(version) = receipt.comparison_version {
            comparison.version = version;
        }
        Ok(())
    }

    /// Commit comparison and study together, then finish the planned
    /// transition if there is one.
    async fn commit_step(
        &self,
        mut comparison: ScopeComparison,
        study: StudyRequest,
        plan: Option<TransitionPlan>,
    ) -> WorkflowResult<AmendmentStep> {
        let study = match &plan {
            Some(plan) => plan.study.clone(),
            None => study,
        };
        let changes = ChangeSet::comparison(comparison.clone()).with_study(study.clone());

        let receipt = self.store.commit(changes).await.map_err(conflict_metrics)?;
        if let Some(version) = receipt.comparison_version {
            comparison.version = version;
        }

        let (study, transitioned) = match plan {
            Some(plan) => (self.transitions.complete(plan, receipt).await, true),
            None => {
                let mut study = study;
                if let Some(version) = receipt.study_version {
                    study.version = version;
                }
                (study, false)
            }
        };

        Ok(AmendmentStep {
            comparison,
            study,
            transitioned,
        })
    }
}

const CAPTURE_ATTEMPTS: u32 = 3;

fn conflict_metrics(err: PersistenceError) -> WorkflowError {
    let err = WorkflowError::from(err);
    if err.is_retryable() {
        workflow_metrics().record_conflict();
    }
    err
}

/// Overwrite the originals of an existing comparison that has no amendment
/// decision yet.
fn recapture(
    mut comparison: ScopeComparison,
    original: ElementCounts,
    source: ScopeSource,
    actor: &Actor,
) -> WorkflowResult<ScopeComparison> {
    if !comparison.status.accepts_comparison() {
        return Err(WorkflowError::precondition(
            "capture_original_scope",
            "no amendment decision on the comparison",
            comparison.status,
        ));
    }
    warn!(
        study_id = %comparison.study_id,
        comparison_id = %comparison.id,
        previous_status = %comparison.status,
        previous_total = comparison.original.total(),
        new_total = original.total(),
        "Original scope already captured, overwriting"
    );
    comparison.add_note(
        actor.user_id.clone(),
        format!(
            "Original scope re-captured. Previous original: {} elements ({}), status {}.",
            comparison.original.total(),
            comparison.original_source,
            comparison.status
        ),
    );
    let now = Utc::now();
    comparison.original = original;
    comparison.original_source = source;
    comparison.original_captured_at = now;
    comparison.actual = None;
    comparison.compared_at = None;
    comparison.compared_by_user_id = None;
    comparison.variance_count = 0;
    comparison.variance_percent = 0.0;
    comparison.status = ScopeComparisonStatus::Pending;
    comparison.updated_at = now;
    Ok(comparison)
}

/// Move the comparison along one edge of its sub-workflow.
fn advance(
    comparison: &mut ScopeComparison,
    operation: &'static str,
    next: ScopeComparisonStatus,
) -> WorkflowResult<()> {
    if !comparison.status.can_transition_to(next) {
        let sources: Vec<String> = ScopeComparisonStatus::iter()
            .filter(|s| s.can_transition_to(next))
            .map(|s| s.to_string())
            .collect();
        return Err(WorkflowError::precondition(
            operation,
            sources.join(" or "),
            comparison.status,
        ));
    }
    comparison.status = next;
    comparison.updated_at = Utc::now();
    Ok(())
}

fn display_or(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_string())
}
