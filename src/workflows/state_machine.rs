// Study transition engine
//
// Validates and performs stage changes against the stage registry. Every
// transition is one read-compute-commit unit: the caller's study is only
// updated after the store accepted the write, and notifications go out after
// that. A declined transition is `Ok(false)`, not an error.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::flags::{ActorSet, StageAction};
use super::notifications::{NotificationDispatcher, StageEvent, StageNotification};
use super::stages::StageRegistry;
use super::status::StudyStatus;
use super::study::{Actor, StudyRequest};
use crate::error::{WorkflowError, WorkflowResult};
use crate::observability::workflow_metrics;
use crate::persistence::{ChangeSet, CommitReceipt, WorkflowStore};

/// A transition computed in memory but not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    /// The study as it will be stored.
    pub study: StudyRequest,
    pub from: StudyStatus,
    pub to: StudyStatus,
    pub actor: Actor,
    pub forced: bool,
}

pub struct TransitionEngine {
    registry: Arc<StageRegistry>,
    store: Arc<dyn WorkflowStore>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl std::fmt::Debug for TransitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionEngine")
            .field("stages", &self.registry.statuses().len())
            .finish()
    }
}

impl TransitionEngine {
    pub fn new(
        registry: Arc<StageRegistry>,
        store: Arc<dyn WorkflowStore>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn is_transition_allowed(&self, from: StudyStatus, to: StudyStatus) -> bool {
        let config = self.registry.get_config(from);
        config.default_next == Some(to) || config.alternative_transitions.values().any(|t| *t == to)
    }

    /// Targets reachable from `from` through the checked path.
    pub fn get_allowed_transitions(&self, from: StudyStatus) -> Vec<StudyStatus> {
        self.registry.get_config(from).reachable()
    }

    /// Compute a checked transition without touching the store.
    pub fn plan_transition(
        &self,
        study: &StudyRequest,
        to: StudyStatus,
        actor: &Actor,
    ) -> Option<TransitionPlan> {
        if !self.is_transition_allowed(study.status, to) {
            return None;
        }
        Some(self.build_plan(study, to, actor, false))
    }

    /// Compute a transition that ignores the stage graph.
    pub fn plan_forced_transition(
        &self,
        study: &StudyRequest,
        to: StudyStatus,
        actor: &Actor,
    ) -> WorkflowResult<TransitionPlan> {
        if !actor.is_admin() {
            return Err(WorkflowError::policy(format!(
                "forced transitions are reserved for administrators, {} is {}",
                actor.user_id, actor.role
            )));
        }
        Ok(self.build_plan(study, to, actor, true))
    }

    fn build_plan(
        &self,
        study: &StudyRequest,
        to: StudyStatus,
        actor: &Actor,
        forced: bool,
    ) -> TransitionPlan {
        let mut next = study.clone();
        next.status = to;
        next.state_changed_at = Some(Utc::now());
        next.status_changed_by = Some(actor.user_id.clone());
        TransitionPlan {
            study: next,
            from: study.status,
            to,
            actor: actor.clone(),
            forced,
        }
    }

    /// Move `study` to `to` if the stage graph allows it.
    pub async fn try_transition(
        &self,
        study: &mut StudyRequest,
        to: StudyStatus,
        actor: &Actor,
    ) -> WorkflowResult<bool> {
        match self.plan_transition(study, to, actor) {
            Some(plan) => self.commit_plan(study, plan).await,
            None => {
                workflow_metrics().record_declined();
                debug!(
                    study_id = %study.id,
                    from = %study.status,
                    to = %to,
                    actor = %actor,
                    "Transition not allowed from current stage"
                );
                Ok(false)
            }
        }
    }

    /// Admin correction path: move `study` to any status, ignoring the graph.
    pub async fn force_transition(
        &self,
        study: &mut StudyRequest,
        to: StudyStatus,
        actor: &Actor,
    ) -> WorkflowResult<bool> {
        let plan = self.plan_forced_transition(study, to, actor)?;
        warn!(
            study_id = %study.id,
            from = %plan.from,
            to = %plan.to,
            allowed = self.is_transition_allowed(plan.from, plan.to),
            actor = %actor,
            "Forcing study transition outside the stage graph"
        );
        self.commit_plan(study, plan).await
    }

    /// Resolve `action` against the current stage and perform it.
    ///
    /// Admin-only actions need an explicit target and go through
    /// [`force_transition`](Self::force_transition); they are declined here.
    pub async fn perform_action(
        &self,
        study: &mut StudyRequest,
        action: StageAction,
        actor: &Actor,
    ) -> WorkflowResult<bool> {
        if action.is_admin_only()
            || !self
                .registry
                .can_actor_perform_action(study.status, actor.role, action)
        {
            debug!(
                study_id = %study.id,
                status = %study.status,
                action = %action,
                actor = %actor,
                "Action not permitted"
            );
            workflow_metrics().record_declined();
            return Ok(false);
        }

        match self.registry.get_next_stage(study.status, action) {
            Some(next) => self.try_transition(study, next, actor).await,
            None => Ok(false),
        }
    }

    /// Follow auto-advancing stages as the system actor. Returns the statuses entered.
    pub async fn run_auto_advance(
        &self,
        study: &mut StudyRequest,
    ) -> WorkflowResult<Vec<StudyStatus>> {
        let system = Actor::system();
        let mut entered = Vec::new();

        for _ in 0..self.registry.statuses().len() {
            let config = self.registry.get_config(study.status);
            let next = match (config.auto_advance, config.default_next) {
                (true, Some(next)) => next,
                _ => break,
            };
            if !self.try_transition(study, next, &system).await? {
                break;
            }
            entered.push(next);
        }

        Ok(entered)
    }

    async fn commit_plan(
        &self,
        study: &mut StudyRequest,
        plan: TransitionPlan,
    ) -> WorkflowResult<bool> {
        let receipt = match self.store.commit(ChangeSet::study(plan.study.clone())).await {
            Ok(receipt) => receipt,
            Err(e) => {
                let err = WorkflowError::from(e);
                if err.is_retryable() {
                    workflow_metrics().record_conflict();
                    warn!(study_id = %study.id, to = %plan.to, "Transition lost a concurrent update");
                }
                return Err(err);
            }
        };
        *study = self.complete(plan, receipt).await;
        Ok(true)
    }

    /// Bookkeeping after a plan's study was committed: adopt the stored
    /// version, record metrics and publish stage notifications.
    pub(crate) async fn complete(&self, plan: TransitionPlan, receipt: CommitReceipt) -> StudyRequest {
        let mut study = plan.study;
        if let Some(version) = receipt.study_version {
            study.version = version;
        }

        workflow_metrics().record_transition(plan.forced);
        info!(
            study_id = %study.id,
            from = %plan.from,
            to = %plan.to,
            actor = %plan.actor,
            forced = plan.forced,
            "Study transitioned"
        );

        let exit = self.registry.get_config(plan.from).notify_on_exit;
        let enter = self.registry.get_config(plan.to).notify_on_enter;
        self.publish(&study, exit, StageEvent::exited(plan.from)).await;
        self.publish(&study, enter, StageEvent::entered(plan.to)).await;

        study
    }

    async fn publish(&self, study: &StudyRequest, recipients: ActorSet, event: StageEvent) {
        if recipients.is_empty() {
            return;
        }
        let notification = StageNotification {
            tenant_id: study.tenant_id,
            study_id: study.id,
            recipients,
            event,
            occurred_at: Utc::now(),
        };
        match self.notifier.notify(notification).await {
            Ok(()) => workflow_metrics().record_notification(true),
            Err(e) => {
                workflow_metrics().record_notification(false);
                warn!(
                    study_id = %study.id,
                    event = ?event,
                    error = %e,
                    "Failed to publish stage notification"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryWorkflowStore;
    use crate::workflows::notifications::{
        MockNotificationDispatcher, RecordingNotificationDispatcher, StageEventKind,
    };
    use crate::workflows::{ActorRole, StageConfig, TenantId};

    fn staff() -> Actor {
        Actor::new("staff-1", ActorRole::Staff)
    }

    fn admin() -> Actor {
        Actor::new("admin-1", ActorRole::Admin)
    }

    async fn setup(
        status: StudyStatus,
    ) -> (
        TransitionEngine,
        Arc<InMemoryWorkflowStore>,
        Arc<RecordingNotificationDispatcher>,
        StudyRequest,
    ) {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let notifier = Arc::new(RecordingNotificationDispatcher::new());
        let engine = TransitionEngine::new(
            Arc::new(StageRegistry::standard()),
            store.clone(),
            notifier.clone(),
        );
        let study = store
            .insert_study(StudyRequest::new(TenantId::new()).with_status(status))
            .await;
        (engine, store, notifier, study)
    }

    #[tokio::test]
    async fn test_try_transition_follows_default_next() {
        let (engine, store, notifier, mut study) = setup(StudyStatus::ProposalSent).await;

        let moved = engine
            .try_transition(&mut study, StudyStatus::ProposalAccepted, &Actor::new("hoa", ActorRole::Client))
            .await
            .unwrap();

        assert!(moved);
        assert_eq!(study.status, StudyStatus::ProposalAccepted);
        assert_eq!(study.status_changed_by.as_deref(), Some("hoa"));
        assert!(study.state_changed_at.is_some());
        assert_eq!(study.version, 2);

        let stored = store.load_study(study.tenant_id, study.id).await.unwrap().unwrap();
        assert_eq!(stored, study);

        let sent = notifier.notifications().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].event, StageEvent::exited(StudyStatus::ProposalSent));
        assert_eq!(sent[1].event.kind, StageEventKind::Entered);
        assert_eq!(sent[1].event.status, StudyStatus::ProposalAccepted);
    }

    #[tokio::test]
    async fn test_illegal_transition_returns_false_without_mutation() {
        let (engine, store, notifier, mut study) = setup(StudyStatus::ProposalSent).await;
        let before = study.clone();

        let moved = engine
            .try_transition(&mut study, StudyStatus::FundingPlanReady, &staff())
            .await
            .unwrap();

        assert!(!moved);
        assert_eq!(study, before);
        assert_eq!(store.load_study(study.tenant_id, study.id).await.unwrap().unwrap(), before);
        assert!(notifier.notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_alternative_transition_is_allowed() {
        let (engine, _store, _notifier, mut study) = setup(StudyStatus::ProposalSent).await;
        assert!(engine
            .try_transition(&mut study, StudyStatus::RequestDeclined, &staff())
            .await
            .unwrap());
        assert_eq!(study.status, StudyStatus::RequestDeclined);
    }

    #[tokio::test]
    async fn test_force_transition_leaves_terminal_state() {
        let (engine, _store, _notifier, mut study) = setup(StudyStatus::RequestArchived).await;

        assert!(!engine
            .try_transition(&mut study, StudyStatus::ReportInProcess, &staff())
            .await
            .unwrap());
        assert!(engine
            .force_transition(&mut study, StudyStatus::ReportInProcess, &admin())
            .await
            .unwrap());
        assert_eq!(study.status, StudyStatus::ReportInProcess);
        assert_eq!(study.status_changed_by.as_deref(), Some("admin-1"));
    }

    #[tokio::test]
    async fn test_force_transition_requires_admin() {
        let (engine, _store, _notifier, mut study) = setup(StudyStatus::RequestArchived).await;
        let err = engine
            .force_transition(&mut study, StudyStatus::ReportInProcess, &staff())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::PolicyViolation { .. }));
        assert_eq!(study.status, StudyStatus::RequestArchived);
    }

    #[tokio::test]
    async fn test_stale_study_reports_conflict() {
        let (engine, _store, _notifier, study) = setup(StudyStatus::RequestCreated).await;
        let mut first = study.clone();
        let mut second = study.clone();

        assert!(engine
            .try_transition(&mut first, StudyStatus::RequestApproved, &staff())
            .await
            .unwrap());
        let err = engine
            .try_transition(&mut second, StudyStatus::RequestDeclined, &staff())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(second.status, StudyStatus::RequestCreated);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_roll_back() {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let mut notifier = MockNotificationDispatcher::new();
        notifier
            .expect_notify()
            .returning(|_| Err(anyhow::anyhow!("mailer down")));
        let engine = TransitionEngine::new(
            Arc::new(StageRegistry::standard()),
            store.clone(),
            Arc::new(notifier),
        );
        let mut study = store
            .insert_study(StudyRequest::new(TenantId::new()))
            .await;

        assert!(engine
            .try_transition(&mut study, StudyStatus::RequestApproved, &staff())
            .await
            .unwrap());
        let stored = store.load_study(study.tenant_id, study.id).await.unwrap().unwrap();
        assert_eq!(stored.status, StudyStatus::RequestApproved);
    }

    #[tokio::test]
    async fn test_perform_action_checks_permissions() {
        let (engine, _store, _notifier, mut study) = setup(StudyStatus::ProposalSent).await;

        let specialist = Actor::new("field-1", ActorRole::Specialist);
        assert!(!engine
            .perform_action(&mut study, StageAction::Advance, &specialist)
            .await
            .unwrap());
        assert!(!engine
            .perform_action(&mut study, StageAction::Skip, &admin())
            .await
            .unwrap());
        assert!(engine
            .perform_action(&mut study, StageAction::RequestChanges, &specialist)
            .await
            .unwrap());
        assert_eq!(study.status, StudyStatus::ProposalChangesRequested);
    }

    #[tokio::test]
    async fn test_auto_advance_stops_at_manual_stage() {
        let (engine, _store, _notifier, mut study) = setup(StudyStatus::ProposalAccepted).await;
        let entered = engine.run_auto_advance(&mut study).await.unwrap();

        assert_eq!(entered, vec![StudyStatus::ServiceContactsRequested]);
        assert_eq!(study.status, StudyStatus::ServiceContactsRequested);
        assert_eq!(study.status_changed_by.as_deref(), Some("system"));
    }

    #[tokio::test]
    async fn test_allowed_transitions_union() {
        let (engine, _store, _notifier, _study) = setup(StudyStatus::RequestCreated).await;
        let allowed = engine.get_allowed_transitions(StudyStatus::ProposalSent);
        assert_eq!(
            allowed,
            vec![
                StudyStatus::ProposalAccepted,
                StudyStatus::RequestDeclined,
                StudyStatus::ProposalChangesRequested,
                StudyStatus::RequestCancelled,
            ]
        );
        assert!(engine.get_allowed_transitions(StudyStatus::RequestArchived).is_empty());
    }

    #[tokio::test]
    async fn test_substitute_registry() {
        let registry = StageRegistry::builder()
            .stage(
                StageConfig::new(StudyStatus::RequestCreated, "Intake")
                    .advances_to(StudyStatus::RequestCompleted, ActorSet::all()),
            )
            .build();
        let store = Arc::new(InMemoryWorkflowStore::new());
        let engine = TransitionEngine::new(
            Arc::new(registry),
            store.clone(),
            Arc::new(RecordingNotificationDispatcher::new()),
        );
        let mut study = store.insert_study(StudyRequest::new(TenantId::new())).await;

        assert!(engine.is_transition_allowed(StudyStatus::RequestCreated, StudyStatus::RequestCompleted));
        assert!(!engine.is_transition_allowed(StudyStatus::RequestCreated, StudyStatus::RequestApproved));
        assert!(engine
            .try_transition(&mut study, StudyStatus::RequestCompleted, &staff())
            .await
            .unwrap());
        // Unconfigured stages permit nothing.
        assert!(engine.get_allowed_transitions(StudyStatus::RequestCompleted).is_empty());
    }
}
