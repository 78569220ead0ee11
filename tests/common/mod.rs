// Shared fixture for the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reserve_flow::persistence::{
    ChangeSet, CommitReceipt, InMemoryElementCounts, InMemoryWorkflowStore, PersistenceError,
    WorkflowStore,
};
use reserve_flow::scope::ScopeComparison;
use reserve_flow::scope::{
    ScopeChangeMode, ScopeComparisonEngine, StaticPolicyProvider, TenantScopeChangeSettings,
};
use reserve_flow::workflows::{
    Actor, ActorRole, NotificationDispatcher, RecordingNotificationDispatcher, StageAction,
    StageRegistry, StudyRequest, StudyStatus, TenantId, TransitionEngine,
};
use tokio::sync::Barrier;
use uuid::Uuid;

pub fn client() -> Actor {
    Actor::new("hoa-board", ActorRole::Client)
}

pub fn staff() -> Actor {
    Actor::new("staff-ana", ActorRole::Staff)
}

pub fn specialist() -> Actor {
    Actor::new("field-ray", ActorRole::Specialist)
}

pub fn admin() -> Actor {
    Actor::new("admin-kim", ActorRole::Admin)
}

pub fn amendment_policy(percent: f64) -> TenantScopeChangeSettings {
    TenantScopeChangeSettings {
        mode: ScopeChangeMode::VarianceWithAmendment,
        variance_percent_threshold: Some(percent),
        ..Default::default()
    }
}

pub struct Workflow {
    pub tenant: TenantId,
    pub store: Arc<InMemoryWorkflowStore>,
    pub counts: Arc<InMemoryElementCounts>,
    pub notifier: Arc<RecordingNotificationDispatcher>,
    pub transitions: Arc<TransitionEngine>,
    pub scope: ScopeComparisonEngine,
    settings: TenantScopeChangeSettings,
}

impl Workflow {
    pub fn new(settings: TenantScopeChangeSettings) -> Self {
        let notifier = Arc::new(RecordingNotificationDispatcher::new());
        Self::with_dispatcher(settings, notifier.clone(), notifier)
    }

    pub fn with_dispatcher(
        settings: TenantScopeChangeSettings,
        notifier: Arc<RecordingNotificationDispatcher>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let tenant = TenantId::new();
        let store = Arc::new(InMemoryWorkflowStore::new());
        let counts = Arc::new(InMemoryElementCounts::new());
        let transitions = Arc::new(TransitionEngine::new(
            Arc::new(StageRegistry::standard()),
            store.clone(),
            dispatcher,
        ));
        let scope = ScopeComparisonEngine::new(
            tenant,
            transitions.clone(),
            store.clone(),
            counts.clone(),
            Arc::new(StaticPolicyProvider::new(settings.clone())),
        );
        Self {
            tenant,
            store,
            counts,
            notifier,
            transitions,
            scope,
            settings,
        }
    }

    /// A second scope engine over the same data whose comparison reads wait
    /// at `gate` until two callers have read.
    pub fn gated_scope(&self, gate: Gate) -> ScopeComparisonEngine {
        let store = Arc::new(GatedStore::new(self.store.clone(), gate));
        ScopeComparisonEngine::new(
            self.tenant,
            self.transitions.clone(),
            store,
            self.counts.clone(),
            Arc::new(StaticPolicyProvider::new(self.settings.clone())),
        )
    }

    pub async fn study_at(&self, status: StudyStatus) -> StudyRequest {
        self.store
            .insert_study(StudyRequest::new(self.tenant).with_status(status))
            .await
    }

    pub async fn reload(&self, study: &StudyRequest) -> StudyRequest {
        self.store
            .load_study(self.tenant, study.id)
            .await
            .unwrap()
            .unwrap()
    }

    /// Advance through the ordinary flow until `target`, using whoever may advance each stage.
    pub async fn advance_until(&self, study: &mut StudyRequest, target: StudyStatus) {
        while study.status != target {
            let config = self.transitions.registry().get_config(study.status);
            let actor = [client(), staff(), specialist()]
                .into_iter()
                .find(|a| config.advanced_by.contains(a.role))
                .unwrap_or_else(Actor::system);
            let moved = self
                .transitions
                .perform_action(study, StageAction::Advance, &actor)
                .await
                .unwrap();
            assert!(moved, "could not advance from {}", study.status);
        }
    }
}

/// Which comparison read holds the first two callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    ComparisonById,
    ComparisonByStudy,
}

/// Store wrapper that lets two callers read the same comparison before
/// either of them writes.
pub struct GatedStore {
    inner: Arc<InMemoryWorkflowStore>,
    gate: Gate,
    barrier: Barrier,
    arrivals: AtomicUsize,
}

impl GatedStore {
    pub fn new(inner: Arc<InMemoryWorkflowStore>, gate: Gate) -> Self {
        Self {
            inner,
            gate,
            barrier: Barrier::new(2),
            arrivals: AtomicUsize::new(0),
        }
    }

    async fn hold(&self, at: Gate) {
        // Only the first pair waits, so retries pass straight through.
        if at == self.gate && self.arrivals.fetch_add(1, Ordering::SeqCst) < 2 {
            self.barrier.wait().await;
        }
    }
}

#[async_trait]
impl WorkflowStore for GatedStore {
    async fn load_study(
        &self,
        tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<Option<StudyRequest>, PersistenceError> {
        self.inner.load_study(tenant_id, study_id).await
    }

    async fn load_comparison(
        &self,
        tenant_id: TenantId,
        comparison_id: Uuid,
    ) -> Result<Option<ScopeComparison>, PersistenceError> {
        let loaded = self.inner.load_comparison(tenant_id, comparison_id).await;
        self.hold(Gate::ComparisonById).await;
        loaded
    }

    async fn load_comparison_for_study(
        &self,
        tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<Option<ScopeComparison>, PersistenceError> {
        let loaded = self.inner.load_comparison_for_study(tenant_id, study_id).await;
        self.hold(Gate::ComparisonByStudy).await;
        loaded
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, PersistenceError> {
        self.inner.commit(changes).await
    }
}
