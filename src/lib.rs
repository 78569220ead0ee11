// reserve-flow: study workflow engine with scope variance amendments
// This exposes the engines, their collaborators and the supporting config/logging modules

pub mod cli;
pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod error;
pub mod observability;
pub mod persistence;
pub mod scope;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use config::{config, ReserveFlowConfig};
#[cfg(feature = "database")]
pub use database::SqliteWorkflowStore;
pub use error::{WorkflowError, WorkflowResult};
pub use observability::{workflow_metrics, OperationTimer, WorkflowMetrics};
pub use persistence::{
    ChangeSet, CommitReceipt, ElementCountSource, InMemoryElementCounts, InMemoryWorkflowStore,
    PersistenceError, WorkflowStore,
};
pub use scope::{
    CachedPolicyProvider, ElementCounts, ScopeChangeMode, ScopeComparison, ScopeComparisonEngine,
    ScopeComparisonStatus, StaticPolicyProvider, TenantPolicyProvider, TenantScopeChangeSettings,
    VarianceEvaluation,
};
pub use telemetry::{create_study_span, generate_correlation_id, init_telemetry};
pub use workflows::{
    Actor, ActorRole, ActorSet, ActionSet, NotificationDispatcher, QueuedNotificationDispatcher,
    StageAction, StageConfig, StageRegistry, StudyPhase, StudyRequest, StudyStatus, TenantId,
    TransitionEngine,
};
