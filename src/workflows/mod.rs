// Study workflow: stage table, transition engine and notification boundary

pub mod flags;
pub mod notifications;
pub mod stages;
pub mod state_machine;
pub mod status;
pub mod study;

pub use flags::{ActionSet, ActorRole, ActorSet, StageAction};
pub use notifications::{
    NoopNotificationDispatcher, NotificationDispatcher, NotificationSink, NotificationWorker,
    QueuedNotificationDispatcher, RecordingNotificationDispatcher, StageEvent, StageEventKind,
    StageNotification, TracingNotificationSink, WorkerStats,
};
pub use stages::{StageConfig, StageRegistry, StageRegistryBuilder, StageValidation};
pub use state_machine::{TransitionEngine, TransitionPlan};
pub use status::{StudyPhase, StudyStatus};
pub use study::{Actor, StudyRequest, TenantId};
