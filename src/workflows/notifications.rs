// Stage entry/exit notifications
//
// The engines only say *who* should hear about *which* stage change; message
// content and delivery belong to whatever sits behind the dispatcher. The
// queued dispatcher publishes onto a bounded channel and never waits on the
// consumer, so a slow or failing mailer cannot hold up a transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use super::flags::ActorSet;
use super::status::StudyStatus;
use super::study::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageEventKind {
    Entered,
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub kind: StageEventKind,
    pub status: StudyStatus,
}

impl StageEvent {
    pub fn entered(status: StudyStatus) -> Self {
        Self {
            kind: StageEventKind::Entered,
            status,
        }
    }

    pub fn exited(status: StudyStatus) -> Self {
        Self {
            kind: StageEventKind::Exited,
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageNotification {
    pub tenant_id: TenantId,
    pub study_id: Uuid,
    pub recipients: ActorSet,
    pub event: StageEvent,
    pub occurred_at: DateTime<Utc>,
}

/// Boundary to the notification channel. Fire-and-forget from the engine's
/// point of view: errors are logged by the caller and never roll back a
/// committed transition.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, notification: StageNotification) -> anyhow::Result<()>;
}

/// Delivers queued notifications (email, in-app, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &StageNotification) -> anyhow::Result<()>;
}

/// Dispatcher for callers that do not notify anyone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for NoopNotificationDispatcher {
    async fn notify(&self, _notification: StageNotification) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingNotificationDispatcher {
    received: Mutex<Vec<StageNotification>>,
}

impl RecordingNotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notifications(&self) -> Vec<StageNotification> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotificationDispatcher {
    async fn notify(&self, notification: StageNotification) -> anyhow::Result<()> {
        self.received.lock().await.push(notification);
        Ok(())
    }
}

/// Publishes notifications onto a bounded queue consumed by a
/// [`NotificationWorker`].
#[derive(Debug, Clone)]
pub struct QueuedNotificationDispatcher {
    sender: mpsc::Sender<StageNotification>,
}

impl QueuedNotificationDispatcher {
    /// Create a dispatcher and the worker that drains it.
    pub fn channel(capacity: usize) -> (Self, NotificationWorker) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, NotificationWorker { receiver })
    }
}

#[async_trait]
impl NotificationDispatcher for QueuedNotificationDispatcher {
    async fn notify(&self, notification: StageNotification) -> anyhow::Result<()> {
        self.sender.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(n) => anyhow::anyhow!(
                "notification queue full, dropped {:?} for study {}",
                n.event,
                n.study_id
            ),
            mpsc::error::TrySendError::Closed(n) => anyhow::anyhow!(
                "notification queue closed, dropped {:?} for study {}",
                n.event,
                n.study_id
            ),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Consumer side of the notification queue.
#[derive(Debug)]
pub struct NotificationWorker {
    receiver: mpsc::Receiver<StageNotification>,
}

impl NotificationWorker {
    /// Deliver until every dispatcher handle has been dropped.
    pub async fn run(mut self, sink: Arc<dyn NotificationSink>) -> WorkerStats {
        let mut stats = WorkerStats::default();
        while let Some(notification) = self.receiver.recv().await {
            match sink.deliver(&notification).await {
                Ok(()) => {
                    stats.delivered += 1;
                    debug!(
                        study_id = %notification.study_id,
                        event = ?notification.event,
                        "Notification delivered"
                    );
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(
                        study_id = %notification.study_id,
                        event = ?notification.event,
                        error = %e,
                        "Notification delivery failed"
                    );
                }
            }
        }
        info!(
            delivered = stats.delivered,
            failed = stats.failed,
            "Notification worker stopped"
        );
        stats
    }

    pub fn spawn(self, sink: Arc<dyn NotificationSink>) -> JoinHandle<WorkerStats> {
        tokio::spawn(self.run(sink))
    }
}

/// Sink that only logs; stands in for a mailer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn deliver(&self, notification: &StageNotification) -> anyhow::Result<()> {
        info!(
            tenant_id = %notification.tenant_id,
            study_id = %notification.study_id,
            recipients = %notification.recipients,
            event = ?notification.event.kind,
            status = %notification.event.status,
            "Stage notification"
        );
        Ok(())
    }
}
