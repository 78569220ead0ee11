// The mutable study record and the identities acting on it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::flags::ActorRole;
use super::status::StudyStatus;

/// Tenant every record is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        TenantId(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who is performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    /// The workflow itself, for automatic transitions.
    pub fn system() -> Self {
        Self::new("system", ActorRole::System)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, ActorRole::Admin | ActorRole::System)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.user_id, self.role)
    }
}

/// A client engagement moving through the workflow.
///
/// Only `TransitionEngine` and `ScopeComparisonEngine` mutate the status and
/// amendment fields. `version` is the optimistic concurrency token owned by
/// the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyRequest {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub status: StudyStatus,
    pub state_changed_at: Option<DateTime<Utc>>,
    pub status_changed_by: Option<String>,
    pub current_proposal_id: Option<Uuid>,
    pub amendment_required: bool,
    pub amendment_accepted: bool,
    pub amendment_accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl StudyRequest {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            status: StudyStatus::RequestCreated,
            state_changed_at: None,
            status_changed_by: None,
            current_proposal_id: None,
            amendment_required: false,
            amendment_accepted: false,
            amendment_accepted_at: None,
            created_at: Utc::now(),
            version: 0,
        }
    }

    pub fn with_status(mut self, status: StudyStatus) -> Self {
        self.status = status;
        self
    }
}
