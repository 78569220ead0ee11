use thiserror::Error;
use uuid::Uuid;

use crate::persistence::PersistenceError;

/// Errors raised by the workflow and scope engines.
///
/// A transition that is simply not allowed from the current stage is not an
/// error: the engines return `Ok(false)` for it.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Policy violation: {reason}")]
    PolicyViolation { reason: String },

    #[error("Precondition failed for {operation}: expected {expected}, found {actual}")]
    PreconditionViolation {
        operation: &'static str,
        expected: String,
        actual: String,
    },

    #[error("{entity} {id} was modified concurrently (read version {expected}, stored version {found}); re-fetch and retry")]
    ConcurrencyConflict {
        entity: &'static str,
        id: Uuid,
        expected: u64,
        found: u64,
    },

    #[error("Persistence error: {0}")]
    Persistence(PersistenceError),
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        WorkflowError::NotFound { entity, id }
    }

    pub fn policy(reason: impl Into<String>) -> Self {
        WorkflowError::PolicyViolation {
            reason: reason.into(),
        }
    }

    pub fn precondition(
        operation: &'static str,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        WorkflowError::PreconditionViolation {
            operation,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// The caller should re-fetch the study and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::ConcurrencyConflict { .. })
    }
}

impl From<PersistenceError> for WorkflowError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::VersionConflict {
                study_id,
                expected,
                found,
            } => WorkflowError::ConcurrencyConflict {
                entity: "study",
                id: study_id,
                expected,
                found,
            },
            PersistenceError::ComparisonConflict {
                comparison_id,
                expected,
                found,
            } => WorkflowError::ConcurrencyConflict {
                entity: "scope comparison",
                id: comparison_id,
                expected,
                found,
            },
            other => WorkflowError::Persistence(other),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
