//! Persistence collaborators for the workflow engines
//!
//! The engines never talk to a database directly. They read through
//! [`WorkflowStore`] and [`ElementCountSource`] and write exactly once per
//! operation by committing a [`ChangeSet`], which the store applies
//! all-or-nothing.
//!
//! Study and scope comparison writes are guarded by an optimistic version
//! token: a commit only succeeds when the stored version still equals the
//! version the caller read. Two racing transitions on the same study therefore
//! produce one success and one [`PersistenceError::VersionConflict`]; racing
//! amendment steps on the same comparison produce one
//! [`PersistenceError::ComparisonConflict`]. A study has at most one scope
//! comparison; a new comparison (`version == 0`) for a study that already has
//! one is a conflict too.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use crate::scope::{ElementCounts, ScopeComparison};
use crate::workflows::{StudyRequest, TenantId};

pub use memory::{InMemoryElementCounts, InMemoryWorkflowStore};

/// Errors that can occur in a persistence collaborator
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Version mismatch for study {study_id}: expected {expected}, found {found}")]
    VersionConflict {
        study_id: Uuid,
        expected: u64,
        found: u64,
    },

    #[error("Version mismatch for scope comparison {comparison_id}: expected {expected}, found {found}")]
    ComparisonConflict {
        comparison_id: Uuid,
        expected: u64,
        found: u64,
    },

    #[error("Record {id} belongs to a different tenant")]
    TenantMismatch { id: Uuid },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Stored data is corrupt: {reason}")]
    StateCorruption { reason: String },

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Writes produced by one engine operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub study: Option<StudyRequest>,
    pub comparison: Option<ScopeComparison>,
}

impl ChangeSet {
    pub fn study(study: StudyRequest) -> Self {
        Self {
            study: Some(study),
            comparison: None,
        }
    }

    pub fn comparison(comparison: ScopeComparison) -> Self {
        Self {
            study: None,
            comparison: Some(comparison),
        }
    }

    pub fn with_study(mut self, study: StudyRequest) -> Self {
        self.study = Some(study);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.study.is_none() && self.comparison.is_none()
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitReceipt {
    /// Version now stored for the committed study, if one was written.
    pub study_version: Option<u64>,
    /// Version now stored for the committed comparison, if one was written.
    pub comparison_version: Option<u64>,
}

/// Tenant-scoped storage of studies and scope comparisons.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn load_study(
        &self,
        tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<Option<StudyRequest>, PersistenceError>;

    async fn load_comparison(
        &self,
        tenant_id: TenantId,
        comparison_id: Uuid,
    ) -> Result<Option<ScopeComparison>, PersistenceError>;

    async fn load_comparison_for_study(
        &self,
        tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<Option<ScopeComparison>, PersistenceError>;

    /// Apply every write in `changes` or none of them.
    ///
    /// A study or comparison is written only if its `version` equals the
    /// stored version (or it does not exist yet and `version == 0`). A new
    /// comparison is rejected while its study already has one.
    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, PersistenceError>;
}

/// Read-only view of the elements recorded for a study.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ElementCountSource: Send + Sync {
    /// Counts the client reported on the originating request, if any.
    async fn estimated_counts(
        &self,
        tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<Option<ElementCounts>, PersistenceError>;

    /// Elements currently attached to the study.
    async fn current_counts(
        &self,
        tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<ElementCounts, PersistenceError>;
}
