// In-memory collaborators, used for embedding and tests

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{ChangeSet, CommitReceipt, ElementCountSource, PersistenceError, WorkflowStore};
use crate::scope::{ElementCounts, ScopeComparison};
use crate::workflows::{StudyRequest, TenantId};

#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    studies: RwLock<HashMap<Uuid, StudyRequest>>,
    comparisons: RwLock<HashMap<Uuid, ScopeComparison>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new study and return it with its first version.
    pub async fn insert_study(&self, mut study: StudyRequest) -> StudyRequest {
        study.version = 1;
        self.studies.write().await.insert(study.id, study.clone());
        study
    }

    pub async fn study_count(&self) -> usize {
        self.studies.read().await.len()
    }

    pub async fn comparison_count(&self) -> usize {
        self.comparisons.read().await.len()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn load_study(
        &self,
        tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<Option<StudyRequest>, PersistenceError> {
        Ok(self
            .studies
            .read()
            .await
            .get(&study_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn load_comparison(
        &self,
        tenant_id: TenantId,
        comparison_id: Uuid,
    ) -> Result<Option<ScopeComparison>, PersistenceError> {
        Ok(self
            .comparisons
            .read()
            .await
            .get(&comparison_id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn load_comparison_for_study(
        &self,
        tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<Option<ScopeComparison>, PersistenceError> {
        Ok(self
            .comparisons
            .read()
            .await
            .values()
            .find(|c| c.study_id == study_id && c.tenant_id == tenant_id)
            .cloned())
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, PersistenceError> {
        // Lock order: studies, then comparisons.
        let mut studies = self.studies.write().await;
        let mut comparisons = self.comparisons.write().await;

        if let Some(study) = &changes.study {
            let found = match studies.get(&study.id) {
                Some(stored) if stored.tenant_id != study.tenant_id => {
                    return Err(PersistenceError::TenantMismatch { id: study.id });
                }
                Some(stored) => stored.version,
                None => 0,
            };
            if found != study.version {
                return Err(PersistenceError::VersionConflict {
                    study_id: study.id,
                    expected: study.version,
                    found,
                });
            }
        }

        if let Some(comparison) = &changes.comparison {
            let found = match comparisons.get(&comparison.id) {
                Some(stored) if stored.tenant_id != comparison.tenant_id => {
                    return Err(PersistenceError::TenantMismatch { id: comparison.id });
                }
                Some(stored) => stored.version,
                // One comparison per study: a second new record loses.
                None => comparisons
                    .values()
                    .find(|c| c.study_id == comparison.study_id)
                    .map(|existing| existing.version)
                    .unwrap_or(0),
            };
            if found != comparison.version {
                return Err(PersistenceError::ComparisonConflict {
                    comparison_id: comparison.id,
                    expected: comparison.version,
                    found,
                });
            }
        }

        let mut receipt = CommitReceipt::default();
        if let Some(mut study) = changes.study {
            study.version += 1;
            receipt.study_version = Some(study.version);
            debug!(study_id = %study.id, version = study.version, "Committed study");
            studies.insert(study.id, study);
        }
        if let Some(mut comparison) = changes.comparison {
            comparison.version += 1;
            receipt.comparison_version = Some(comparison.version);
            debug!(comparison_id = %comparison.id, status = %comparison.status, "Committed scope comparison");
            comparisons.insert(comparison.id, comparison);
        }

        Ok(receipt)
    }
}

/// Element counts keyed by study.
#[derive(Debug, Default)]
pub struct InMemoryElementCounts {
    estimates: RwLock<HashMap<Uuid, ElementCounts>>,
    current: RwLock<HashMap<Uuid, ElementCounts>>,
}

impl InMemoryElementCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_estimate(&self, study_id: Uuid, counts: ElementCounts) {
        self.estimates.write().await.insert(study_id, counts);
    }

    pub async fn set_current(&self, study_id: Uuid, counts: ElementCounts) {
        self.current.write().await.insert(study_id, counts);
    }
}

#[async_trait]
impl ElementCountSource for InMemoryElementCounts {
    async fn estimated_counts(
        &self,
        _tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<Option<ElementCounts>, PersistenceError> {
        Ok(self.estimates.read().await.get(&study_id).copied())
    }

    async fn current_counts(
        &self,
        _tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<ElementCounts, PersistenceError> {
        Ok(self
            .current
            .read()
            .await
            .get(&study_id)
            .copied()
            .unwrap_or_default())
    }
}
