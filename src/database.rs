// SQLite-backed collaborators for the workflow engines
//
// Records are stored as JSON documents next to the columns the queries filter
// on. Study writes use the version column for optimistic concurrency inside a
// transaction, so a commit either applies every write in its change set or
// none.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::persistence::{
    ChangeSet, CommitReceipt, ElementCountSource, PersistenceError, WorkflowStore,
};
use crate::scope::{ElementCounts, ScopeComparison, TenantPolicyProvider, TenantScopeChangeSettings};
use crate::workflows::{StudyRequest, TenantId};

/// Workflow store, element-count source and tenant policy provider on one pool.
pub struct SqliteWorkflowStore {
    pool: SqlitePool,
    default_settings: TenantScopeChangeSettings,
}

impl SqliteWorkflowStore {
    /// Open (and create if missing) the configured database.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, PersistenceError> {
        if !sqlx::Sqlite::database_exists(&config.url).await? {
            info!("Creating database at {}", config.url);
            sqlx::Sqlite::create_database(&config.url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        let store = Self::from_pool(pool);
        if config.auto_migrate {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            default_settings: TenantScopeChangeSettings::default(),
        }
    }

    /// Settings served to tenants without a stored policy.
    pub fn with_default_settings(mut self, settings: TenantScopeChangeSettings) -> Self {
        self.default_settings = settings;
        self
    }

    pub async fn migrate(&self) -> Result<(), PersistenceError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Store a new study and return it with its first version.
    pub async fn insert_study(&self, study: StudyRequest) -> Result<StudyRequest, PersistenceError> {
        let mut study = study;
        study.version = 0;
        let receipt = self.commit(ChangeSet::study(study.clone())).await?;
        study.version = receipt.study_version.unwrap_or(1);
        Ok(study)
    }

    pub async fn save_tenant_settings(
        &self,
        tenant_id: TenantId,
        settings: &TenantScopeChangeSettings,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO tenant_scope_settings (tenant_id, data) VALUES (?1, ?2)
            ON CONFLICT(tenant_id) DO UPDATE SET data = excluded.data
            "#,
        )
        .bind(tenant_id.to_string())
        .bind(serde_json::to_string(settings)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record element counts for a study. `None` leaves that column unchanged.
    pub async fn record_element_counts(
        &self,
        tenant_id: TenantId,
        study_id: Uuid,
        estimated: Option<ElementCounts>,
        current: Option<ElementCounts>,
    ) -> Result<(), PersistenceError> {
        let estimated = estimated.map(|c| serde_json::to_string(&c)).transpose()?;
        let current = current.map(|c| serde_json::to_string(&c)).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO study_element_counts (study_id, tenant_id, estimated, current)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(study_id) DO UPDATE SET
                estimated = COALESCE(excluded.estimated, study_element_counts.estimated),
                current = COALESCE(excluded.current, study_element_counts.current)
            WHERE study_element_counts.tenant_id = excluded.tenant_id
            "#,
        )
        .bind(study_id.to_string())
        .bind(tenant_id.to_string())
        .bind(estimated)
        .bind(current)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_document<T: DeserializeOwned>(
        &self,
        sql: &str,
        tenant_id: TenantId,
        key: Uuid,
    ) -> Result<Option<T>, PersistenceError> {
        let row = sqlx::query(sql)
            .bind(key.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let data: String = row.try_get("data")?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    async fn element_counts(
        &self,
        column: &str,
        tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<Option<ElementCounts>, PersistenceError> {
        let sql = format!(
            "SELECT {column} AS counts FROM study_element_counts WHERE study_id = ?1 AND tenant_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(study_id.to_string())
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let counts: Option<String> = match row {
            Some(row) => row.try_get("counts")?,
            None => None,
        };
        Ok(counts.map(|c| serde_json::from_str(&c)).transpose()?)
    }

    pub async fn close(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}

#[async_trait]
impl WorkflowStore for SqliteWorkflowStore {
    async fn load_study(
        &self,
        tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<Option<StudyRequest>, PersistenceError> {
        self.load_document(
            "SELECT data FROM studies WHERE id = ?1 AND tenant_id = ?2",
            tenant_id,
            study_id,
        )
        .await
    }

    async fn load_comparison(
        &self,
        tenant_id: TenantId,
        comparison_id: Uuid,
    ) -> Result<Option<ScopeComparison>, PersistenceError> {
        self.load_document(
            "SELECT data FROM scope_comparisons WHERE id = ?1 AND tenant_id = ?2",
            tenant_id,
            comparison_id,
        )
        .await
    }

    async fn load_comparison_for_study(
        &self,
        tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<Option<ScopeComparison>, PersistenceError> {
        self.load_document(
            "SELECT data FROM scope_comparisons WHERE study_id = ?1 AND tenant_id = ?2",
            tenant_id,
            study_id,
        )
        .await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, PersistenceError> {
        // Dropping the transaction without commit rolls everything back.
        let mut tx = self.pool.begin().await?;
        let mut receipt = CommitReceipt::default();

        if let Some(study) = changes.study {
            let read_version = study.version;
            let mut stored = study;
            stored.version = read_version + 1;
            let data = serde_json::to_string(&stored)?;

            let updated = sqlx::query(
                r#"
                UPDATE studies
                SET status = ?1, version = ?2, data = ?3, updated_at = datetime('now')
                WHERE id = ?4 AND tenant_id = ?5 AND version = ?6
                "#,
            )
            .bind(stored.status.to_string())
            .bind(stored.version as i64)
            .bind(&data)
            .bind(stored.id.to_string())
            .bind(stored.tenant_id.to_string())
            .bind(read_version as i64)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                let existing = sqlx::query("SELECT tenant_id, version FROM studies WHERE id = ?1")
                    .bind(stored.id.to_string())
                    .fetch_optional(&mut *tx)
                    .await?;

                match existing {
                    None if read_version == 0 => {
                        sqlx::query(
                            "INSERT INTO studies (id, tenant_id, status, version, data) VALUES (?1, ?2, ?3, ?4, ?5)",
                        )
                        .bind(stored.id.to_string())
                        .bind(stored.tenant_id.to_string())
                        .bind(stored.status.to_string())
                        .bind(stored.version as i64)
                        .bind(&data)
                        .execute(&mut *tx)
                        .await?;
                    }
                    None => {
                        return Err(PersistenceError::VersionConflict {
                            study_id: stored.id,
                            expected: read_version,
                            found: 0,
                        });
                    }
                    Some(row) => {
                        let tenant: String = row.try_get("tenant_id")?;
                        if tenant != stored.tenant_id.to_string() {
                            return Err(PersistenceError::TenantMismatch { id: stored.id });
                        }
                        let found: i64 = row.try_get("version")?;
                        return Err(PersistenceError::VersionConflict {
                            study_id: stored.id,
                            expected: read_version,
                            found: found as u64,
                        });
                    }
                }
            }

            debug!(study_id = %stored.id, version = stored.version, "Committed study");
            receipt.study_version = Some(stored.version);
        }

        if let Some(comparison) = changes.comparison {
            let read_version = comparison.version;
            let mut stored = comparison;
            stored.version = read_version + 1;
            let data = serde_json::to_string(&stored)?;

            let written = if read_version == 0 {
                // Loses quietly to an existing row for the same id or study.
                sqlx::query(
                    r#"
                    INSERT INTO scope_comparisons (id, tenant_id, study_id, status, version, data)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(stored.id.to_string())
                .bind(stored.tenant_id.to_string())
                .bind(stored.study_id.to_string())
                .bind(stored.status.to_string())
                .bind(stored.version as i64)
                .bind(&data)
                .execute(&mut *tx)
                .await?
            } else {
                sqlx::query(
                    r#"
                    UPDATE scope_comparisons
                    SET status = ?1, version = ?2, data = ?3, updated_at = datetime('now')
                    WHERE id = ?4 AND tenant_id = ?5 AND version = ?6
                    "#,
                )
                .bind(stored.status.to_string())
                .bind(stored.version as i64)
                .bind(&data)
                .bind(stored.id.to_string())
                .bind(stored.tenant_id.to_string())
                .bind(read_version as i64)
                .execute(&mut *tx)
                .await?
            };

            if written.rows_affected() == 0 {
                let existing = sqlx::query(
                    "SELECT tenant_id, version FROM scope_comparisons WHERE id = ?1 OR study_id = ?2",
                )
                .bind(stored.id.to_string())
                .bind(stored.study_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;

                let found = match existing {
                    Some(row) => {
                        let tenant: String = row.try_get("tenant_id")?;
                        if tenant != stored.tenant_id.to_string() {
                            return Err(PersistenceError::TenantMismatch { id: stored.id });
                        }
                        let found: i64 = row.try_get("version")?;
                        found as u64
                    }
                    None => 0,
                };
                return Err(PersistenceError::ComparisonConflict {
                    comparison_id: stored.id,
                    expected: read_version,
                    found,
                });
            }

            debug!(comparison_id = %stored.id, version = stored.version, status = %stored.status, "Committed scope comparison");
            receipt.comparison_version = Some(stored.version);
        }

        tx.commit().await?;
        Ok(receipt)
    }
}

#[async_trait]
impl ElementCountSource for SqliteWorkflowStore {
    async fn estimated_counts(
        &self,
        tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<Option<ElementCounts>, PersistenceError> {
        self.element_counts("estimated", tenant_id, study_id).await
    }

    async fn current_counts(
        &self,
        tenant_id: TenantId,
        study_id: Uuid,
    ) -> Result<ElementCounts, PersistenceError> {
        Ok(self
            .element_counts("current", tenant_id, study_id)
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl TenantPolicyProvider for SqliteWorkflowStore {
    async fn get_settings(
        &self,
        tenant_id: TenantId,
    ) -> Result<TenantScopeChangeSettings, PersistenceError> {
        let row = sqlx::query("SELECT data FROM tenant_scope_settings WHERE tenant_id = ?1")
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let data: String = row.try_get("data")?;
                Ok(serde_json::from_str(&data)?)
            }
            None => Ok(self.default_settings.clone()),
        }
    }
}
