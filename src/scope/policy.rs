// Tenant scope-change policy lookup

use async_trait::async_trait;
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use super::types::TenantScopeChangeSettings;
use crate::config::{PolicyCacheConfig, ReserveFlowConfig};
use crate::persistence::PersistenceError;
use crate::workflows::TenantId;

/// Source of per-tenant scope-change settings.
///
/// Unconfigured tenants get a safe default (`NoAction`), never an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantPolicyProvider: Send + Sync {
    async fn get_settings(
        &self,
        tenant_id: TenantId,
    ) -> Result<TenantScopeChangeSettings, PersistenceError>;
}

/// Settings held in memory, typically built from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicyProvider {
    default: TenantScopeChangeSettings,
    tenants: HashMap<TenantId, TenantScopeChangeSettings>,
}

impl StaticPolicyProvider {
    pub fn new(default: TenantScopeChangeSettings) -> Self {
        Self {
            default,
            tenants: HashMap::new(),
        }
    }

    /// Serve the configured `scope_change` settings to every tenant.
    pub fn from_config(config: &ReserveFlowConfig) -> Self {
        Self::new(config.scope_change.clone())
    }

    pub fn with_tenant(mut self, tenant_id: TenantId, settings: TenantScopeChangeSettings) -> Self {
        self.tenants.insert(tenant_id, settings);
        self
    }
}

#[async_trait]
impl TenantPolicyProvider for StaticPolicyProvider {
    async fn get_settings(
        &self,
        tenant_id: TenantId,
    ) -> Result<TenantScopeChangeSettings, PersistenceError> {
        Ok(self
            .tenants
            .get(&tenant_id)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}

/// Caches another provider's answers per tenant for a fixed TTL.
pub struct CachedPolicyProvider {
    inner: Arc<dyn TenantPolicyProvider>,
    cache: Cache<TenantId, TenantScopeChangeSettings>,
}

impl CachedPolicyProvider {
    pub fn new(inner: Arc<dyn TenantPolicyProvider>, ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { inner, cache }
    }

    pub fn from_config(inner: Arc<dyn TenantPolicyProvider>, config: &PolicyCacheConfig) -> Self {
        Self::new(
            inner,
            Duration::from_secs(config.ttl_seconds),
            config.max_capacity,
        )
    }

    /// Drop the cached settings for a tenant after its policy changed.
    pub async fn invalidate(&self, tenant_id: TenantId) {
        self.cache.invalidate(&tenant_id).await;
    }
}

#[async_trait]
impl TenantPolicyProvider for CachedPolicyProvider {
    async fn get_settings(
        &self,
        tenant_id: TenantId,
    ) -> Result<TenantScopeChangeSettings, PersistenceError> {
        if let Some(settings) = self.cache.get(&tenant_id).await {
            debug!(tenant_id = %tenant_id, "Scope policy cache hit");
            return Ok(settings);
        }

        // Errors are not cached; the next call retries the inner provider.
        let settings = self.inner.get_settings(tenant_id).await?;
        self.cache.insert(tenant_id, settings.clone()).await;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeChangeMode;

    #[test]
    fn test_unknown_tenant_gets_default() {
        tokio_test::block_on(async {
            let known = TenantId::new();
            let provider = StaticPolicyProvider::from_config(&ReserveFlowConfig::default()).with_tenant(
                known,
                TenantScopeChangeSettings {
                    mode: ScopeChangeMode::TwoPhase,
                    ..Default::default()
                },
            );

            let settings = provider.get_settings(TenantId::new()).await.unwrap();
            assert_eq!(settings.mode, ScopeChangeMode::NoAction);
            let settings = provider.get_settings(known).await.unwrap();
            assert_eq!(settings.mode, ScopeChangeMode::TwoPhase);
        });
    }

    #[tokio::test]
    async fn test_cache_hits_inner_once() {
        let mut inner = MockTenantPolicyProvider::new();
        inner.expect_get_settings().times(1).returning(|_| {
            Ok(TenantScopeChangeSettings {
                mode: ScopeChangeMode::VarianceWithAmendment,
                ..Default::default()
            })
        });
        let cached = CachedPolicyProvider::from_config(Arc::new(inner), &PolicyCacheConfig::default());
        let tenant = TenantId::new();

        for _ in 0..3 {
            let settings = cached.get_settings(tenant).await.unwrap();
            assert_eq!(settings.mode, ScopeChangeMode::VarianceWithAmendment);
        }
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let mut inner = MockTenantPolicyProvider::new();
        let mut seq = mockall::Sequence::new();
        inner
            .expect_get_settings()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(PersistenceError::StateCorruption {
                    reason: "bad row".into(),
                })
            });
        inner
            .expect_get_settings()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(TenantScopeChangeSettings::default()));
        let cached = CachedPolicyProvider::new(Arc::new(inner), Duration::from_secs(60), 10);
        let tenant = TenantId::new();

        assert!(cached.get_settings(tenant).await.is_err());
        assert!(cached.get_settings(tenant).await.is_ok());
    }
}
