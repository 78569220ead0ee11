use anyhow::Result;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::scope::TenantScopeChangeSettings;

/// Main configuration structure for reserve-flow
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReserveFlowConfig {
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Stage notification queue
    pub notifications: NotificationConfig,
    /// Scope-change policy for tenants without their own settings
    pub scope_change: TenantScopeChangeSettings,
    /// Tenant policy cache
    pub policy_cache: PolicyCacheConfig,
    /// Database settings (optional)
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level, overridden by RUST_LOG
    pub log_level: String,
    /// Emit JSON logs instead of human-readable ones
    pub json_logs: bool,
    /// Enable metrics collection
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Notifications buffered before new ones are dropped
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyCacheConfig {
    pub ttl_seconds: u64,
    pub max_capacity: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

impl Default for PolicyCacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300, // 5 minutes
            max_capacity: 1000,
        }
    }
}

impl Default for ReserveFlowConfig {
    fn default() -> Self {
        Self {
            observability: ObservabilityConfig::default(),
            notifications: NotificationConfig::default(),
            scope_change: TenantScopeChangeSettings::default(),
            policy_cache: PolicyCacheConfig::default(),
            database: Some(DatabaseConfig {
                url: "sqlite://.reserve-flow/reserve-flow.db".to_string(),
                max_connections: 10,
                auto_migrate: true,
            }),
        }
    }
}

impl ReserveFlowConfig {
    /// Load configuration from the current directory with precedence:
    /// 1. Default values
    /// 2. Configuration files (reserve-flow.toml, .reserve-flow-rc)
    /// 3. Environment variables (RESERVE_FLOW_SECTION__KEY)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`load`](Self::load), reading configuration files from `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        let toml_file = dir.join("reserve-flow.toml");
        if toml_file.exists() {
            builder = builder.add_source(File::from(toml_file).format(FileFormat::Toml));
        }

        let rc_file = dir.join(".reserve-flow-rc");
        if rc_file.exists() {
            builder = builder.add_source(File::from(rc_file).format(FileFormat::Toml));
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("RESERVE_FLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<ReserveFlowConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = ReserveFlowConfig::load_env_file();
        ReserveFlowConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static ReserveFlowConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeChangeMode;

    #[test]
    fn test_defaults_are_safe() {
        let config = ReserveFlowConfig::default();
        assert_eq!(config.scope_change.mode, ScopeChangeMode::NoAction);
        assert!(config.notifications.queue_capacity > 0);
        assert_eq!(config.policy_cache.ttl_seconds, 300);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ReserveFlowConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[scope_change]"));
        let parsed: ReserveFlowConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
