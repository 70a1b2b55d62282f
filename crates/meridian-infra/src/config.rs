//! Configuration for the resource manager.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use meridian_store::{NodeSourceStore, PostgresStore};

use crate::error::{InfraError, InfraResult};

/// Top-level configuration for the resource manager.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ManagerConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Node recovery configuration.
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Node removal configuration.
    #[serde(default)]
    pub removal: RemovalConfig,
}

impl ManagerConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources
    /// override earlier):
    /// 1. Default values
    /// 2. `meridian.toml` in the current directory (if present)
    /// 3. Environment variables with `MERIDIAN_` prefix
    pub fn load() -> InfraResult<Self> {
        Figment::new()
            .merge(Toml::file("meridian.toml"))
            .merge(Env::prefixed("MERIDIAN_").split("__"))
            .extract()
            .map_err(|e| InfraError::Configuration(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> InfraResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MERIDIAN_").split("__"))
            .extract()
            .map_err(|e| InfraError::Configuration(e.to_string()))
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/meridian".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

impl DatabaseConfig {
    /// Open a PostgreSQL-backed node-source store from this configuration.
    pub async fn open_store(&self) -> InfraResult<std::sync::Arc<dyn NodeSourceStore>> {
        let store = PostgresStore::with_options(
            &self.url,
            self.max_connections,
            std::time::Duration::from_secs(self.connect_timeout_secs),
        )
        .await
        .map_err(InfraError::from)?;

        Ok(std::sync::Arc::new(store))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Node recovery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Whether persisted node URLs are reconciled against live
    /// registration traffic after a restart instead of discarded.
    #[serde(default = "default_nodes_recoverable")]
    pub nodes_recoverable: bool,
}

const fn default_nodes_recoverable() -> bool {
    true
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            nodes_recoverable: default_nodes_recoverable(),
        }
    }
}

/// Node removal configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RemovalConfig {
    /// Grace delay in seconds before a removed node's infrastructure
    /// resource is considered released.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

const fn default_grace_secs() -> u64 {
    5
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
        }
    }
}
