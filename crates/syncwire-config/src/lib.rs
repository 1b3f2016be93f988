//! Configuration management for syncwire
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (SYNCWIRE_* prefix, `__` between section and key)
//! 2. syncwire.local.toml (gitignored, local overrides)
//! 3. syncwire.toml (git-tracked, project config)
//! 4. ~/.config/syncwire/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use syncwire_types::Method;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main syncwire configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub adapter: AdapterConfig,
    pub queue: QueueConfig,
    pub statistics: StatisticsConfig,
    pub socket: SocketConfig,
    pub echo: EchoConfig,
    pub naming: NamingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Issue `patch` instead of `update` for record updates.
    pub update_uses_patch: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Serialize outbound calls: one in flight at a time, FIFO.
    pub queue_method_calls: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    pub collect_statistics: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub url: String,
    pub timeout_ms: u64,
    /// Opaque options handed to the transport untouched.
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3030".to_string(),
            timeout_ms: 10_000,
            options: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Write methods whose successful completion arms echo suppression.
    pub locked_methods: Vec<Method>,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            locked_methods: vec![Method::Create, Method::Remove],
        }
    }
}

impl EchoConfig {
    /// Returns true if a successful `method` call should arm suppression.
    ///
    /// Methods without an echo kind never lock, even when listed.
    pub fn locks(&self, method: Method) -> bool {
        method.echo_kind().is_some() && self.locked_methods.contains(&method)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    /// Extra `singular = plural` pairs for the type/service naming convention.
    pub irregular: BTreeMap<String, String>,
}

impl SyncConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Configuration with call queueing and statistics switched on.
    pub fn sequenced() -> Self {
        Self {
            queue: QueueConfig {
                queue_method_calls: true,
            },
            statistics: StatisticsConfig {
                collect_statistics: true,
            },
            ..Default::default()
        }
    }

    /// Checks invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket.url.trim().is_empty() {
            return Err(ConfigError::InvalidSetting {
                key: "socket.url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.socket.timeout_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "socket.timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if let Some(read) = self.echo.locked_methods.iter().find(|m| !m.is_write()) {
            return Err(ConfigError::ReadMethodLocked(*read));
        }
        Ok(())
    }
}
