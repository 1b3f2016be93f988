//! Configuration loader with multi-source merging

use crate::{ConfigError, Paths, SyncConfig};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    include_user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "SYNCWIRE".to_string(),
            include_user_config: true,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "SYNCWIRE")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/syncwire/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.include_user_config = false;
        self
    }

    /// TOML files to merge, lowest precedence first. Missing files are skipped.
    fn file_sources(&self) -> Vec<PathBuf> {
        let user = self
            .include_user_config
            .then(|| Paths::new().user_config_file().ok())
            .flatten();
        user.into_iter()
            .chain([
                Paths::project_config_file(&self.project_dir),
                Paths::local_config_file(&self.project_dir),
            ])
            .filter(|path| path.exists())
            .collect()
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<SyncConfig> {
        let defaults = SyncConfig::default();
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&defaults)?);

        // User file, then syncwire.toml, then syncwire.local.toml
        for path in self.file_sources() {
            builder = builder.add_source(
                config::File::from(path)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // Environment wins (SYNCWIRE_QUEUE__QUEUE_METHOD_CALLS=true)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("echo.locked_methods"),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let sync_config: SyncConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        sync_config
            .validate()
            .context("Configuration failed validation")?;

        Ok(sync_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> SyncConfig {
        self.load().unwrap_or_default()
    }

    /// Parse a single TOML file without merging any other source.
    pub fn load_file(path: impl AsRef<Path>) -> Result<SyncConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: SyncConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        parsed.validate()?;
        Ok(parsed)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
