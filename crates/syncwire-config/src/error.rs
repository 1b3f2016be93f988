//! Errors raised while locating, reading or checking configuration.

use std::path::PathBuf;

use syncwire_types::Method;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} is not valid syncwire TOML: {source}", path.display())]
    Malformed {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A setting holds a value no engine component accepts.
    #[error("invalid `{key}`: {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    /// Reads have no echo, so they cannot arm suppression.
    #[error("`echo.locked_methods` lists read method '{0}'")]
    ReadMethodLocked(Method),

    #[error("no home directory to place the user config in")]
    NoHomeDirectory,
}
