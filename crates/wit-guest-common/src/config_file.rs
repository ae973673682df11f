//! Configuration file structures for wit-guest.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ImportEntry`]: Host-owned resource pre-declared for the audit

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{AuditConfig, HostConfig};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [host]
/// handle_mode = "integer"
/// max_handles = 1024
/// destructor_timing = "immediate"
///
/// [audit]
/// iterations = 4
/// payload = "hello"
///
/// [[imports]]
/// name = "logger"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// In-process host configuration.
    #[serde(default)]
    pub host: HostConfig,

    /// Lifecycle audit configuration.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Host-owned resources the audit imports and releases.
    #[serde(default)]
    pub imports: Vec<ImportEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigFileError> {
        if self.host.max_handles == 0 {
            return Err(ConfigFileError::Invalid {
                reason: "host.max_handles must be at least 1".into(),
            });
        }
        if let Some(entry) = self.imports.iter().find(|e| e.name.is_empty()) {
            return Err(ConfigFileError::Invalid {
                reason: format!("import entry has an empty name: {entry:?}"),
            });
        }
        Ok(())
    }
}

/// A host-owned resource declared in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImportEntry {
    /// Label the host stores with the resource.
    pub name: String,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },

    /// The file parsed but holds unusable values.
    #[error("Invalid config file: {reason}")]
    Invalid { reason: String },
}
