//! Configuration loading and data folder resolution
//!
//! Priority order for every setting:
//! 1. Command-line argument (applied by the binary)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the data folder
pub const DATA_FOLDER_ENV: &str = "ROSTER_DATA_FOLDER";

/// Environment variable overriding the bind address
pub const BIND_ADDR_ENV: &str = "ROSTER_BIND_ADDR";

/// Engine configuration
///
/// Every field has a default so a partial TOML file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Folder holding the SQLite database
    pub data_folder: PathBuf,
    /// Database file name inside `data_folder`
    pub database_file: String,
    /// HTTP listen address
    pub bind_addr: String,
    /// Maximum entries kept in a student's processed-event ledger
    pub ledger_capacity: usize,
    /// Session cap used when a class has no total-session cap of its own
    pub default_session_cap: u32,
    /// Compare-and-set attempts for one balance write before giving up
    pub balance_retry_limit: u32,
    /// Buffered events per EventBus subscriber
    pub event_bus_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_folder: default_data_folder(),
            database_file: "roster.db".to_string(),
            bind_addr: "127.0.0.1:5780".to_string(),
            ledger_capacity: 100,
            default_session_cap: 48,
            balance_retry_limit: 5,
            event_bus_capacity: 1000,
        }
    }
}

impl EngineConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration
    ///
    /// An explicitly requested file must exist. Without one, the platform config
    /// file is used when present; a missing file is not fatal and yields defaults.
    /// Environment overrides are applied last.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
                })?;
                info!("Loaded configuration from {}", path.display());
                Self::from_toml_str(&content)?
            }
            None => match default_config_file() {
                Some(path) if path.exists() => {
                    let content = std::fs::read_to_string(&path)?;
                    info!("Loaded configuration from {}", path.display());
                    Self::from_toml_str(&content)?
                }
                _ => {
                    warn!("No config file found, using compiled defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(folder) = std::env::var(DATA_FOLDER_ENV) {
            if !folder.trim().is_empty() {
                self.data_folder = PathBuf::from(folder);
            }
        }
        if let Ok(addr) = std::env::var(BIND_ADDR_ENV) {
            if !addr.trim().is_empty() {
                self.bind_addr = addr;
            }
        }
    }

    /// Full path of the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        self.data_folder.join(&self.database_file)
    }

    fn validate(&self) -> Result<()> {
        if self.ledger_capacity == 0 {
            return Err(Error::Config("ledger_capacity must be at least 1".to_string()));
        }
        if self.balance_retry_limit == 0 {
            return Err(Error::Config("balance_retry_limit must be at least 1".to_string()));
        }
        if self.database_file.trim().is_empty() {
            return Err(Error::Config("database_file must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Platform config file (`<config dir>/roster/config.toml`)
fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("roster").join("config.toml"))
}

/// Get OS-dependent default data folder
fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("roster"))
        .unwrap_or_else(|| PathBuf::from("./roster_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.ledger_capacity, 100);
        assert_eq!(config.database_file, "roster.db");
        assert!(config.database_path().ends_with("roster.db"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str("bind_addr = \"0.0.0.0:9000\"\n").unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.ledger_capacity, 100);
    }

    #[test]
    fn test_zero_ledger_capacity_rejected() {
        let err = EngineConfig::from_toml_str("ledger_capacity = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(EngineConfig::from_toml_str("ledger_capacity = \"many\"").is_err());
    }
}
