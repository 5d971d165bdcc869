//! Configuration for the ledger service
//!
//! Read from a TOML file; every section and field is optional.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [storage]
//! enabled = true
//! path = "data/blockchain"
//!
//! [mining]
//! difficulty = 16
//! workers = 4
//! ```

use log::info;
use serde::Deserialize;
use thiserror::Error;

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "LEDGER_CONFIG";

/// Used when `LEDGER_CONFIG` is not set
pub const DEFAULT_CONFIG_PATH: &str = "ledger.toml";

/// Highest accepted difficulty in leading zero bits
pub const MAX_DIFFICULTY: u8 = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mining: MiningConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_data_dir")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MiningConfig {
    /// Leading zero bits required in a block hash
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
    /// Threads per mining search
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_enabled() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/blockchain")
}

fn default_difficulty() -> u8 {
    16
}

fn default_workers() -> usize {
    1
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            path: default_data_dir(),
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            workers: default_workers(),
        }
    }
}

impl Config {
    /// Loads the file named by `LEDGER_CONFIG`, or `ledger.toml`
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        Self::from_file(&path)
    }

    /// Loads `path`, falling back to defaults when the file does not exist
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("No configuration at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mining.workers == 0 {
            return Err(ConfigError::Invalid("mining.workers must be at least 1".to_string()));
        }

        if self.mining.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "mining.difficulty must be at most {}",
                MAX_DIFFICULTY
            )));
        }

        if self.storage.enabled && self.storage.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("storage.path must be set".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_file(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.mining.difficulty, 16);
        assert_eq!(config.mining.workers, 1);
        assert!(config.storage.enabled);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let file = write_config("[mining]\ndifficulty = 8\n");
        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.mining.difficulty, 8);
        assert_eq!(config.mining.workers, 1);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_full_file() {
        let file = write_config(
            r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [storage]
            enabled = false
            path = "/tmp/ledger"

            [mining]
            difficulty = 20
            workers = 4
            "#,
        );
        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert!(!config.storage.enabled);
        assert_eq!(config.storage.path, PathBuf::from("/tmp/ledger"));
        assert_eq!(config.mining.workers, 4);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let file = write_config("[mining]\nworkers = 0\n");
        assert!(matches!(Config::from_file(file.path()), Err(ConfigError::Invalid(_))));

        let file = write_config("[mining]\ndifficulty = 65\n");
        assert!(matches!(Config::from_file(file.path()), Err(ConfigError::Invalid(_))));

        let file = write_config("[mining\n");
        assert!(matches!(Config::from_file(file.path()), Err(ConfigError::Parse { .. })));
    }
}
