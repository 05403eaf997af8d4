//! Configuration module
//!
//! Handles loading and saving MessageU client configuration, and the two
//! small files the client keeps next to it: the server address and the
//! registered identity.

mod storage;

pub use storage::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid server info in {path}: {reason}")]
    InvalidServerInfo { path: PathBuf, reason: String },

    #[error("Invalid identity file {path}: {reason}")]
    InvalidIdentity { path: PathBuf, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// File locations
    #[serde(default)]
    pub files: FilesConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Locations of the server address and identity files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// File holding "host:port"
    #[serde(default = "default_server_info")]
    pub server_info: PathBuf,
    /// File holding the registered username, identity and private key
    #[serde(default = "default_identity")]
    pub identity: PathBuf,
}

fn default_server_info() -> PathBuf {
    PathBuf::from("server.info")
}

fn default_identity() -> PathBuf {
    PathBuf::from("me.info")
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            server_info: default_server_info(),
            identity: default_identity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("messageu/config.toml")),
            Some(PathBuf::from("./messageu.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        files: FilesConfig {
            server_info: PathBuf::from("/etc/messageu/server.info"),
            identity: dirs::home_dir()
                .map(|home| home.join(".messageu/me.info"))
                .unwrap_or_else(default_identity),
        },
        logging: LoggingConfig {
            level: "messageu=debug".to_string(),
        },
    };

    Ok(toml::to_string_pretty(&config)?)
}
