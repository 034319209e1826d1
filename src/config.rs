//! Runtime configuration, loadable from TOML.
//!
//! ```toml
//! [remote]
//! base_url = "https://api.example.com/v1"
//! timeout_ms = 30000
//!
//! [local]
//! kind = "file"
//! path = "/data/app/local_store.json"
//!
//! [secure]
//! kind = "keyring"
//! service = "com.example.app"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::storage::{LocalBackend, SecureBackend};

pub const DEFAULT_APP_ID: &str = "app-datasource";
const LOCAL_STORE_FILE: &str = "local_store.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Whole-request timeout, including reading the body.
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub user_agent: String,
    pub cookies: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout_ms: 30_000,
            connect_timeout_ms: 15_000,
            user_agent: concat!("app-datasource/", env!("CARGO_PKG_VERSION")).to_string(),
            cookies: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub local: LocalBackend,
    pub secure: SecureBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            local: LocalBackend::File {
                path: data_dir(DEFAULT_APP_ID).join(LOCAL_STORE_FILE),
            },
            secure: SecureBackend::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Everything in memory. Nothing touches disk or the OS keychain.
    pub fn in_memory(remote: RemoteConfig) -> Self {
        Self {
            remote,
            local: LocalBackend::Memory,
            secure: SecureBackend::Memory,
        }
    }
}

/// Per-app data directory, falling back to the working directory when the
/// platform reports none.
pub fn data_dir(app_id: &str) -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(app_id)
}
