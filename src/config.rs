//! Client configuration.
//!
//! Loaded from `config.toml` in the platform config directory. Every key is
//! optional:
//!
//! ```toml
//! base_url = "https://api.example.com"
//! auth_path = "/v1/auth"
//! expiry_horizon = "30s"
//! request_timeout = "30s"
//! login_route = "/auth"
//! storage = "file"                      # file | keyring | memory
//! on_transient_refresh_failure = "clear" # clear | keep
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_AUTH_PATH;
use crate::auth::coordinator::TransientRefreshPolicy;
use crate::auth::lifecycle::DEFAULT_LOGIN_ROUTE;
use crate::auth::storage::{FileStore, KeyringStore, MemoryStore, SessionStore};
use crate::auth::token::DEFAULT_EXPIRY_HORIZON;
use crate::error::{PelotonError, PelotonResult};

/// Backend used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Where the session tokens are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON file per backend origin in the data directory.
    #[default]
    File,
    /// OS keychain.
    Keyring,
    /// Process memory; nothing survives exit.
    Memory,
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub auth_path: String,
    #[serde(with = "humantime_serde")]
    pub expiry_horizon: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub login_route: String,
    pub storage: StorageBackend,
    pub on_transient_refresh_failure: TransientRefreshPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_path: DEFAULT_AUTH_PATH.to_string(),
            expiry_horizon: DEFAULT_EXPIRY_HORIZON,
            request_timeout: Duration::from_secs(30),
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
            storage: StorageBackend::default(),
            on_transient_refresh_failure: TransientRefreshPolicy::default(),
        }
    }
}

impl Config {
    /// Loads the configuration at `path`, falling back to defaults if the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Returns the default config path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf> {
        let dir = crate::util::get_config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(dir.join("config.toml"))
    }

    /// Checks values that would otherwise fail on first use.
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first invalid key.
    pub fn validate(&self) -> PelotonResult<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| PelotonError::config(format!("base_url '{}': {e}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PelotonError::config(format!(
                "base_url '{}' must use http or https",
                self.base_url
            )));
        }
        if !self.auth_path.starts_with('/') {
            return Err(PelotonError::config(format!(
                "auth_path '{}' must start with '/'",
                self.auth_path
            )));
        }
        if !self.login_route.starts_with('/') {
            return Err(PelotonError::config(format!(
                "login_route '{}' must start with '/'",
                self.login_route
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(PelotonError::config("request_timeout must be positive"));
        }
        Ok(())
    }

    /// Opens the configured session store for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store location cannot be determined.
    pub fn open_store(&self) -> PelotonResult<Arc<dyn SessionStore>> {
        Ok(match self.storage {
            StorageBackend::File => Arc::new(FileStore::for_origin(&self.base_url)?),
            StorageBackend::Keyring => Arc::new(KeyringStore::for_origin(&self.base_url)?),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        })
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
