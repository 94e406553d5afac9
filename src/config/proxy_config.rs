//! tonproxy configuration file handling
//!
//! Loads ~/.config/tonproxy/config.yaml, falling back to defaults when the
//! file is absent, then applies environment overrides.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-client request throttling for the proxy's own HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_max_requests() -> u32 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// Upstream TonAPI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TonApiConfig {
    #[serde(default = "default_tonapi_url")]
    pub url: String,

    /// Bearer token; usually supplied through `TONAPI_KEY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tonapi_url() -> String {
    tonapi::DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for TonApiConfig {
    fn default() -> Self {
        Self {
            url: default_tonapi_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TonApiConfig {
    pub fn client_config(&self) -> tonapi::ClientConfig {
        tonapi::ClientConfig {
            base_url: self.url.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// SQLite storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Enable WAL mode for better concurrency
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

fn default_db_path() -> PathBuf {
    let mut path = config_dir();
    path.push("tonproxy.db");
    path
}

fn default_wal_mode() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

/// Transaction-history paging defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Page size used when the caller gives none
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Page index used when the caller gives none
    #[serde(default)]
    pub page: usize,

    /// Events requested from upstream per fetch
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,

    /// Largest page size a caller may request
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Only fetch events initiated by the account itself
    #[serde(default)]
    pub initiator_only: bool,
}

fn default_limit() -> usize {
    10
}

fn default_fetch_batch_size() -> usize {
    100
}

fn default_max_limit() -> usize {
    100
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            page: 0,
            fetch_batch_size: default_fetch_batch_size(),
            max_limit: default_max_limit(),
            initiator_only: false,
        }
    }
}

/// tonproxy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub tonapi: TonApiConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub pagination: PaginationConfig,
}

impl ProxyConfig {
    /// Load from the default path, or defaults if no file exists
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::ProxyError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading tonproxy configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;

        tracing::debug!(
            port = config.server.port,
            tonapi = %config.tonapi.url,
            fetch_batch_size = config.pagination.fetch_batch_size,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving tonproxy configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Override values from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Override values from an arbitrary variable lookup
    ///
    /// Recognised: `TONAPI_URL`, `TONAPI_KEY`, `PORT`, `TONPROXY_DB`.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TONAPI_URL").filter(|v| !v.is_empty()) {
            self.tonapi.url = url;
        }
        if let Some(key) = lookup("TONAPI_KEY").filter(|v| !v.is_empty()) {
            self.tonapi.api_key = Some(key);
        }
        if let Some(port) = lookup("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid PORT"),
            }
        }
        if let Some(db) = lookup("TONPROXY_DB").filter(|v| !v.is_empty()) {
            self.storage.path = PathBuf::from(db);
        }
    }

    /// Get the default config path (~/.config/tonproxy/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = config_dir();
        path.push("config.yaml");
        path
    }
}

/// ~/.config/tonproxy, used on every platform for consistency
fn config_dir() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("tonproxy");
    path
}
