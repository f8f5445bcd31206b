//! Server configuration — parsed from TOML file + environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    /// General server settings
    #[serde(default)]
    pub server: ServerSection,

    /// Store backend settings
    #[serde(default)]
    pub store: StoreSection,
}

/// General server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Address the TCP listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Per-request deadline in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Volatile, for development and tests
    Memory,
    /// Durable SQLite database
    Sqlite,
}

/// Store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Database path (sqlite backend only)
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:7757".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_store_path() -> PathBuf {
    PathBuf::from("keymint.db")
}

impl ServerConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Apply `KEYMINT_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("KEYMINT_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(level) = std::env::var("KEYMINT_LOG_LEVEL") {
            self.server.log_level = level;
        }
        if let Ok(timeout) = std::env::var("KEYMINT_REQUEST_TIMEOUT_MS") {
            if let Ok(parsed) = timeout.parse() {
                self.server.request_timeout_ms = parsed;
            }
        }
        if let Ok(backend) = std::env::var("KEYMINT_STORE_BACKEND") {
            match backend.as_str() {
                "memory" => self.store.backend = StoreBackend::Memory,
                "sqlite" => self.store.backend = StoreBackend::Sqlite,
                other => log::warn!("Ignoring unknown KEYMINT_STORE_BACKEND: {other}"),
            }
        }
        if let Ok(path) = std::env::var("KEYMINT_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
    }

    /// Check the configuration before the daemon starts.
    pub fn validate(&self) -> Result<()> {
        self.server
            .listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid listen_addr: {}", self.server.listen_addr))?;
        anyhow::ensure!(
            self.server.request_timeout_ms > 0,
            "request_timeout_ms must be positive"
        );
        if self.store.backend == StoreBackend::Sqlite {
            anyhow::ensure!(
                !self.store.path.as_os_str().is_empty(),
                "store.path must be set for the sqlite backend"
            );
        }
        Ok(())
    }
}
