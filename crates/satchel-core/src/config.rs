//! Configuration system for Satchel.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SATCHEL_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/satchel/config.toml
//!   3. ~/.config/satchel/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SatchelConfig {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub reassembly: ReassemblyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listen address.
    pub bind: String,
    /// UDP port.
    pub port: u16,
    /// Receive buffer size. Datagrams beyond this are truncated by the OS.
    pub max_datagram: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the directory-per-account mailbox store.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Transfers with no chunk activity for this long are evicted.
    pub idle_timeout_secs: u64,
    /// Chunks a single transfer may declare. The declared count sizes the
    /// slot table, so it is capped before allocation.
    pub max_chunks: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: wire::DEFAULT_PORT,
            max_datagram: wire::MAX_DATAGRAM,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("mail"),
        }
    }
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            max_chunks: 8192,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("satchel")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("satchel")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SatchelConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            SatchelConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SATCHEL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&SatchelConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply SATCHEL_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SATCHEL_NETWORK__BIND") {
            self.network.bind = v;
        }
        if let Ok(v) = std::env::var("SATCHEL_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Ok(v) = std::env::var("SATCHEL_NETWORK__MAX_DATAGRAM") {
            if let Ok(n) = v.parse() {
                self.network.max_datagram = n;
            }
        }
        if let Ok(v) = std::env::var("SATCHEL_STORAGE__ROOT") {
            self.storage.root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SATCHEL_REASSEMBLY__IDLE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.reassembly.idle_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SATCHEL_REASSEMBLY__MAX_CHUNKS") {
            if let Ok(n) = v.parse() {
                self.reassembly.max_chunks = n;
            }
        }
    }
}
