//! Configuration for the UCP server and client.
//!
//! Resolution order: defaults → config file → environment variables.
//! Command-line flags are applied on top by each binary.
//!
//! Config file location:
//!   1. $UCP_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ucp/config.toml
//!   3. ~/.config/ucp/config.toml

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::wire::DEFAULT_PORT;

/// Top-level configuration. Built once at startup and passed by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UcpConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the server listens on.
    pub listen_addr: SocketAddr,
    /// Holds the server's private-key.pem and public-key.
    pub ucp_directory: PathBuf,
    /// Helper binary spawned once per transfer. Bare names are looked up
    /// on PATH.
    pub helper_program: PathBuf,
    /// Where rendezvous sockets are created.
    pub socket_dir: PathBuf,
    /// How long to wait for a helper to connect back.
    pub helper_connect_timeout_secs: u64,
    /// Shadow password database used for password fallback.
    pub shadow_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address. Empty = must be given on the command line.
    pub host: String,
    pub port: u16,
    /// Holds the client's private-key.pem and public-key.
    pub ucp_directory: PathBuf,
    /// Remote account name. None = the current local account.
    pub user: Option<String>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            ucp_directory: PathBuf::from("/etc/ucp"),
            helper_program: PathBuf::from("ucp-proxy"),
            socket_dir: std::env::temp_dir(),
            helper_connect_timeout_secs: 10,
            shadow_path: PathBuf::from("/etc/shadow"),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            ucp_directory: home_dir().join(".ucp"),
            user: None,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("ucp")
}

fn home_dir() -> PathBuf {
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

impl UcpConfig {
    /// Load config: file (if present) → defaults, then env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Read one config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(UcpConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("UCP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config to `path` if nothing is there. Returns the path.
    pub fn write_default_if_missing(path: &Path) -> Result<PathBuf, ConfigError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
            }
            let text = toml::to_string_pretty(&UcpConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        Ok(path.to_path_buf())
    }

    /// Apply UCP_* overrides. `lookup` is `std::env::var` in production.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("UCP_SERVER_DIRECTORY") {
            self.server.ucp_directory = PathBuf::from(v);
        }
        if let Some(v) = lookup("UCP_HOST") {
            self.client.host = v;
        }
        if let Some(v) = lookup("UCP_PORT") {
            match v.parse() {
                Ok(p) => self.client.port = p,
                Err(_) => tracing::warn!(value = %v, "ignoring unparseable UCP_PORT"),
            }
        }
        if let Some(v) = lookup("UCP_DIRECTORY") {
            self.client.ucp_directory = PathBuf::from(v);
        }
        if let Some(v) = lookup("UCP_USER") {
            self.client.user = Some(v);
        }
    }
}
