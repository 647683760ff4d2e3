//! Configuration for the filedepot upload gateway

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Base URL of the web UI, used as the target of upload redirects
    #[serde(default = "default_service_url")]
    pub service_url: String,

    /// Base URL of the repository backend RPC service
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Directory where file payloads are spooled while a request is in flight
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Maximum accepted file size in bytes
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8082".parse().unwrap()
}

fn default_service_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8083".to_string()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("/tmp/filedepot")
}

fn default_max_upload_size() -> u64 {
    100 * 1024 * 1024 // 100MB
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            service_url: default_service_url(),
            rpc_url: default_rpc_url(),
            temp_dir: default_temp_dir(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.normalize();
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("FILEDEPOT_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }
        if let Ok(url) = std::env::var("FILEDEPOT_SERVICE_URL") {
            config.service_url = url;
        }
        if let Ok(url) = std::env::var("FILEDEPOT_RPC_URL") {
            config.rpc_url = url;
        }
        if let Ok(dir) = std::env::var("FILEDEPOT_TEMP_DIR") {
            config.temp_dir = PathBuf::from(dir);
        }
        if let Ok(size) = std::env::var("FILEDEPOT_MAX_UPLOAD_SIZE") {
            if let Ok(parsed) = size.parse() {
                config.max_upload_size = parsed;
            }
        }

        config.normalize();
        config
    }

    /// Load configuration: `filedepot.toml` in the working directory if
    /// present, environment variables otherwise.
    pub fn load() -> Self {
        Self::from_file("filedepot.toml").unwrap_or_else(|_| Self::from_env())
    }

    /// Redirect URLs are built by appending paths to `service_url`, so the
    /// stored value must not end with a slash.
    fn normalize(&mut self) {
        while self.service_url.ends_with('/') {
            self.service_url.pop();
        }
        while self.rpc_url.ends_with('/') {
            self.rpc_url.pop();
        }
    }
}
