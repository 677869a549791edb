//! Configuration module
//!
//! TOML file with `[general]`, `[network]` and `[routes]` sections. Every
//! section and field is optional.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::{RouteDictionary, DEFAULT_PORT};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Network settings
    #[serde(default)]
    pub network: NetworkSettings,

    /// Route name -> code table used for route compression
    #[serde(default)]
    pub routes: BTreeMap<String, u16>,
}

/// `[general]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Stable identity in the cluster; a random one is used when unset
    pub server_id: Option<String>,
    pub name: String,
    /// Kind of server, e.g. "connector" or "chat"
    pub server_type: String,
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        let name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            server_id: None,
            name,
            server_type: "game".to_string(),
            verbose: false,
        }
    }
}

/// `[network]` section; see `network::NetworkConfig` for the runtime form
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub port: u16,
    /// All interfaces when unset
    pub bind_address: Option<String>,
    pub connect_timeout_ms: u64,
    /// Bytes requested per read
    pub read_buffer_size: usize,
    pub push_queue_capacity: usize,
    /// Capacity of completion queues allocated per call
    pub done_queue_capacity: usize,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: None,
            connect_timeout_ms: 5000,
            read_buffer_size: 512,
            push_queue_capacity: 2 << 10,
            done_queue_capacity: 10,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Io(e),
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Parse configuration from TOML text
    pub fn parse(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Candidate files, most specific first
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(3);
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("gamewire").join("config.toml"));
        }
        paths.push(PathBuf::from("./gamewire.toml"));
        paths.push(PathBuf::from("./config.toml"));
        paths
    }

    /// Load the first existing default file, or the built-in defaults
    pub fn load_default() -> ConfigResult<Self> {
        match Self::default_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => {
                tracing::debug!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Write as pretty TOML, creating parent directories
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Configured server id, or a fresh random one
    pub fn server_id(&self) -> String {
        match &self.general.server_id {
            Some(id) => id.clone(),
            None => uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Build the route dictionary from the `[routes]` table
    pub fn route_dictionary(&self) -> RouteDictionary {
        RouteDictionary::from_table(self.routes.iter().map(|(route, code)| (route, *code)))
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            server_id: Some("connector-1".to_string()),
            name: "Connector 1".to_string(),
            server_type: "connector".to_string(),
            verbose: false,
        },
        routes: [
            ("onChat", 1),
            ("onAdd", 2),
            ("onLeave", 3),
            ("chat.chatHandler.send", 4),
        ]
        .into_iter()
        .map(|(route, code)| (route.to_string(), code))
        .collect(),
        ..Default::default()
    };

    config.to_toml()
}
