//! Client configuration
//!
//! Read from TOML at an explicit path, or `config.toml` in the platform
//! config directory. A missing file means defaults.

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::network::{SyncConfig, VoiceConfig};
use crate::reconcile::ReconcilePolicy;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub feed: FeedConfig,
    pub client: ClientConfig,
}

/// Server connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host name or IP of the server
    pub server_address: String,
    /// Session sync port; voice uses the next port up
    pub sync_port: u16,
    pub connect_timeout_secs: u64,
    pub keepalive_secs: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            sync_port: 5002,
            connect_timeout_secs: 10,
            keepalive_secs: 60,
            reconnect_delay_ms: 2000,
        }
    }
}

impl NetworkConfig {
    fn resolve(&self, port: u16) -> Result<SocketAddr, ConfigError> {
        let target = format!("{}:{}", self.server_address, port);
        target
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConfigError::Parse {
                path: "network.server_address".to_string(),
                message: format!("cannot resolve {}", target),
            })
    }

    pub fn sync_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.resolve(self.sync_port)
    }

    pub fn voice_port(&self) -> Result<u16, ConfigError> {
        self.sync_port.checked_add(1).ok_or_else(|| ConfigError::Invalid {
            field: "network.sync_port".to_string(),
            message: format!("{} leaves no room for the voice port", self.sync_port),
        })
    }

    pub fn voice_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.resolve(self.voice_port()?)
    }

    /// Reject values that cannot describe a usable server
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_port == 0 {
            return Err(ConfigError::Invalid {
                field: "network.sync_port".to_string(),
                message: "port 0 is not a server port".to_string(),
            });
        }
        self.voice_port().map(|_| ())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn voice(&self) -> Result<VoiceConfig, ConfigError> {
        Ok(VoiceConfig {
            server: self.voice_addr()?,
            connect_timeout: self.connect_timeout(),
            keepalive_interval: Duration::from_secs(self.keepalive_secs),
            reconnect_delay: self.reconnect_delay(),
        })
    }
}

/// Local simulator feed ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub snapshot_port: u16,
    pub los_result_port: u16,
    pub los_request_port: u16,
    pub broadcast_ports: Vec<u16>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            snapshot_port: 9084,
            los_result_port: 9086,
            los_request_port: 9087,
            broadcast_ports: vec![7080, 7082],
        }
    }
}

/// Local participant and policy toggles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub name: String,
    pub coalition: i32,
    pub always_allow_hotas_controls: bool,
    pub allow_simulator_ptt: bool,
    pub auto_select_preset_channel: bool,
    pub external_mode_password: Option<String>,
    pub channel_file: Option<PathBuf>,
    /// Directory holding per-radio preset lists
    pub preset_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            coalition: 0,
            always_allow_hotas_controls: false,
            allow_simulator_ptt: true,
            auto_select_preset_channel: true,
            external_mode_password: None,
            channel_file: None,
            preset_dir: None,
        }
    }
}

impl ClientConfig {
    pub fn policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            always_allow_hotas_controls: self.always_allow_hotas_controls,
            allow_simulator_ptt: self.allow_simulator_ptt,
            auto_select_preset_channel: self.auto_select_preset_channel,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or the default location when None
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => {
                    tracing::warn!("No configuration directory, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })?;
        config.network.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "simradio").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn sync(&self) -> Result<SyncConfig, ConfigError> {
        Ok(SyncConfig {
            server: self.network.sync_addr()?,
            connect_timeout: self.network.connect_timeout(),
            reconnect_delay: self.network.reconnect_delay(),
            external_mode_password: self.client.external_mode_password.clone(),
            channel_file: self.client.channel_file.clone(),
        })
    }
}
