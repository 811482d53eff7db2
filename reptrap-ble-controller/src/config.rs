//! Controller configuration, stored as `$REPTRAP_HOME/config.json`

use std::path::{Path, PathBuf};
use std::time::Duration;

use reptrap_proto::{ble, chunk_size_for_mtu};
use uuid::Uuid;

/// How the session finds its peripheral
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PeripheralIdentity {
    /// A fixed platform identifier: the bluetooth address on Linux and
    /// Windows, the CoreBluetooth UUID on Apple platforms
    Fixed { id: String },
    /// First peripheral seen advertising one of these services
    Discover { services: Vec<Uuid> },
}

impl PeripheralIdentity {
    pub fn fixed(id: impl Into<String>) -> Self {
        PeripheralIdentity::Fixed { id: id.into() }
    }

    /// Scan for the trap service
    pub fn discover() -> Self {
        PeripheralIdentity::Discover {
            services: vec![ble::SERVICE_UUID],
        }
    }
}

impl Default for PeripheralIdentity {
    fn default() -> Self {
        if cfg!(any(target_os = "macos", target_os = "ios")) {
            PeripheralIdentity::fixed(ble::DEFAULT_DEVICE_UUID)
        } else {
            PeripheralIdentity::fixed(ble::DEFAULT_DEVICE_ADDRESS)
        }
    }
}

impl std::fmt::Display for PeripheralIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeripheralIdentity::Fixed { id } => write!(f, "device {id}"),
            PeripheralIdentity::Discover { services } => {
                let services: Vec<String> = services.iter().map(Uuid::to_string).collect();
                write!(f, "first device advertising {}", services.join(", "))
            }
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub identity: PeripheralIdentity,
    /// Where `update` downloads the image from when no file is given
    pub firmware_url: String,
    /// Firmware bytes per write, at most `requested_mtu - 3`
    pub chunk_size: usize,
    pub requested_mtu: u16,
    pub connect_timeout_secs: u64,
    pub discovery_timeout_secs: u64,
    pub write_timeout_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            identity: PeripheralIdentity::default(),
            firmware_url: ble::FIRMWARE_URL.to_string(),
            chunk_size: ble::CHUNK_SIZE,
            requested_mtu: ble::REQUESTED_MTU,
            connect_timeout_secs: 30,
            discovery_timeout_secs: 15,
            write_timeout_secs: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("chunk_size must be between 1 and {max}, got {got}")]
    ChunkSize { got: usize, max: usize },
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("identity must name a device id or at least one service")]
    EmptyIdentity,
}

/// Timeouts and MTU the session applies to its suspension points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub requested_mtu: u16,
    pub connect_timeout: Duration,
    pub discovery_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        ControllerConfig::default().session_settings()
    }
}

impl ControllerConfig {
    /// Read the config from `home`, writing the defaults there on first run
    pub fn load_or_create(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join("config.json");
        let io = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };

        let config = if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(io)?;
            serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            let config = Self::default();
            std::fs::create_dir_all(home).map_err(io)?;
            let data = serde_json::to_string_pretty(&config).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
            std::fs::write(&path, data).map_err(io)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let empty = match &self.identity {
            PeripheralIdentity::Fixed { id } => id.trim().is_empty(),
            PeripheralIdentity::Discover { services } => services.is_empty(),
        };
        if empty {
            return Err(ConfigError::EmptyIdentity);
        }
        let max = chunk_size_for_mtu(self.requested_mtu);
        if self.chunk_size == 0 || self.chunk_size > max {
            return Err(ConfigError::ChunkSize {
                got: self.chunk_size,
                max,
            });
        }
        for (name, secs) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("discovery_timeout_secs", self.discovery_timeout_secs),
            ("write_timeout_secs", self.write_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            requested_mtu: self.requested_mtu,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            discovery_timeout: Duration::from_secs(self.discovery_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
        }
    }
}

/// `$REPTRAP_HOME`, or `~/.reptrap`
pub fn reptrap_home() -> PathBuf {
    match std::env::var_os("REPTRAP_HOME") {
        Some(home) => PathBuf::from(home),
        None => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".reptrap"),
    }
}
