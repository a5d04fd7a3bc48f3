//! Application settings

use crate::core::logger::LogFormat;
use crate::core::ring::DEFAULT_DEBOUNCE;
use crate::core::session::SessionConfig;
use crate::core::status::Setting;
use crate::core::supervisor::{FixedReply, ReplyPayload, SupervisorConfig, TimestampReply};
use crate::core::transport::{SerialConfig, SerialParity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Error type for loading and saving configuration
pub type ConfigError = Box<dyn std::error::Error + Send + Sync>;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial link
    pub serial: SerialSettings,
    /// Session behaviour
    pub session: SessionSettings,
    /// Heartbeat and auto reply
    pub supervisor: SupervisorSettings,
    /// Ring indicator line
    pub ring: RingSettings,
    /// Diagnostics and transcripts
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        super::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load config from the default location, defaults if there is none
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path().ok_or("Could not determine config directory")?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::default_path().ok_or("Could not determine config directory")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.save_to(&path)
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Serial port settings for the transport
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig::new(&self.serial.port, self.serial.baud_rate)
            .data_bits(self.serial.data_bits)
            .stop_bits(self.serial.stop_bits)
            .parity(self.serial.parity)
    }

    /// Session settings
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            name: self.session.name.clone(),
            read_timeout: Duration::from_millis(self.serial.read_timeout_ms),
            send_timeout: Duration::from_millis(self.supervisor.send_timeout_ms),
            startup_settings: self
                .session
                .startup
                .iter()
                .map(|s| (s.setting, s.value.clone()))
                .collect(),
        }
    }

    /// Supervisor settings
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            interval: Duration::from_secs(self.supervisor.interval_secs),
        }
    }
}

/// Serial link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port name
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits
    pub data_bits: u8,
    /// Stop bits
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Quiet window that ends a response (ms)
    pub read_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        let serial = SerialConfig::default();
        Self {
            port: serial.port,
            baud_rate: serial.baud_rate,
            data_bits: serial.data_bits,
            stop_bits: serial.stop_bits,
            parity: serial.parity,
            read_timeout_ms: 1000,
        }
    }
}

/// One option applied after the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupSetting {
    /// Option
    pub setting: Setting,
    /// Value assigned
    pub value: String,
}

/// Session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Name used in logs
    pub name: String,
    /// Options applied after every handshake
    pub startup: Vec<StartupSetting>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            name: session.name,
            startup: session
                .startup_settings
                .into_iter()
                .map(|(setting, value)| StartupSetting { setting, value })
                .collect(),
        }
    }
}

/// Supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Seconds between heartbeats
    pub interval_secs: u64,
    /// Fixed auto-reply text; the current local time when unset
    pub reply: Option<String>,
    /// Response window for SMS sends (ms)
    pub send_timeout_ms: u64,
}

impl SupervisorSettings {
    /// Reply payload these settings describe
    pub fn payload(&self) -> Arc<dyn ReplyPayload> {
        match &self.reply {
            Some(text) => Arc::new(FixedReply(text.clone())),
            None => Arc::new(TimestampReply),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            reply: None,
            send_timeout_ms: 3000,
        }
    }
}

/// Ring line settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingSettings {
    /// sysfs GPIO value file of the RI pin; no ring handling when unset
    pub gpio_value_path: Option<PathBuf>,
    /// Minimum spacing of reported edges (ms)
    pub debounce_ms: u64,
}

impl RingSettings {
    /// Debounce as a duration
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for RingSettings {
    fn default() -> Self {
        Self {
            gpio_value_path: None,
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Directory for the rolling diagnostic log and transcripts
    pub directory: Option<PathBuf>,
    /// Record a wire transcript
    pub transcript: bool,
    /// Transcript format
    pub transcript_format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: super::log_dir(),
            transcript: false,
            transcript_format: LogFormat::Text,
        }
    }
}
