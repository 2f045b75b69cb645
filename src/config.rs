//! Configuration management for crabsoup
//!
//! Timeouts, mailbox capacities and logging thresholds for a connector. The
//! defaults match what the host plugin expects; a TOML file and `CRABSOUP_*`
//! environment variables can override them.

use crate::errors::ConnectorError;
use crate::sdk::log_sink::SdkLogSeverity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub handshake: HandshakeConfig,
    pub media: MediaConfig,
    pub teardown: TeardownConfig,
    pub logging: LoggingConfig,
}

/// Handshake bridge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// How long any handshake wait may block, in milliseconds
    pub timeout_ms: u64,
}

/// Mailbox and media source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Outgoing video frames kept before the queue is cleared
    pub video_queue_capacity: usize,
    /// Outgoing audio backlog, in 10 ms chunks, before the buffers are reset
    pub audio_overflow_chunks: usize,
    /// Received audio packets kept per consumer
    pub received_audio_capacity: usize,
    /// Simulcast layers used when the frontend sends no encodings
    pub default_simulcast_layers: usize,
    /// Size of the placeholder frame sent before the first real one
    pub source_width: u32,
    pub source_height: u32,
    /// Gain applied to outgoing audio
    pub audio_gain: f32,
    /// Audio pump sleep when the outgoing buffer is empty, in milliseconds
    pub pump_idle_backoff_ms: u64,
}

/// Transport shutdown settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeardownConfig {
    /// Upper bound on waiting for a closed transport to leave the connected state
    pub transport_close_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// SDK messages below this severity are dropped
    pub sdk_min_severity: SdkLogSeverity,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig { timeout_ms: 30_000 },
            media: MediaConfig {
                video_queue_capacity: 30,
                audio_overflow_chunks: 256,
                received_audio_capacity: 64,
                default_simulcast_layers: 3,
                source_width: 1280,
                source_height: 720,
                audio_gain: 1.0,
                pump_idle_backoff_ms: 1,
            },
            teardown: TeardownConfig {
                transport_close_timeout_ms: 5_000,
            },
            logging: LoggingConfig {
                sdk_min_severity: SdkLogSeverity::Warning,
            },
        }
    }
}

impl ConnectorConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConnectorError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ConnectorError::config(format!("Failed to read config file: {}", e)))?;

        let config: ConnectorConfig = toml::from_str(&contents)
            .map_err(|e| ConnectorError::config(format!("Failed to parse config file: {}", e)))?;

        config.validate().map_err(ConnectorError::config)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load defaults, then the TOML file if present, then `CRABSOUP_*` overrides.
    ///
    /// Nested keys use a double underscore:
    /// `CRABSOUP_HANDSHAKE__TIMEOUT_MS=5000`.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, ConnectorError> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| ConnectorError::config(format!("Failed to seed defaults: {}", e)))?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("CRABSOUP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConnectorError::config(format!("Failed to build config: {}", e)))?;

        let config: ConnectorConfig = settings
            .try_deserialize()
            .map_err(|e| ConnectorError::config(format!("Failed to parse config: {}", e)))?;

        config.validate().map_err(ConnectorError::config)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConnectorError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ConnectorError::config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ConnectorError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| ConnectorError::config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabsoup.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_layered(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake.timeout_ms)
    }

    pub fn transport_close_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown.transport_close_timeout_ms)
    }

    pub fn pump_idle_backoff(&self) -> Duration {
        Duration::from_millis(self.media.pump_idle_backoff_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.handshake.timeout_ms == 0 {
            return Err("Handshake timeout must be positive".to_string());
        }

        if self.media.video_queue_capacity == 0 {
            return Err("Video queue capacity must be at least 1".to_string());
        }
        if self.media.audio_overflow_chunks == 0 {
            return Err("Audio overflow threshold must be at least one chunk".to_string());
        }
        if self.media.received_audio_capacity == 0 {
            return Err("Received audio capacity must be at least 1".to_string());
        }
        if self.media.default_simulcast_layers == 0 || self.media.default_simulcast_layers > 4 {
            return Err("Default simulcast layers must be between 1 and 4".to_string());
        }
        if self.media.source_width == 0 || self.media.source_height == 0 {
            return Err("Invalid source resolution".to_string());
        }
        if !(0.0..=16.0).contains(&self.media.audio_gain) {
            return Err("Audio gain must be between 0.0 and 16.0".to_string());
        }

        Ok(())
    }
}
