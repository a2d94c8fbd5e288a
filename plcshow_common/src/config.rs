//! Configuration loading traits and types.
//!
//! Every section of `plcshow.toml` except `[shared]` is optional and falls
//! back to the defaults in [`crate::consts`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use plcshow_common::config::{BridgeConfig, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let (config, created) = BridgeConfig::load_or_create(Path::new("plcshow.toml"))?;
//!     println!("PLC {} DB{} (new file: {created})", config.plc.host, config.plc.db_number);
//!     Ok(())
//! }
//! ```
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "plcshow-line-3"
//! log_level = "debug"
//!
//! [plc]
//! driver = "s7"
//! host = "192.168.1.100"
//! db_number = 1
//!
//! [timing]
//! feedback_pulse_ms = 200
//!
//! [presentation]
//! backend = "log"
//! slides_dir = "slides"
//!
//! [mapping]
//! 0 = "welcome.pptx"
//! 5 = "station_5.pptx"
//! ```

use crate::consts::*;
use crate::link::PlcEndpoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Writing the default configuration failed.
    #[error("Failed to write configuration: {0}")]
    WriteError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, per-tick detail.
    Trace,
    /// Debug information useful during commissioning.
    Debug,
    /// General information about bridge operation.
    #[default]
    Info,
    /// Recoverable problems (failed reads, missing mappings).
    Warn,
    /// Serious problems.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Common configuration fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Instance identifier, used as the root span name.
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: SERVICE_NAME.to_string(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_driver() -> String {
    "s7".to_string()
}

fn default_host() -> String {
    DEFAULT_PLC_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_S7_PORT
}

fn default_rack() -> u16 {
    DEFAULT_RACK
}

fn default_slot() -> u16 {
    DEFAULT_SLOT
}

fn default_db_number() -> u16 {
    DEFAULT_DB_NUMBER
}

fn default_control_offset() -> u16 {
    DEFAULT_CONTROL_OFFSET
}

fn default_feedback_offset() -> u16 {
    DEFAULT_FEEDBACK_OFFSET
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_io_timeout_ms() -> u64 {
    DEFAULT_IO_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_reconnect_backoff_ms() -> u64 {
    DEFAULT_RECONNECT_BACKOFF_MS
}

fn default_feedback_pulse_ms() -> u64 {
    DEFAULT_FEEDBACK_PULSE_MS
}

/// `[plc]` section: where the controller lives and how its block is laid out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlcConfig {
    /// Registered driver name ("s7", "simulation").
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Controller IP address or host name.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// CPU rack.
    #[serde(default = "default_rack")]
    pub rack: u16,

    /// CPU slot.
    #[serde(default = "default_slot")]
    pub slot: u16,

    /// Data block number holding the bridge bytes.
    #[serde(default = "default_db_number")]
    pub db_number: u16,

    /// Offset of the control byte; the index byte is read from the next byte.
    #[serde(default = "default_control_offset")]
    pub control_offset: u16,

    /// Offset of the feedback byte.
    #[serde(default = "default_feedback_offset")]
    pub feedback_offset: u16,

    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-request read/write timeout in milliseconds.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            host: default_host(),
            port: default_port(),
            rack: default_rack(),
            slot: default_slot(),
            db_number: default_db_number(),
            control_offset: default_control_offset(),
            feedback_offset: default_feedback_offset(),
            connect_timeout_ms: default_connect_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl PlcConfig {
    /// Connection parameters handed to a `PlcConnector`.
    pub fn endpoint(&self) -> PlcEndpoint {
        PlcEndpoint {
            host: self.host.clone(),
            port: self.port,
            rack: self.rack,
            slot: self.slot,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "plc.host cannot be empty".to_string(),
            ));
        }
        let control = u32::from(self.control_offset);
        let feedback = u32::from(self.feedback_offset);
        if feedback == control || feedback == control + 1 {
            return Err(ConfigError::ValidationError(format!(
                "plc.feedback_offset {} overlaps the control/index bytes at {}..={}",
                feedback,
                control,
                control + 1
            )));
        }
        if self.connect_timeout_ms == 0 || self.io_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "plc timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// `[timing]` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingConfig {
    /// Sleep between polls while connected.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Sleep between polls while disconnected.
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// Delay between setting and clearing the advance acknowledge bit.
    #[serde(default = "default_feedback_pulse_ms")]
    pub feedback_pulse_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            feedback_pulse_ms: default_feedback_pulse_ms(),
        }
    }
}

impl TimingConfig {
    /// Poll period as `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Disconnected backoff as `Duration`.
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    /// Feedback pulse width as `Duration`.
    pub fn feedback_pulse(&self) -> Duration {
        Duration::from_millis(self.feedback_pulse_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0
            || self.reconnect_backoff_ms == 0
            || self.feedback_pulse_ms == 0
        {
            return Err(ConfigError::ValidationError(
                "timing values must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which presenter implementation drives the presentation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenterBackend {
    /// Track state and log every operation.
    #[default]
    Log,
    /// Run external commands for each operation.
    Command,
}

/// `[presentation]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresentationConfig {
    /// Presenter implementation.
    #[serde(default)]
    pub backend: PresenterBackend,

    /// Base directory for relative mapping paths.
    #[serde(default)]
    pub slides_dir: Option<PathBuf>,

    /// Command line that opens a resource; `{locator}` is substituted.
    #[serde(default)]
    pub open: Vec<String>,

    /// Command line that starts/resumes playback.
    #[serde(default)]
    pub activate: Vec<String>,

    /// Command line that advances the running presentation.
    #[serde(default)]
    pub advance: Vec<String>,
}

impl PresentationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == PresenterBackend::Command && self.open.is_empty() {
            return Err(ConfigError::ValidationError(
                "presentation.open is required for the command backend".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete bridge configuration (`plcshow.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Common fields.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Controller and block layout.
    #[serde(default)]
    pub plc: PlcConfig,

    /// Poll cadence and pulse width.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Presenter selection.
    #[serde(default)]
    pub presentation: PresentationConfig,

    /// Index (0-255, as TOML key) to resource path.
    #[serde(default)]
    pub mapping: BTreeMap<String, PathBuf>,
}

impl BridgeConfig {
    /// Validate all sections.
    ///
    /// # Validation Rules
    /// 1. `shared.service_name` not empty
    /// 2. `plc.host` not empty, timeouts > 0
    /// 3. Feedback byte does not overlap the control/index bytes
    /// 4. All timing values > 0
    /// 5. Command backend has an `open` command line
    /// 6. Every mapping key is an index in 0..=255
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.plc.validate()?;
        self.timing.validate()?;
        self.presentation.validate()?;
        self.mapping_entries()?;
        Ok(())
    }

    /// Parse the `[mapping]` table into `(index, path)` pairs, sorted by index.
    pub fn mapping_entries(&self) -> Result<Vec<(u8, PathBuf)>, ConfigError> {
        self.mapping
            .iter()
            .map(|(key, path)| {
                key.trim()
                    .parse::<u8>()
                    .map(|index| (index, path.clone()))
                    .map_err(|_| {
                        ConfigError::ValidationError(format!(
                            "mapping key '{key}' is not an index in 0..=255"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|mut entries| {
                entries.sort_by_key(|(index, _)| *index);
                entries
            })
    }

    /// Parse a configuration from TOML text and validate it.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::WriteError(e.to_string()))
    }

    /// Load the configuration, writing the defaults to `path` if it is missing.
    ///
    /// Returns the configuration and whether the file was created.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool), ConfigError> {
        match Self::load(path) {
            Ok(config) => {
                config.validate()?;
                Ok((config, false))
            }
            Err(ConfigError::FileNotFound) => {
                let config = Self::default();
                std::fs::write(path, config.to_toml()?)
                    .map_err(|e| ConfigError::WriteError(format!("{}: {e}", path.display())))?;
                Ok((config, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the `[mapping]` table of the file at `path`.
    ///
    /// The other sections are taken from the file as it is on disk, so
    /// command-line overrides applied in memory are never written back.
    /// Comments in the file are not preserved.
    pub fn store_mapping<'a>(
        path: &Path,
        entries: impl IntoIterator<Item = (u8, &'a Path)>,
    ) -> Result<(), ConfigError> {
        let mut on_disk = Self::load(path)?;
        on_disk.mapping = entries
            .into_iter()
            .map(|(index, file)| (index.to_string(), file.to_path_buf()))
            .collect();
        std::fs::write(path, on_disk.to_toml()?)
            .map_err(|e| ConfigError::WriteError(format!("{}: {e}", path.display())))
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
