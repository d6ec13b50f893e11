//! Daemon configuration.
//!
//! telly reads a single TOML file. Every section is optional; missing values
//! fall back to the defaults below. The TV itself is not configured here but
//! saved by `telly setup` into the state directory.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::engine::AutomationSettings;
use crate::webos::ClientOptions;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub automation: AutomationConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"telly::webos" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Filter for the fmt subscriber.
    pub fn targets(&self) -> Targets {
        self.overrides.iter().fold(
            Targets::new().with_default(LevelFilter::from(self.level)),
            |targets, (target, level)| targets.with_target(target.clone(), LevelFilter::from(*level)),
        )
    }
}

/// Protocol client settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-transport bound on connecting plus registering
    pub connect_timeout_secs: u64,

    /// Bound on waiting for a response to a request
    pub request_timeout_secs: u64,

    /// TLS WebSocket port
    pub secure_port: u16,

    /// Plain WebSocket port
    pub plain_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let options = ClientOptions::default();
        Self {
            connect_timeout_secs: options.connect_timeout.as_secs(),
            request_timeout_secs: options.request_timeout.as_secs(),
            secure_port: options.secure_port,
            plain_port: options.plain_port,
        }
    }
}

impl ClientConfig {
    pub fn options(&self) -> ClientOptions {
        ClientOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            secure_port: self.secure_port,
            plain_port: self.plain_port,
        }
    }
}

/// Orchestrator timings and the media key bridge
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Minimum gap between two wake (or two sleep) sequences
    pub debounce_secs: u64,

    /// Wait after the wake packet before connecting
    pub settle_secs: u64,

    /// Connect attempts made by auto-connect
    pub connect_attempts: u32,

    /// Backoff before retry n is n times this
    pub backoff_step_secs: u64,

    /// Forward media keys to the TV
    pub media_keys: bool,

    /// Input device node whose readability gates media keys
    pub media_keys_device: Option<PathBuf>,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        let settings = AutomationSettings::default();
        Self {
            debounce_secs: settings.debounce.as_secs(),
            settle_secs: settings.settle_delay.as_secs(),
            connect_attempts: settings.connect_attempts,
            backoff_step_secs: settings.backoff_step.as_secs(),
            media_keys: false,
            media_keys_device: None,
        }
    }
}

impl AutomationConfig {
    pub fn settings(&self, diagnostics: &DiagnosticsConfig) -> AutomationSettings {
        AutomationSettings {
            debounce: Duration::from_secs(self.debounce_secs),
            settle_delay: Duration::from_secs(self.settle_secs),
            connect_attempts: self.connect_attempts,
            backoff_step: Duration::from_secs(self.backoff_step_secs),
            diagnostics_enabled: diagnostics.enabled,
            diagnostics_verbose: diagnostics.verbose,
            diagnostics_interval: Duration::from_secs(diagnostics.interval_secs),
        }
    }
}

/// Diagnostic capture
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub enabled: bool,

    /// Also record raw payloads and run periodic snapshots
    pub verbose: bool,

    pub interval_secs: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verbose: false,
            interval_secs: 60,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `device.toml` and `pairing-keys.toml`
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured directory, else `$XDG_STATE_HOME/telly`, else
    /// `~/.local/state/telly`.
    pub fn resolve_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.dir {
            return Ok(dir.clone());
        }
        if let Some(state) = std::env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(state).join("telly"));
        }
        std::env::var_os("HOME")
            .filter(|v| !v.is_empty())
            .map(|home| PathBuf::from(home).join(".local/state/telly"))
            .ok_or(ConfigError::NoStateDir)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Like [`Config::from_file`], but a missing file yields the defaults.
    pub fn from_file_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match Self::from_file(path) {
            Err(ConfigError::Io(_, e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No state directory: set storage.dir, XDG_STATE_HOME or HOME")]
    NoStateDir,
}
