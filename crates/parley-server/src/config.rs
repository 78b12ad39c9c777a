//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (`PARLEY_CONFIG`, or the first of the default paths)
//! - Environment variables (`PARLEY_*`, nested keys separated by `__`,
//!   e.g. `PARLEY_PRESENCE__SHORT_TIMEOUT_MS=30000`)

use anyhow::{Context, Result};
use parley_core::{EventLogConfig, PresenceConfig, RoomConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file.
const CONFIG_PATH_ENV: &str = "PARLEY_CONFIG";

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "PARLEY";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Presence tracking.
    #[serde(default)]
    pub presence: PresenceSettings,

    /// Long-poll behaviour.
    #[serde(default)]
    pub poll: PollSettings,

    /// Event log retention.
    #[serde(default)]
    pub log: LogSettings,

    /// Request limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Presence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSettings {
    /// Interval between presence sweeps in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Timeout for identities doing ordinary polls, in milliseconds.
    #[serde(default = "default_short_timeout")]
    pub short_timeout_ms: u64,

    /// Timeout for identities with a parked poll, in milliseconds.
    #[serde(default = "default_long_timeout")]
    pub long_timeout_ms: u64,
}

/// Long-poll configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    /// How long a poll may stay parked before it is answered with `[]`.
    /// 0 disables the timeout.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
}

/// Event log configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSettings {
    /// Maximum retained events. Unset keeps every event.
    #[serde(default)]
    pub max_events: Option<usize>,
}

/// Request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum chat message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    6_000 // 6 seconds
}

fn default_short_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_long_timeout() -> u64 {
    600_000 // 10 minutes
}

fn default_idle_timeout() -> u64 {
    120_000 // 2 minutes
}

fn default_max_message_size() -> usize {
    parley_protocol::request::DEFAULT_MAX_MESSAGE_LENGTH
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            presence: PresenceSettings::default(),
            poll: PollSettings::default(),
            log: LogSettings::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval(),
            short_timeout_ms: default_short_timeout(),
            long_timeout_ms: default_long_timeout(),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file, environment and defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        Self::from_sources(Self::locate().as_deref())
    }

    /// Load configuration from a specific file only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Layer an optional file and `PARLEY_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if any source fails to parse.
    pub fn from_sources(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(config)
    }

    /// Find the config file to use, if any.
    fn locate() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(shellexpand::tilde(&explicit).as_ref()));
        }

        let config_paths = [
            "parley.toml",
            "/etc/parley/parley.toml",
            "~/.config/parley/parley.toml",
        ];

        config_paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Translate into chat room configuration.
    #[must_use]
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            log: EventLogConfig {
                max_events: self.log.max_events,
                ..EventLogConfig::default()
            },
            presence: PresenceConfig {
                short_timeout: Duration::from_millis(self.presence.short_timeout_ms),
                long_timeout: Duration::from_millis(self.presence.long_timeout_ms),
            },
            sweep_interval: Duration::from_millis(self.presence.sweep_interval_ms.max(1)),
            poll_idle_timeout: match self.poll.idle_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }
}
