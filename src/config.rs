//! Link configuration using Figment
//!
//! Configuration is layered, later sources winning:
//! 1. Built-in defaults ([`LinkConfig::default`])
//! 2. A TOML file (by default `config/dacta.toml`)
//! 3. Environment variables prefixed with `DACTA_` (e.g. `DACTA_PORT=/dev/ttyUSB1`)
//!
//! # Example
//! ```no_run
//! use dacta::config::LinkConfig;
//!
//! let config = LinkConfig::load_from("config/dacta.toml")?;
//! config.validate()?;
//! # Ok::<(), dacta::DactaError>(())
//! ```

use crate::error::{AppResult, DactaError};
use crate::protocol::DEFAULT_BAUD_RATE;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/dacta.toml";

/// The device drops the link after roughly two seconds of silence.
pub const DEVICE_WATCHDOG: Duration = Duration::from_millis(2000);

/// Settings for one link to one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Serial speed
    pub baud_rate: u32,
    /// Upper bound on a single transport read; also bounds shutdown latency
    pub read_timeout_ms: u64,
    /// Period between keepalive no-ops; must stay below the device watchdog
    pub keepalive_interval_ms: u64,
    /// Give up on the confirmation string after this long (unset = wait forever)
    pub handshake_timeout_ms: Option<u64>,
    /// Time granted to the writer to flush the disconnect command on close
    pub shutdown_flush_ms: u64,
    /// Warn once the sync search has rejected this many windows in a row
    pub resync_warn_threshold: u64,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 2000,
            keepalive_interval_ms: 1900,
            handshake_timeout_ms: None,
            shutdown_flush_ms: 500,
            resync_warn_threshold: 190,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(windows)]
fn default_port() -> String {
    "COM1".to_string()
}

#[cfg(not(windows))]
fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

impl LinkConfig {
    /// Defaults for the given port.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment. A missing file is not
    /// an error; defaults fill in whatever the layers leave out.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Figment::from(Serialized::defaults(LinkConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DACTA_"))
            .extract()
            .map_err(DactaError::from)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        if self.port.trim().is_empty() {
            return Err(DactaError::Configuration("port must not be empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(DactaError::Configuration("baud_rate must be positive".into()));
        }
        if self.read_timeout_ms == 0 {
            return Err(DactaError::Configuration(
                "read_timeout_ms must be positive".into(),
            ));
        }
        if self.keepalive_interval_ms == 0 || self.keepalive_interval() >= DEVICE_WATCHDOG {
            return Err(DactaError::Configuration(format!(
                "keepalive_interval_ms must be between 1 and {} (device watchdog), got {}",
                DEVICE_WATCHDOG.as_millis() - 1,
                self.keepalive_interval_ms
            )));
        }
        if self.handshake_timeout_ms == Some(0) {
            return Err(DactaError::Configuration(
                "handshake_timeout_ms must be positive when set".into(),
            ));
        }
        crate::logging::parse_log_level(&self.log_level).map_err(DactaError::Configuration)?;
        Ok(())
    }

    /// Read timeout as a `Duration`.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Keepalive period as a `Duration`.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Handshake bound, if any.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    /// Disconnect flush delay as a `Duration`.
    pub fn shutdown_flush(&self) -> Duration {
        Duration::from_millis(self.shutdown_flush_ms)
    }
}
