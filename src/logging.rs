//! Tracing setup for the driver and the CLI.
//!
//! The library only emits `tracing` events; installing a subscriber is left to the
//! application. [`init`] installs the one the `dacta` binary uses: a single
//! `fmt` layer, compact text or JSON lines, filtered by `RUST_LOG` when set and by
//! the configured level otherwise.
//!
//! # Example
//! ```no_run
//! use dacta::{config::LinkConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LinkConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!(port = %config.port, "starting");
//! # Ok(())
//! # }
//! ```

use crate::config::LinkConfig;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter, Layer,
};

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One uncoloured line per event.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Subscriber settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::default(),
        }
    }
}

impl LogSettings {
    /// Settings at the level named by `config.log_level`.
    pub fn from_link_config(config: &LinkConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.log_level)?,
            ..Self::default()
        })
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()))
    }
}

/// Install a compact subscriber at the configured level.
pub fn init_from_config(config: &LinkConfig) -> Result<(), String> {
    init(LogSettings::from_link_config(config)?)
}

/// Install the global subscriber.
///
/// Returns `Ok(())` without touching anything when a subscriber is already set.
pub fn init(settings: LogSettings) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let layer = fmt::layer().with_thread_names(true);
    let layer = match settings.format {
        LogFormat::Compact => layer.compact().with_ansi(false).boxed(),
        LogFormat::Json => layer.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(settings.filter()))
        .try_init()
        .or_else(already_installed)
}

fn already_installed(e: TryInitError) -> Result<(), String> {
    // Another initializer won the race.
    let msg = e.to_string();
    if msg.contains("has already been set") || msg.contains("already initialized") {
        Ok(())
    } else {
        Err(format!("Failed to initialize tracing: {}", e))
    }
}

/// Parse a level name, case-insensitively.
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    level.parse::<Level>().map_err(|_| {
        format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )
    })
}
