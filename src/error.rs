//! Custom error types for the driver.
//!
//! This module defines the primary error type, `DactaError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the few things that can actually go wrong on the link, from configuration issues to
//! a serial port that disappears mid-session.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically TOML syntax or type mismatches.
//! - **`Configuration`**: Semantic errors in an otherwise well-formed configuration,
//!   such as a keepalive interval longer than the device watchdog.
//! - **`Io`**: Wraps `std::io::Error` from the transport.
//! - **`SerialOpen`**: The serial device could not be opened. `Dacta::open` turns this
//!   into the degraded, log-only mode instead of failing.
//! - **`HandshakeTimeout`** / **`TransportClosed`**: Link-level failures.
//! - **`TaskPanicked`** / **`ShutdownFailed`**: Reported by `Dacta::close` when a
//!   background task did not end cleanly.
//!
//! Frame misalignment is deliberately absent: a bad checksum is not an error, it only
//! moves the sync window by one byte.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DactaError>;

/// Primary error type for the command module driver.
#[derive(Error, Debug)]
pub enum DactaError {
    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds unusable values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial device could not be opened.
    #[error("Failed to open serial port '{port}': {source}")]
    SerialOpen {
        /// Port identifier that was requested.
        port: String,
        /// Underlying serial error.
        #[source]
        source: tokio_serial::Error,
    },

    /// The device never sent its confirmation string.
    #[error("No confirmation string from interface within {0:?}")]
    HandshakeTimeout(Duration),

    /// The transport reported end of stream.
    #[error("Serial transport closed")]
    TransportClosed,

    /// A background task panicked or was cancelled.
    #[error("Link task '{0}' did not finish cleanly")]
    TaskPanicked(String),

    /// One or more background tasks failed; collected on shutdown.
    #[error("Shutdown failed with errors: {0:?}")]
    ShutdownFailed(Vec<DactaError>),
}

impl From<figment::Error> for DactaError {
    fn from(err: figment::Error) -> Self {
        DactaError::Config(Box::new(err))
    }
}

impl DactaError {
    /// True for errors that mean the serial line itself is gone.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, DactaError::Io(_) | DactaError::TransportClosed)
    }
}
