//! # dacta
//!
//! Host-side driver for the eight-port serial command module of the LEGO Dacta
//! control interface family. It brings the link up with the challenge/confirmation
//! handshake, keeps the device's watchdog fed, streams motor commands, and keeps an
//! always-current picture of the eight sensor channels decoded from the device's
//! 19-byte frames.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: Wire constants, the command encoder, frame validation and the
//!   sliding-window frame synchroniser. Pure code, no I/O.
//! - **`sensors`**: The shared sensor block and its derived readings (touch, temperature,
//!   rotation).
//! - **`transport`**: The serial boundary (`tokio-serial`), plus anything else that is
//!   `AsyncRead + AsyncWrite`.
//! - **`handshake`**: Power-on, challenge and confirmation matching.
//! - **`link`**: The writer, keepalive and reader tasks.
//! - **`driver`**: [`Dacta`] and [`DactaHandle`], the caller-facing surface.
//! - **`mock`**: A simulated command module for tests and `--simulate`.
//! - **`config`**, **`logging`**, **`error`**: Figment configuration, tracing setup and
//!   the crate error type.

pub mod config;
pub mod driver;
pub mod error;
pub mod handshake;
pub mod link;
pub mod logging;
pub mod mock;
pub mod protocol;
pub mod sensors;
pub mod transport;

pub use config::LinkConfig;
pub use driver::{Dacta, DactaHandle};
pub use error::{AppResult, DactaError};
pub use link::{LinkStatsSnapshot, LinkStatus};
pub use protocol::{Command, Port};
pub use sensors::SensorSnapshot;
