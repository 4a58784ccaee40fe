//! Background tasks of a live link.
//!
//! Three tasks run per driver instance:
//!
//! ```text
//!  send_port_cmd / set_power ─┐
//!                             ├─► outgoing queue ─► writer ─► transport (or log sink)
//!  keepalive (every ~1.9 s) ──┘
//!
//!  transport ─► reader ─► FrameSync ─► SensorState ◄── snapshots
//! ```
//!
//! They share nothing but the queue, the sensor block, a per-instance running
//! flag (`watch<bool>`) and the counters in [`LinkStats`]. Every blocking point
//! `select!`s on the running flag, so clearing it ends all three promptly.

mod keepalive;
mod reader;
mod writer;

pub(crate) use keepalive::run_keepalive;
pub(crate) use reader::{run_reader, ReaderSettings};
pub(crate) use writer::{run_writer, OutputSink};

use crate::protocol::SyncStats;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Externally visible state of the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// Handshake done, all tasks running.
    Running,
    /// No transport: commands are logged, no sensor input.
    Detached,
    /// A task hit an unrecoverable transport error.
    Faulted {
        /// Task that failed.
        task: &'static str,
        /// Error text.
        reason: String,
    },
    /// `close()` completed.
    Stopped,
}

impl LinkStatus {
    /// True once a task has failed.
    pub fn is_faulted(&self) -> bool {
        matches!(self, LinkStatus::Faulted { .. })
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Running => f.write_str("running"),
            LinkStatus::Detached => f.write_str("detached"),
            LinkStatus::Faulted { task, reason } => write!(f, "faulted ({}: {})", task, reason),
            LinkStatus::Stopped => f.write_str("stopped"),
        }
    }
}

/// Live counters of one link.
#[derive(Debug, Default)]
pub struct LinkStats {
    items_written: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    keepalives_sent: AtomicU64,
    sync: Mutex<SyncStats>,
}

/// Point-in-time copy of [`LinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatsSnapshot {
    /// Queue items handed to the transport (or the log sink).
    pub items_written: u64,
    /// Bytes handed to the transport (or the log sink).
    pub bytes_written: u64,
    /// Bytes received from the transport.
    pub bytes_read: u64,
    /// Keepalive no-ops enqueued.
    pub keepalives_sent: u64,
    /// Frame synchroniser counters.
    pub sync: SyncStats,
}

impl LinkStats {
    pub(crate) fn record_write(&self, len: usize) {
        self.items_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, len: usize, sync: SyncStats) {
        self.bytes_read.fetch_add(len as u64, Ordering::Relaxed);
        *self.sync.lock() = sync;
    }

    pub(crate) fn record_keepalive(&self) {
        self.keepalives_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            items_written: self.items_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
            sync: *self.sync.lock(),
        }
    }
}

/// Resolves once the running flag is cleared. A dropped sender counts as stopped.
pub(crate) async fn stopped(running: &mut watch::Receiver<bool>) {
    let _ = running.wait_for(|running| !*running).await;
}
