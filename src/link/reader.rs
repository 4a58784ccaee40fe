use super::{stopped, LinkStats};
use crate::error::AppResult;
use crate::protocol::FrameSync;
use crate::sensors::SensorState;
use crate::transport::read_with_timeout;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

const READ_CHUNK: usize = 64;

/// Tunables of the reader task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReaderSettings {
    /// Longest single wait on the transport before re-checking the running flag.
    pub read_timeout: Duration,
    /// Consecutive rejected windows before a lost-sync warning; `0` disables it.
    pub resync_warn_threshold: u64,
}

/// Pull bytes from the transport, locate frames and publish them into `sensors`.
///
/// Short reads are retried. End of stream or an I/O error ends the task with an
/// error, which the spawner turns into a faulted link.
pub(crate) async fn run_reader<R>(
    mut port: R,
    sensors: Arc<SensorState>,
    settings: ReaderSettings,
    mut running: watch::Receiver<bool>,
    stats: Arc<LinkStats>,
) -> AppResult<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut sync = FrameSync::new();
    let mut buf = [0u8; READ_CHUNK];
    let mut warned = false;

    loop {
        let n = tokio::select! {
            biased;
            _ = stopped(&mut running) => break,
            read = read_with_timeout(&mut port, &mut buf, settings.read_timeout) => read?,
        };
        if n == 0 {
            trace!("Short read");
            continue;
        }

        for &byte in &buf[..n] {
            let Some(frame) = sync.push(byte) else {
                continue;
            };
            sensors.apply_frame(&frame);

            let skipped = sync.stats().rejections_before_last_frame;
            if skipped > 0 {
                debug!(rejected_windows = skipped, "Resynchronized on frame boundary");
            }
            warned = false;
        }

        let sync_stats = sync.stats();
        if !warned
            && settings.resync_warn_threshold > 0
            && sync_stats.consecutive_rejections >= settings.resync_warn_threshold
        {
            warn!(
                rejected_windows = sync_stats.consecutive_rejections,
                "No valid frame found, sensor data is stale"
            );
            warned = true;
        }
        stats.record_read(n, sync_stats);
    }

    debug!(
        frames = sync.stats().frames_accepted,
        rejected = sync.stats().windows_rejected,
        "Reader stopped"
    );
    Ok(())
}
