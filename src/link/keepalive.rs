use super::{stopped, LinkStats};
use crate::error::AppResult;
use crate::protocol::Command;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

const KEEPALIVE: [u8; 1] = [Command::Nop as u8];

/// Enqueue a no-op every `period` so the interface's watchdog never fires.
///
/// The first no-op goes out one period after start. Goes through the outgoing
/// queue like any other command, so it never interleaves with a power pair.
pub(crate) async fn run_keepalive(
    queue: mpsc::UnboundedSender<Bytes>,
    period: Duration,
    mut running: watch::Receiver<bool>,
    stats: Arc<LinkStats>,
) -> AppResult<()> {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut running) => break,
            _ = ticker.tick() => {
                if queue.send(Bytes::from_static(&KEEPALIVE)).is_err() {
                    debug!("Outgoing queue closed, keepalive exiting");
                    break;
                }
                stats.record_keepalive();
                trace!("Keepalive enqueued");
            }
        }
    }

    debug!("Keepalive stopped");
    Ok(())
}
