use super::{stopped, LinkStats};
use crate::error::AppResult;
use crate::transport::DynSerial;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

/// Where the writer delivers queue items.
pub(crate) enum OutputSink {
    /// Write half of the serial transport.
    Transport(WriteHalf<DynSerial>),
    /// No transport: log each item instead.
    Diagnostic,
}

impl OutputSink {
    async fn deliver(&mut self, item: &[u8]) -> AppResult<()> {
        match self {
            OutputSink::Transport(port) => {
                port.write_all(item).await?;
                port.flush().await?;
                trace!(bytes = %format!("{:02X?}", item), "Wrote command");
            }
            OutputSink::Diagnostic => {
                info!(bytes = %format!("{:02X?}", item), "No transport, command not sent");
            }
        }
        Ok(())
    }

    async fn finish(&mut self) {
        if let OutputSink::Transport(port) = self {
            let _ = port.shutdown().await;
        }
    }
}

/// Drain the outgoing queue one item at a time, in order, until the running flag
/// clears. The wait on an empty queue is cancelled by the flag, so shutdown never
/// depends on another item arriving.
pub(crate) async fn run_writer(
    mut queue: mpsc::UnboundedReceiver<Bytes>,
    mut sink: OutputSink,
    mut running: watch::Receiver<bool>,
    stats: Arc<LinkStats>,
) -> AppResult<()> {
    loop {
        let item = tokio::select! {
            biased;
            _ = stopped(&mut running) => break,
            item = queue.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        sink.deliver(&item).await?;
        stats.record_write(item.len());
    }

    sink.finish().await;
    debug!(pending = queue.len(), "Writer stopped");
    Ok(())
}
