//! Link-up sequence.
//!
//! The interface stays silent until it has been switched on and has seen the
//! challenge string. It then answers with the confirmation string, possibly
//! preceded by line noise, after which sensor frames start to flow. The reply is
//! located by sliding a window of the confirmation's length over the incoming
//! bytes one byte at a time.

use crate::error::{AppResult, DactaError};
use crate::protocol::{CHALLENGE, CONFIRMATION, POWER_ON};
use crate::transport::read_with_timeout;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, trace};

/// Run the link-up sequence on `port`.
///
/// Reads strictly one byte at a time so nothing after the confirmation string is
/// consumed; those bytes belong to the frame reader. With `timeout == None` this
/// waits for the device indefinitely.
#[instrument(skip(port))]
pub async fn perform_handshake<S>(
    port: &mut S,
    read_timeout: Duration,
    timeout: Option<Duration>,
) -> AppResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    port.write_all(POWER_ON).await?;
    port.write_all(CHALLENGE).await?;
    port.flush().await?;
    debug!("Sent power-on and challenge");

    let skipped = match timeout {
        Some(limit) => tokio::time::timeout(limit, await_confirmation(port, read_timeout))
            .await
            .map_err(|_| DactaError::HandshakeTimeout(limit))??,
        None => await_confirmation(port, read_timeout).await?,
    };

    info!(skipped_bytes = skipped, "Got confirmation string");
    Ok(())
}

/// Slide over the input until the confirmation string is matched. Returns the
/// number of bytes that preceded it.
async fn await_confirmation<R>(port: &mut R, read_timeout: Duration) -> AppResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut window: VecDeque<u8> = VecDeque::with_capacity(CONFIRMATION.len());
    let mut skipped = 0u64;
    let mut byte = [0u8; 1];

    loop {
        if read_with_timeout(port, &mut byte, read_timeout).await? == 0 {
            trace!("No reply yet, still waiting for confirmation");
            continue;
        }

        if window.len() == CONFIRMATION.len() {
            window.pop_front();
            skipped += 1;
        }
        window.push_back(byte[0]);

        if window.len() == CONFIRMATION.len() && window.iter().eq(CONFIRMATION.iter()) {
            return Ok(skipped);
        }
    }
}
