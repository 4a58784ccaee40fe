//! Simulated command module.
//!
//! Plays the device side of a `tokio::io::duplex` pair: waits for the challenge,
//! answers it, then streams sensor frames built from settable channel readings.
//! Everything the host writes is recorded for inspection. Used by the
//! integration tests and `dacta --simulate`.
//!
//! ```no_run
//! use dacta::mock::{MockCommandModule, MockConfig};
//! use dacta::{Dacta, LinkConfig, Port};
//!
//! # async fn run() -> dacta::AppResult<()> {
//! let (transport, device) = MockCommandModule::pair(MockConfig::default());
//! device.set_channel(Port::A, 420, 0);
//! let link = Dacta::connect(transport, &LinkConfig::default()).await?;
//! # link.close().await
//! # }
//! ```

use crate::protocol::{Command, Frame, Port, CHALLENGE, CONFIRMATION, NUM_PORTS};
use crate::transport::DynSerial;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

const DUPLEX_CAPACITY: usize = 4096;

/// Behaviour of the simulated device.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Time between frames. At 9600 baud a real module sends one every ~20 ms.
    pub frame_period: Duration,
    /// Answer the challenge at all.
    pub answer_challenge: bool,
    /// Bytes sent before the confirmation string.
    pub noise_before_confirmation: Vec<u8>,
    /// Bytes injected between frames every `noise_interval` frames.
    pub noise_between_frames: Vec<u8>,
    /// Inject `noise_between_frames` after every this many frames; 0 disables.
    pub noise_interval: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            frame_period: Duration::from_millis(20),
            answer_challenge: true,
            noise_before_confirmation: Vec::new(),
            noise_between_frames: Vec::new(),
            noise_interval: 0,
        }
    }
}

#[derive(Default)]
struct DeviceState {
    channels: Mutex<[(u16, u8); NUM_PORTS]>,
    received: Mutex<Vec<u8>>,
    frames_sent: AtomicU64,
    kill_all_seen: AtomicBool,
}

/// Handle to a running simulated device.
pub struct MockCommandModule {
    state: Arc<DeviceState>,
    task: JoinHandle<()>,
}

impl MockCommandModule {
    /// Start a device and return the host end of its line.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn pair(config: MockConfig) -> (DynSerial, MockCommandModule) {
        let (host, device) = tokio::io::duplex(DUPLEX_CAPACITY);
        let state = Arc::new(DeviceState::default());
        let task = tokio::spawn(run_device(device, state.clone(), config));
        (Box::new(host), MockCommandModule { state, task })
    }

    /// Reading reported for `port` from the next frame on.
    pub fn set_channel(&self, port: Port, value: u16, status: u8) {
        self.state.channels.lock()[port.index()] = (value, status);
    }

    /// Make `port` report a rotation increment of `delta` (-3..=3) per frame,
    /// keeping its value.
    pub fn set_rotation_step(&self, port: Port, delta: i8) {
        let magnitude = delta.unsigned_abs().min(3);
        let direction = if delta > 0 { 0x04 } else { 0x00 };
        let mut channels = self.state.channels.lock();
        let status = channels[port.index()].1 & !0x07;
        channels[port.index()].1 = status | direction | magnitude;
    }

    /// Every byte the host has written so far.
    pub fn received(&self) -> Vec<u8> {
        self.state.received.lock().clone()
    }

    /// Bytes the host wrote after the challenge string.
    pub fn commands(&self) -> Vec<u8> {
        let received = self.state.received.lock();
        match find(&received, CHALLENGE) {
            Some(at) => received[at + CHALLENGE.len()..].to_vec(),
            None => Vec::new(),
        }
    }

    /// Frames streamed so far.
    pub fn frames_sent(&self) -> u64 {
        self.state.frames_sent.load(Ordering::Relaxed)
    }

    /// A kill-all command has arrived.
    pub fn kill_all_seen(&self) -> bool {
        self.state.kill_all_seen.load(Ordering::Relaxed)
    }

    /// Wait until the host has sent at least `len` command bytes. Returns false
    /// on timeout.
    pub async fn wait_for_commands(&self, len: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.commands().len() < len {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Simulate pulling the cable: the device end of the line goes away.
    pub fn unplug(&self) {
        self.task.abort();
    }
}

impl Drop for MockCommandModule {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_device(line: DuplexStream, state: Arc<DeviceState>, config: MockConfig) {
    let (mut rx, mut tx) = tokio::io::split(line);
    let mut buf = [0u8; 256];
    let mut streaming = false;
    let mut ticker = tokio::time::interval(config.frame_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            read = rx.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let challenged = {
                    let mut received = state.received.lock();
                    received.extend_from_slice(&buf[..n]);
                    find(&received, CHALLENGE).is_some()
                };
                if streaming && buf[..n].iter().any(|&b| b & 0xF8 == Command::KillAll as u8) {
                    state.kill_all_seen.store(true, Ordering::Relaxed);
                }
                if !streaming && challenged && config.answer_challenge {
                    debug!("Mock device answering challenge");
                    if tx.write_all(&config.noise_before_confirmation).await.is_err()
                        || tx.write_all(CONFIRMATION).await.is_err()
                    {
                        break;
                    }
                    streaming = true;
                }
            }
            _ = ticker.tick(), if streaming => {
                let frame = Frame::from_channels(*state.channels.lock());
                if tx.write_all(frame.as_bytes()).await.is_err() {
                    break;
                }
                let sent = state.frames_sent.fetch_add(1, Ordering::Relaxed) + 1;
                if config.noise_interval > 0
                    && sent % config.noise_interval == 0
                    && tx.write_all(&config.noise_between_frames).await.is_err()
                {
                    break;
                }
                trace!(sent, "Mock device sent frame");
            }
        }
    }
    debug!("Mock device stopped");
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
