//! Caller-facing driver.
//!
//! [`Dacta`] owns one link: the transport, the three background tasks and their
//! running flag. [`DactaHandle`] is the cheap, cloneable part that callers pass
//! around to send commands and read sensors. `Dacta` derefs to its handle, so a
//! single owner can use it directly.
//!
//! ```no_run
//! use dacta::{Command, Dacta, LinkConfig, Port};
//!
//! # async fn run() -> dacta::AppResult<()> {
//! let link = Dacta::open(&LinkConfig::new("/dev/ttyUSB0")).await?;
//! link.send_port_cmd(Command::PortOnRight, Port::A.into());
//! link.set_power(Port::A.into(), 7);
//! println!("E rotation: {}", link.rotation(Port::E.into()));
//! link.close().await
//! # }
//! ```

use crate::config::LinkConfig;
use crate::error::{AppResult, DactaError};
use crate::handshake::perform_handshake;
use crate::link::{
    run_keepalive, run_reader, run_writer, LinkStats, LinkStatsSnapshot, LinkStatus, OutputSink,
    ReaderSettings,
};
use crate::protocol::{encode_port_cmd, encode_power, Command};
use crate::sensors::{SensorSnapshot, SensorState};
use crate::transport::{open_serial_async, DynSerial};
use bytes::Bytes;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Cloneable access to a running link.
///
/// Sending never blocks. Once the link is closed, sends are dropped silently and
/// reads return the last state received.
#[derive(Clone)]
pub struct DactaHandle {
    queue: mpsc::UnboundedSender<Bytes>,
    sensors: Arc<SensorState>,
    status: watch::Receiver<LinkStatus>,
    stats: Arc<LinkStats>,
}

impl DactaHandle {
    /// Enqueue `cmd` for port `port & 7`.
    pub fn send_port_cmd(&self, cmd: Command, port: u8) {
        self.enqueue(Bytes::copy_from_slice(&[encode_port_cmd(cmd.byte(), port)]));
    }

    /// Set the output level (0..=7) of port `port & 7`.
    ///
    /// Both bytes travel as one queue item and reach the wire back to back.
    pub fn set_power(&self, port: u8, power: u8) {
        self.enqueue(Bytes::copy_from_slice(&encode_power(port, power)));
    }

    fn enqueue(&self, item: Bytes) {
        if self.queue.send(item).is_err() {
            trace!("Link closed, dropping outgoing command");
        }
    }

    /// Copy of all sensor values, statuses and rotation counters.
    pub fn snapshot(&self) -> SensorSnapshot {
        self.sensors.snapshot()
    }

    /// Latest 10-bit reading of `port & 7`.
    pub fn value(&self, port: u8) -> u16 {
        self.snapshot().value(port)
    }

    /// Latest 6-bit status of `port & 7`.
    pub fn status(&self, port: u8) -> u8 {
        self.snapshot().status(port)
    }

    /// Accumulated rotation counts of `port & 7` (16 per revolution).
    pub fn rotation(&self, port: u8) -> i64 {
        self.snapshot().rotation(port)
    }

    /// Zero the rotation counter of `port & 7`.
    pub fn clear_rotation(&self, port: u8) {
        self.sensors.clear_rotation(port);
    }

    /// Touch sensor on `port & 7` is pressed.
    pub fn is_pressed(&self, port: u8) -> bool {
        self.snapshot().is_pressed(port)
    }

    /// Temperature sensor on `port & 7` in degrees Fahrenheit.
    pub fn temp_f(&self, port: u8) -> f64 {
        self.snapshot().temp_f(port)
    }

    /// Temperature sensor on `port & 7` in degrees Celsius.
    pub fn temp_c(&self, port: u8) -> f64 {
        self.snapshot().temp_c(port)
    }

    /// Current link state.
    pub fn link_status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Wait until a background task fails. Also returns when the link is dropped,
    /// with whatever state it ended in.
    pub async fn wait_faulted(&self) -> LinkStatus {
        let mut status = self.status.clone();
        let result = status.wait_for(LinkStatus::is_faulted).await.map(|s| (*s).clone());
        match result {
            Ok(faulted) => faulted,
            Err(_) => self.link_status(),
        }
    }

    /// Link counters.
    pub fn stats(&self) -> LinkStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Owner of one command module link.
pub struct Dacta {
    handle: DactaHandle,
    running: watch::Sender<bool>,
    status: Arc<watch::Sender<LinkStatus>>,
    tasks: Vec<(&'static str, JoinHandle<AppResult<()>>)>,
    shutdown_flush: Duration,
    closed: bool,
}

impl Dacta {
    /// Open the configured serial port and bring the link up.
    ///
    /// If the port cannot be opened this logs a warning and returns a detached
    /// instance instead of failing. Handshake errors are returned.
    pub async fn open(config: &LinkConfig) -> AppResult<Self> {
        config.validate()?;
        match open_serial_async(&config.port, config.baud_rate).await {
            Ok(port) => Self::connect(port, config).await,
            Err(err @ DactaError::SerialOpen { .. }) => {
                warn!(port = %config.port, error = %err, "Could not open serial port, continuing without transport");
                Ok(Self::detached(config))
            }
            Err(err) => Err(err),
        }
    }

    /// Handshake over an already open transport and start the link tasks.
    pub async fn connect(mut transport: DynSerial, config: &LinkConfig) -> AppResult<Self> {
        perform_handshake(
            &mut transport,
            config.read_timeout(),
            config.handshake_timeout(),
        )
        .await?;
        Ok(Self::start(config, Some(transport)))
    }

    /// Instance without a transport. Commands are encoded and logged, sensors stay
    /// at zero.
    ///
    /// Only the writer runs. No keepalive task is started, so unlike a connected
    /// link no periodic no-op shows up in the diagnostic log.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn detached(config: &LinkConfig) -> Self {
        info!("No inputs are available, outgoing commands are only logged");
        Self::start(config, None)
    }

    fn start(config: &LinkConfig, transport: Option<DynSerial>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (running_tx, running_rx) = watch::channel(true);
        let initial = if transport.is_some() {
            LinkStatus::Running
        } else {
            LinkStatus::Detached
        };
        let (status_tx, status_rx) = watch::channel(initial);
        let status_tx = Arc::new(status_tx);
        let sensors = Arc::new(SensorState::new());
        let stats = Arc::new(LinkStats::default());
        let mut tasks = Vec::with_capacity(3);

        let sink = match transport {
            Some(transport) => {
                let (read_half, write_half) = tokio::io::split(transport);

                tasks.push(spawn_link_task(
                    "keepalive",
                    status_tx.clone(),
                    run_keepalive(
                        queue_tx.clone(),
                        config.keepalive_interval(),
                        running_rx.clone(),
                        stats.clone(),
                    ),
                ));
                tasks.push(spawn_link_task(
                    "reader",
                    status_tx.clone(),
                    run_reader(
                        read_half,
                        sensors.clone(),
                        ReaderSettings {
                            read_timeout: config.read_timeout(),
                            resync_warn_threshold: config.resync_warn_threshold,
                        },
                        running_rx.clone(),
                        stats.clone(),
                    ),
                ));
                OutputSink::Transport(write_half)
            }
            None => OutputSink::Diagnostic,
        };

        tasks.push(spawn_link_task(
            "writer",
            status_tx.clone(),
            run_writer(queue_rx, sink, running_rx, stats.clone()),
        ));

        debug!(tasks = tasks.len(), "Link tasks started");

        Self {
            handle: DactaHandle {
                queue: queue_tx,
                sensors,
                status: status_rx,
                stats,
            },
            running: running_tx,
            status: status_tx,
            tasks,
            shutdown_flush: config.shutdown_flush(),
            closed: false,
        }
    }

    /// A handle that can outlive borrows of `self`.
    pub fn handle(&self) -> DactaHandle {
        self.handle.clone()
    }

    /// Stop all outputs, wait for the device to receive them, then stop and join
    /// the background tasks.
    ///
    /// Errors from tasks that failed during the session are returned together as
    /// [`DactaError::ShutdownFailed`].
    pub async fn close(mut self) -> AppResult<()> {
        info!("Closing link");
        self.handle.send_port_cmd(Command::KillAll, 0);
        tokio::time::sleep(self.shutdown_flush).await;
        self.running.send_replace(false);

        let mut errors = Vec::new();
        for (name, task) in self.tasks.drain(..) {
            match task.await {
                Ok(Ok(())) => debug!(task = name, "Link task joined"),
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(DactaError::TaskPanicked(format!("{}: {}", name, e))),
            }
        }
        self.closed = true;

        if !self.status.borrow().is_faulted() {
            self.status.send_replace(LinkStatus::Stopped);
        }

        if errors.is_empty() {
            info!("Link closed");
            Ok(())
        } else {
            Err(DactaError::ShutdownFailed(errors))
        }
    }

    /// Run `f` with a handle and close the link afterwards, also when `f` fails.
    ///
    /// The closure's error wins over a shutdown error.
    pub async fn run<F, Fut, T>(self, f: F) -> AppResult<T>
    where
        F: FnOnce(DactaHandle) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let result = f(self.handle()).await;
        let closed = self.close().await;
        let value = result?;
        closed?;
        Ok(value)
    }

    /// [`Dacta::open`] followed by [`Dacta::run`].
    pub async fn scoped<F, Fut, T>(config: &LinkConfig, f: F) -> AppResult<T>
    where
        F: FnOnce(DactaHandle) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        Self::open(config).await?.run(f).await
    }
}

impl Deref for Dacta {
    type Target = DactaHandle;

    fn deref(&self) -> &DactaHandle {
        &self.handle
    }
}

impl Drop for Dacta {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!("Link dropped without close(), aborting background tasks");
        self.running.send_replace(false);
        for (_, task) in self.tasks.drain(..) {
            task.abort();
        }
    }
}

fn spawn_link_task<F>(
    name: &'static str,
    status: Arc<watch::Sender<LinkStatus>>,
    task: F,
) -> (&'static str, JoinHandle<AppResult<()>>)
where
    F: Future<Output = AppResult<()>> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let result = task.await;
        if let Err(e) = &result {
            error!(task = name, error = %e, "Link task failed");
            status.send_replace(LinkStatus::Faulted {
                task: name,
                reason: e.to_string(),
            });
        }
        result
    });
    (name, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Port, CONFIRMATION};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tracing_test::traced_test;

    fn fast_config() -> LinkConfig {
        LinkConfig {
            read_timeout_ms: 20,
            shutdown_flush_ms: 10,
            handshake_timeout_ms: Some(1000),
            ..LinkConfig::default()
        }
    }

    async fn connected() -> (Dacta, DuplexStream) {
        let (host, mut device) = tokio::io::duplex(1024);
        device.write_all(CONFIRMATION).await.unwrap();
        let link = Dacta::connect(Box::new(host), &fast_config()).await.unwrap();

        // Power-on and challenge.
        let mut hello = [0u8; 34];
        device.read_exact(&mut hello).await.unwrap();
        (link, device)
    }

    #[tokio::test]
    async fn test_commands_reach_transport_in_order() {
        let (link, mut device) = connected().await;

        link.send_port_cmd(Command::PortOnRight, Port::A.into());
        link.set_power(Port::A.into(), 7);
        link.send_port_cmd(Command::Reverse, 12);

        let mut buf = [0u8; 4];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x18, 0xB7, 0x01, 0x24]);

        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_sends_kill_all_last() {
        let (link, mut device) = connected().await;
        link.send_port_cmd(Command::PortOff, 3);
        link.close().await.unwrap();

        let mut rest = Vec::new();
        device.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, vec![0x33, 0x70]);
    }

    #[tokio::test]
    async fn test_detached_link_accepts_commands() {
        let link = Dacta::detached(&fast_config());
        assert_eq!(link.link_status(), LinkStatus::Detached);

        link.send_port_cmd(Command::PortOnLeft, 2);
        link.set_power(2, 3);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(link.stats().items_written, 2);
        assert_eq!(link.snapshot(), SensorSnapshot::default());
        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_detached_link_sends_no_keepalive() {
        let config = LinkConfig {
            keepalive_interval_ms: 10,
            ..fast_config()
        };
        let link = Dacta::detached(&config);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(link.stats().keepalives_sent, 0);
        assert_eq!(link.stats().items_written, 0);
        link.close().await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn test_open_missing_port_degrades() {
        let config = LinkConfig {
            port: "/dev/definitely-not-a-port".into(),
            ..fast_config()
        };
        let link = Dacta::open(&config).await.unwrap();
        assert_eq!(link.link_status(), LinkStatus::Detached);
        assert!(logs_contain("continuing without transport"));
        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_outlives_close() {
        let (link, _device) = connected().await;
        let handle = link.handle();
        link.close().await.unwrap();

        handle.send_port_cmd(Command::PortOnSame, 0);
        assert_eq!(handle.link_status(), LinkStatus::Stopped);
        assert_eq!(handle.value(0), 0);
    }

    #[tokio::test]
    async fn test_unplugged_transport_faults_link() {
        let (link, device) = connected().await;
        drop(device);

        let status = tokio::time::timeout(Duration::from_secs(2), link.wait_faulted())
            .await
            .unwrap();
        assert!(status.is_faulted());

        let err = link.close().await.unwrap_err();
        match err {
            DactaError::ShutdownFailed(errors) => {
                assert!(errors.iter().any(DactaError::is_transport_failure));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_closes_after_closure_error() {
        let (link, mut device) = connected().await;
        let result: AppResult<()> = link
            .run(|handle| async move {
                handle.send_port_cmd(Command::DriveLeft, 1);
                Err(DactaError::Configuration("stop here".into()))
            })
            .await;
        assert!(matches!(result, Err(DactaError::Configuration(_))));

        let mut rest = Vec::new();
        device.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, vec![0x41, 0x70]);
    }

    #[tokio::test]
    async fn test_drop_without_close_stops_tasks() {
        let (link, mut device) = connected().await;
        drop(link);

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), device.read_to_end(&mut rest))
            .await
            .expect("transport should be released after drop")
            .unwrap();
    }
}
