//! Serial transport boundary.
//!
//! The driver talks to anything that is `AsyncRead + AsyncWrite`: a real
//! `tokio_serial::SerialStream`, or one end of `tokio::io::duplex` in tests and in
//! simulation. The transport knows nothing about the protocol.

use crate::error::{AppResult, DactaError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Open a serial port with the interface's line settings (8N1, no flow control).
///
/// Opening is wrapped in `spawn_blocking` so a slow USB adapter does not stall
/// the runtime.
pub async fn open_serial_async(port_path: &str, baud_rate: u32) -> AppResult<DynSerial> {
    let path = port_path.to_string();
    let stream = tokio::task::spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|source| DactaError::SerialOpen { port: path, source })
    })
    .await
    .map_err(|e| DactaError::TaskPanicked(format!("serial open: {}", e)))??;

    tracing::info!(port = port_path, baud_rate, "Opened serial port");
    Ok(Box::new(stream))
}

/// Read whatever is available, waiting at most `timeout`.
///
/// A timeout, `TimedOut` or `WouldBlock` is a short read and yields `Ok(0)`;
/// end of stream is [`DactaError::TransportClosed`].
pub async fn read_with_timeout<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    timeout: Duration,
) -> AppResult<usize> {
    match tokio::time::timeout(timeout, reader.read(buf)).await {
        Err(_) => Ok(0),
        Ok(Ok(0)) if !buf.is_empty() => Err(DactaError::TransportClosed),
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e))
            if matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) =>
        {
            Ok(0)
        }
        Ok(Err(e)) => Err(e.into()),
    }
}

/// Names of serial ports present on this machine.
pub fn list_ports() -> AppResult<Vec<String>> {
    let ports = serialport::available_ports()
        .map_err(|e| DactaError::Io(std::io::Error::other(e.to_string())))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_with_timeout_returns_data() {
        let (mut host, mut device) = tokio::io::duplex(64);
        device.write_all(b"abc").await.unwrap();

        let mut buf = [0u8; 8];
        let n = read_with_timeout(&mut host, &mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"abc");
    }

    #[tokio::test]
    async fn test_read_with_timeout_short_read() {
        let (mut host, _device) = tokio::io::duplex(64);
        let mut buf = [0u8; 8];
        let n = read_with_timeout(&mut host, &mut buf, Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_read_with_timeout_eof() {
        let (mut host, device) = tokio::io::duplex(64);
        drop(device);
        let mut buf = [0u8; 8];
        let err = read_with_timeout(&mut host, &mut buf, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, DactaError::TransportClosed));
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let err = open_serial_async("/dev/definitely-not-a-port", 9600)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DactaError::SerialOpen { .. }));
    }

    #[test]
    fn test_boxed_duplex_is_serial_port() {
        let (host, _device) = tokio::io::duplex(8);
        let _port: DynSerial = Box::new(host);
    }
}
