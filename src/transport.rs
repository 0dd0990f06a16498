//! Byte-stream transport to the current probe.
//!
//! The session only needs byte-stream semantics with a bounded read:
//! [`Transport`] is that seam and [`Connector`] opens one for a port/baud pair.
//!
//! [`StreamTransport`] implements the seam over any `AsyncRead + AsyncWrite`, which
//! covers the real device (`tokio-serial`, behind the `serial` feature) and the
//! in-memory [`LoopbackConnector`] used for simulation and tests.

use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::io;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tracing::debug;

/// Byte-oriented connection with a bounded read.
#[async_trait]
pub trait Transport: Send {
    /// Read up to `max_bytes`, waiting at most `timeout`.
    ///
    /// Returns an empty buffer when the timeout elapses without data.
    async fn read_available(&mut self, max_bytes: usize, timeout: Duration) -> AppResult<Vec<u8>>;

    /// Write all of `bytes` and flush.
    async fn write(&mut self, bytes: &[u8]) -> AppResult<()>;

    /// Drop bytes the device sent before the host was ready for them.
    async fn discard_input(&mut self) -> AppResult<()> {
        Ok(())
    }

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self) -> AppResult<()>;
}

/// Opens a [`Transport`] for a port and baud rate.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport + 'static;

    /// Open the port, failing with [`DaqError::Connection`].
    async fn open(&self, port: &str, baud_rate: u32) -> AppResult<Self::Transport>;
}

/// Streams that can throw away pending input.
pub trait DiscardInput {
    /// Clear the receive buffer.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl DiscardInput for DuplexStream {
    fn discard_input(&mut self) -> io::Result<()> {
        // Nothing is buffered outside the pipe itself
        Ok(())
    }
}

#[cfg(feature = "serial")]
impl DiscardInput for tokio_serial::SerialStream {
    fn discard_input(&mut self) -> io::Result<()> {
        use tokio_serial::SerialPort;
        self.clear(tokio_serial::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

/// [`Transport`] over an async byte stream.
pub struct StreamTransport<S> {
    io: Option<S>,
    label: String,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + DiscardInput + Unpin + Send,
{
    /// Wrap an already-open stream; `label` identifies it in logs.
    pub fn new(io: S, label: impl Into<String>) -> Self {
        Self {
            io: Some(io),
            label: label.into(),
        }
    }

    /// Whether `close` has not been called yet.
    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    fn io(&mut self) -> AppResult<&mut S> {
        self.io.as_mut().ok_or_else(|| {
            DaqError::Transport(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport already closed",
            ))
        })
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + DiscardInput + Unpin + Send,
{
    async fn read_available(&mut self, max_bytes: usize, timeout: Duration) -> AppResult<Vec<u8>> {
        let io = self.io()?;
        let mut buf = vec![0u8; max_bytes.max(1)];

        match tokio::time::timeout(timeout, io.read(&mut buf)).await {
            Err(_elapsed) => Ok(Vec::new()),
            Ok(Ok(0)) => Err(DaqError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "device closed the connection",
            ))),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            // Port-level timeout shorter than ours
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Ok(Err(e)) => Err(DaqError::Transport(e)),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        let io = self.io()?;
        io.write_all(bytes).await.map_err(DaqError::Transport)?;
        io.flush().await.map_err(DaqError::Transport)?;
        Ok(())
    }

    async fn discard_input(&mut self) -> AppResult<()> {
        self.io()?.discard_input().map_err(DaqError::Transport)
    }

    async fn close(&mut self) -> AppResult<()> {
        if let Some(mut io) = self.io.take() {
            let result = io.shutdown().await;
            debug!(port = %self.label, "transport closed");
            result.map_err(DaqError::Transport)?;
        }
        Ok(())
    }
}

/// Opens the probe's USB serial port: 8N1, no flow control.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

#[cfg(feature = "serial")]
#[async_trait]
impl Connector for SerialConnector {
    type Transport = StreamTransport<tokio_serial::SerialStream>;

    async fn open(&self, port: &str, baud_rate: u32) -> AppResult<Self::Transport> {
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                DaqError::Connection(format!(
                    "Failed to open serial port '{}' at {} baud: {}",
                    port, baud_rate, e
                ))
            })?;

        Ok(StreamTransport::new(stream, port))
    }
}

#[cfg(not(feature = "serial"))]
#[async_trait]
impl Connector for SerialConnector {
    type Transport = StreamTransport<DuplexStream>;

    async fn open(&self, _port: &str, _baud_rate: u32) -> AppResult<Self::Transport> {
        Err(DaqError::SerialFeatureDisabled)
    }
}

/// In-memory connector whose far end plays the device.
///
/// The connector hands out its transport once; later opens fail like a busy port.
pub struct LoopbackConnector {
    host_end: Mutex<Option<DuplexStream>>,
}

impl LoopbackConnector {
    /// Connector plus the device-side end of the pipe.
    pub fn new() -> (Self, DuplexStream) {
        let (host_end, device_end) = tokio::io::duplex(64 * 1024);
        (
            Self {
                host_end: Mutex::new(Some(host_end)),
            },
            device_end,
        )
    }

    /// Connector that fails every open, like a missing port.
    pub fn unavailable() -> Self {
        Self {
            host_end: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    type Transport = StreamTransport<DuplexStream>;

    async fn open(&self, port: &str, baud_rate: u32) -> AppResult<Self::Transport> {
        let host_end = self
            .host_end
            .lock()
            .map_err(|_| DaqError::Connection("loopback connector poisoned".into()))?
            .take();
        match host_end {
            Some(io) => Ok(StreamTransport::new(io, format!("{port}@{baud_rate}"))),
            None => Err(DaqError::Connection(format!(
                "Failed to open serial port '{}' at {} baud: not available",
                port, baud_rate
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn read_times_out_with_empty_buffer() {
        let (connector, _device) = LoopbackConnector::new();
        let mut transport = connector.open("loop", 9600).await.unwrap();
        let bytes = transport
            .read_available(4096, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn read_is_bounded_by_max_bytes() {
        let (connector, mut device) = LoopbackConnector::new();
        let mut transport = connector.open("loop", 9600).await.unwrap();
        device.write_all(b"0.1\n0.2\n0.3\n").await.unwrap();

        let first = transport
            .read_available(4, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(first, b"0.1\n");
    }

    #[tokio::test]
    async fn writes_reach_the_device() {
        let (connector, mut device) = LoopbackConnector::new();
        let mut transport = connector.open("loop", 9600).await.unwrap();
        transport.write(b"u\n").await.unwrap();

        let mut buf = [0u8; 8];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"u\n");
    }

    #[tokio::test]
    async fn device_hangup_is_a_transport_error() {
        let (connector, device) = LoopbackConnector::new();
        let mut transport = connector.open("loop", 9600).await.unwrap();
        drop(device);
        let err = transport
            .read_available(16, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::Transport(_)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_io() {
        let (connector, _device) = LoopbackConnector::new();
        let mut transport = connector.open("loop", 9600).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_open());
        assert!(transport.write(b"u\n").await.is_err());
    }

    #[tokio::test]
    async fn second_open_fails_like_a_busy_port() {
        let (connector, _device) = LoopbackConnector::new();
        let _first = connector.open("loop", 9600).await.unwrap();
        let err = connector.open("loop", 9600).await.err().unwrap();
        assert!(matches!(err, DaqError::Connection(_)));
        assert!(LoopbackConnector::unavailable()
            .open("COM9", 9600)
            .await
            .is_err());
    }
}
