//! Streaming session controller for the CurrentRanger current probe.
//!
//! One pipeline task owns the transport and runs every stage strictly in order:
//! read, frame, classify, aggregate, emit. A supervisor observes progress through a
//! [`SessionHandle`], whose only write is the cooperative stop flag.
//!
//! # State machine
//!
//! ```text
//! Connecting --first sample--> Streaming --stop / read failure / error rate--> Draining --> Closed
//!      |                                                                          ^
//!      +------------- open failure / no data within startup bound ---------------+
//! ```
//!
//! Every exit path after the port opened goes through `Draining`: the device is told
//! to stop USB logging (best effort) and the transport is released.
//!
//! # Device protocol
//!
//! | Command | Meaning                                       |
//! |---------|-----------------------------------------------|
//! | `5\n`   | bias reading on, so auto-ranging stays active |
//! | `6\n`   | auto-ranging                                  |
//! | `u\n`   | toggle USB host logging                       |

use crate::config::SessionConfig;
use crate::error::{AppResult, DaqError};
use crate::pipeline::{classify, ClassifiedLine, FrameDecoder, RawFrame, StatusKind, WindowAggregator, WindowRecord};
use crate::sink::WindowSink;
use crate::transport::{Connector, Transport};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Commands sent once the port is open, in order.
pub const STARTUP_COMMANDS: [&[u8]; 3] = [b"5\n", b"6\n", b"u\n"];

/// Toggles USB host logging; re-enables after a disabled notice and stops at shutdown.
pub const USB_LOGGING_COMMAND: &[u8] = b"u\n";

// A malformed line is logged at warn level once every this many errors
const MALFORMED_WARN_EVERY: u64 = 25;

/// Lifecycle of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Streaming = 1,
    Draining = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Streaming,
            2 => SessionState::Draining,
            _ => SessionState::Closed,
        }
    }

    /// Whether the session has finished or is shutting down.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Draining | SessionState::Closed)
    }
}

// Written by the pipeline task, read by supervisors. Only `stop_requested`
// is written from outside.
#[derive(Debug)]
struct SharedStatus {
    state: AtomicU8,
    sample_count: AtomicU64,
    error_count: AtomicU64,
    // Unix millis of the last good sample, i64::MIN when none yet
    last_sample_ms: AtomicI64,
    stop_requested: AtomicBool,
}

impl SharedStatus {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Connecting as u8),
            sample_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_sample_ms: AtomicI64::new(i64::MIN),
            stop_requested: AtomicBool::new(false),
        }
    }

    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Read-only view of a running session, plus the stop request.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    status: Arc<SharedStatus>,
    poll_interval: Duration,
}

impl SessionHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.status.state()
    }

    /// Samples classified so far.
    pub fn sample_count(&self) -> u64 {
        self.status.sample_count.load(Ordering::Acquire)
    }

    /// Malformed lines seen so far.
    pub fn error_count(&self) -> u64 {
        self.status.error_count.load(Ordering::Acquire)
    }

    /// Arrival time of the most recent sample.
    pub fn last_sample_time(&self) -> Option<DateTime<Utc>> {
        match self.status.last_sample_ms.load(Ordering::Acquire) {
            i64::MIN => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Ask the pipeline to stop after the frames it is currently routing.
    pub fn request_stop(&self) {
        self.status.stop_requested.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.status.stop_requested.load(Ordering::Acquire)
    }

    /// Poll until the session starts streaming or ends.
    ///
    /// Returns true once the first sample arrived. The pipeline enforces the startup
    /// bound itself, so this always returns once the port open completes.
    pub async fn wait_for_startup(&self) -> bool {
        loop {
            match self.state() {
                SessionState::Streaming => return true,
                state if state.is_terminal() => return false,
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    /// Poll until the session is closed.
    pub async fn wait_for_close(&self) {
        while self.state() != SessionState::Closed {
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Totals for a session that ended on request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Samples classified
    pub samples: u64,
    /// Malformed lines
    pub errors: u64,
    /// Records accepted by the sink
    pub windows_emitted: u64,
    /// Records the sink failed to persist
    pub windows_dropped: u64,
}

/// Owns the transport and drives the telemetry pipeline.
pub struct SessionController<C: Connector> {
    config: SessionConfig,
    connector: C,
    sink: Box<dyn WindowSink>,
    status: Arc<SharedStatus>,
    decoder: FrameDecoder,
    aggregator: WindowAggregator,
    last_sample: Option<Instant>,
    report: SessionReport,
}

impl<C: Connector> SessionController<C> {
    /// Build a controller and the handle a supervisor uses to observe it.
    pub fn new(config: SessionConfig, connector: C, sink: Box<dyn WindowSink>) -> (Self, SessionHandle) {
        let status = Arc::new(SharedStatus::new());
        let handle = SessionHandle {
            status: status.clone(),
            poll_interval: config.startup_poll_interval,
        };
        let controller = Self {
            decoder: FrameDecoder::with_max_frame_len(config.max_frame_len),
            aggregator: WindowAggregator::new(config.activation_threshold, config.activation_value),
            config,
            connector,
            sink,
            status,
            last_sample: None,
            report: SessionReport::default(),
        };
        (controller, handle)
    }

    /// Run the session to completion.
    ///
    /// Returns the report when the session ended on a stop request, and the fatal
    /// error otherwise. The shutdown handshake has run either way.
    #[instrument(name = "session", skip_all, fields(port = %self.config.port))]
    pub async fn run(mut self) -> AppResult<SessionReport> {
        self.status.set_state(SessionState::Connecting);
        info!(
            baud = self.config.baud_rate,
            "Trying to connect to port '{}'", self.config.port
        );

        let mut transport = match self
            .connector
            .open(&self.config.port, self.config.baud_rate)
            .await
        {
            Ok(transport) => transport,
            Err(e) => {
                error!(error = %e, "Error connecting to serial port");
                self.status.set_state(SessionState::Closed);
                return Err(e);
            }
        };
        info!("Connected to {} at baud {}", self.config.port, self.config.baud_rate);

        let result = self.stream(&mut transport).await;
        self.shutdown(&mut transport).await;

        match result {
            Ok(()) => {
                info!(
                    samples = self.report.samples,
                    errors = self.report.errors,
                    windows = self.report.windows_emitted,
                    "session stopped"
                );
                Ok(self.report)
            }
            Err(e) => {
                error!(error = %e, samples = self.report.samples, "session aborted");
                Err(e)
            }
        }
    }

    async fn stream(&mut self, transport: &mut C::Transport) -> AppResult<()> {
        for command in STARTUP_COMMANDS {
            transport.write(command).await?;
        }
        transport.discard_input().await?;

        let started = Instant::now();
        info!("Starting USB streaming loop");

        loop {
            if self.status.stop_requested.load(Ordering::Acquire) {
                info!("stop requested");
                if let Some(record) = self.aggregator.flush() {
                    self.emit(record);
                }
                return Ok(());
            }

            // Captured before the read; best match for when the bytes were produced
            let arrival = Utc::now();
            let chunk = transport
                .read_available(self.config.read_chunk_size, self.read_timeout(started))
                .await?;

            if !chunk.is_empty() {
                self.decoder.push_bytes(&chunk);
                while let Some(frame) = self.decoder.try_extract_frame() {
                    self.route(frame, arrival, transport, started).await?;
                }
            }

            self.check_startup(started)?;
            self.check_error_rate(started)?;
        }
    }

    async fn route(
        &mut self,
        frame: RawFrame,
        arrival: DateTime<Utc>,
        transport: &mut C::Transport,
        started: Instant,
    ) -> AppResult<()> {
        match classify(&frame, arrival) {
            ClassifiedLine::Sample(sample) => {
                self.report.samples += 1;
                self.last_sample = Some(Instant::now());
                self.status
                    .sample_count
                    .store(self.report.samples, Ordering::Release);
                self.status
                    .last_sample_ms
                    .store(sample.arrival.timestamp_millis(), Ordering::Release);

                if self.status.state() == SessionState::Connecting {
                    info!("Data capture initialized");
                    self.status.set_state(SessionState::Streaming);
                }

                if let Some(record) = self.aggregator.observe(&sample) {
                    self.emit(record);
                }
            }
            ClassifiedLine::StatusNotice(StatusKind::Disabled) => {
                // Left disabled by another process or instance
                info!("USB logging was disabled, re-enabling");
                transport.write(USB_LOGGING_COMMAND).await?;
            }
            ClassifiedLine::StatusNotice(StatusKind::Other) => {
                debug!("device status notice");
            }
            ClassifiedLine::Malformed(text) => {
                self.report.errors += 1;
                self.status
                    .error_count
                    .store(self.report.errors, Ordering::Release);
                let err = DaqError::MalformedLine(text);
                if self.report.errors % MALFORMED_WARN_EVERY == 1 {
                    warn!(errors = self.report.errors, "Invalid data format: {}", err);
                } else {
                    debug!(errors = self.report.errors, "Invalid data format: {}", err);
                }
                self.check_error_rate(started)?;
            }
        }
        Ok(())
    }

    // Until the first sample, no read may outlast the startup bound
    fn read_timeout(&self, started: Instant) -> Duration {
        if self.report.samples > 0 {
            return self.config.read_timeout;
        }
        let remaining = self
            .config
            .startup_timeout
            .saturating_sub(started.elapsed());
        self.config.read_timeout.min(remaining)
    }

    fn check_startup(&self, started: Instant) -> AppResult<()> {
        if self.report.samples == 0 && started.elapsed() >= self.config.startup_timeout {
            error!("No data samples received. Aborting");
            return Err(DaqError::NoDataReceived {
                waited: started.elapsed(),
            });
        }
        Ok(())
    }

    // Many errors alone are tolerated while samples keep flowing; only sustained
    // errors with a stale last sample mean the link failed.
    fn check_error_rate(&self, started: Instant) -> AppResult<()> {
        if self.report.errors <= self.config.error_count_limit {
            return Ok(());
        }
        let since_last_sample = self.last_sample.unwrap_or(started).elapsed();
        if since_last_sample > self.config.data_timeout_threshold {
            error!(
                errors = self.report.errors,
                "Aborting. Error rate is too high, last valid sample received {:?} ago",
                since_last_sample
            );
            return Err(DaqError::ErrorRateExceeded {
                errors: self.report.errors,
                since_last_sample,
            });
        }
        Ok(())
    }

    fn emit(&mut self, record: WindowRecord) {
        match self.sink.write(&record) {
            Ok(()) => self.report.windows_emitted += 1,
            Err(e) => {
                warn!(error = %e, start = %record.start, "dropping window record");
                self.report.windows_dropped += 1;
            }
        }
    }

    async fn shutdown(&mut self, transport: &mut C::Transport) {
        self.status.set_state(SessionState::Draining);

        info!("Telling device to stop USB streaming");
        if let Err(e) = transport.write(USB_LOGGING_COMMAND).await {
            // The link may already be gone
            warn!(error = %e, "Was not able to cleanly disconnect from the device");
        }
        if let Err(e) = transport.close().await {
            warn!(error = %e, "error while closing transport");
        }

        self.status.set_state(SessionState::Closed);
        info!("Serial streaming terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;
    use crate::transport::LoopbackConnector;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            SessionState::Connecting,
            SessionState::Streaming,
            SessionState::Draining,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from_u8(state as u8), state);
        }
        assert!(SessionState::Closed.is_terminal());
        assert!(!SessionState::Streaming.is_terminal());
    }

    #[test]
    fn new_handle_reports_initial_status() {
        let (connector, _device) = LoopbackConnector::new();
        let (sink, _rx) = ChannelSink::new();
        let (_controller, handle) =
            SessionController::new(SessionConfig::for_port("loop"), connector, Box::new(sink));

        assert_eq!(handle.state(), SessionState::Connecting);
        assert_eq!(handle.sample_count(), 0);
        assert_eq!(handle.error_count(), 0);
        assert!(handle.last_sample_time().is_none());
        assert!(!handle.stop_requested());

        handle.clone().request_stop();
        assert!(handle.stop_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_closes_without_streaming() {
        let (sink, _rx) = ChannelSink::new();
        let (controller, handle) = SessionController::new(
            SessionConfig::for_port("COM9"),
            LoopbackConnector::unavailable(),
            Box::new(sink),
        );

        let err = controller.run().await.unwrap_err();
        assert!(matches!(err, DaqError::Connection(_)));
        assert_eq!(handle.state(), SessionState::Closed);
        assert!(!handle.wait_for_startup().await);
    }
}
