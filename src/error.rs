//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of errors that can occur while streaming telemetry from a current probe.
//!
//! ## Error Hierarchy
//!
//! - **Session-fatal**: `Connection`, `Transport`, `NoDataReceived` and
//!   `ErrorRateExceeded` end a session. The controller still runs its shutdown
//!   handshake before reporting them to the caller.
//! - **Line-level**: `MalformedLine` never escapes the pipeline. It is folded into the
//!   session error counter and only observed in aggregate.
//! - **Sink**: `SinkWrite` is logged and the affected record is dropped; capture goes on.
//! - **Setup**: `Config`, `Configuration`, `Io` and `Csv` cover configuration loading,
//!   validation and file handling outside the streaming loop.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types,
//! which keeps `?` usable throughout the crate.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(std::io::Error),

    #[error("No data samples received within {waited:?}")]
    NoDataReceived { waited: Duration },

    #[error("Malformed line: {0:?}")]
    MalformedLine(String),

    #[error(
        "Error rate too high: {errors} errors, last valid sample received {since_last_sample:?} ago"
    )]
    ErrorRateExceeded {
        errors: u64,
        since_last_sample: Duration,
    },

    #[error("Sink write error: {0}")]
    SinkWrite(String),

    #[error("Serial support not enabled. Rebuild with --features serial")]
    SerialFeatureDisabled,

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl DaqError {
    /// Whether this error terminates a streaming session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DaqError::MalformedLine(_) | DaqError::SinkWrite(_))
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_and_sink_errors_are_recoverable() {
        assert!(!DaqError::MalformedLine("abc".into()).is_fatal());
        assert!(!DaqError::SinkWrite("disk full".into()).is_fatal());
    }

    #[test]
    fn session_errors_are_fatal() {
        assert!(DaqError::Connection("no such port".into()).is_fatal());
        assert!(DaqError::NoDataReceived {
            waited: Duration::from_secs(1)
        }
        .is_fatal());
        assert!(DaqError::ErrorRateExceeded {
            errors: 101,
            since_last_sample: Duration::from_millis(600),
        }
        .is_fatal());
    }

    #[test]
    fn error_rate_message_mentions_counts() {
        let err = DaqError::ErrorRateExceeded {
            errors: 101,
            since_last_sample: Duration::from_millis(600),
        };
        let msg = err.to_string();
        assert!(msg.contains("101 errors"));
        assert!(msg.contains("600ms"));
    }
}
