//! Line classification for the CurrentRanger USB logging protocol.
//!
//! Every frame is strict 7-bit ASCII and is one of:
//! - a decimal floating-point amperage sample (e.g. `0.000123`, `1.5E-3`)
//! - a status line starting with `USB_LOGGING` (e.g. `USB_LOGGING_DISABLED`)
//!
//! Anything else is malformed. The wire format carries no timestamps, so the
//! arrival time is supplied by the caller.

use super::frame::RawFrame;
use chrono::{DateTime, Utc};

/// Prefix shared by every device status line.
pub const STATUS_PREFIX: &str = "USB_LOGGING";

/// Status line announcing that host logging was switched off.
pub const DISABLED_PREFIX: &str = "USB_LOGGING_DISABLED";

/// One decoded amperage reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Amperage in the device's unit scale
    pub value: f64,
    /// Wall-clock time the frame became available, captured before the read
    pub arrival: DateTime<Utc>,
}

/// Kind of a device status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// USB logging was disabled on the device; the host must re-enable it
    Disabled,
    /// Any other `USB_LOGGING*` notice
    Other,
}

/// Result of classifying one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedLine {
    Sample(Sample),
    StatusNotice(StatusKind),
    Malformed(String),
}

/// Classify a frame received at `arrival`.
pub fn classify(frame: &RawFrame, arrival: DateTime<Utc>) -> ClassifiedLine {
    if frame.is_oversized() {
        return ClassifiedLine::Malformed("<oversized frame>".to_string());
    }

    let bytes = frame.bytes();
    if !bytes.is_ascii() {
        return ClassifiedLine::Malformed(String::from_utf8_lossy(bytes).into_owned());
    }
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => return ClassifiedLine::Malformed(String::from_utf8_lossy(bytes).into_owned()),
    };

    if text.starts_with(STATUS_PREFIX) {
        let kind = if text.starts_with(DISABLED_PREFIX) {
            StatusKind::Disabled
        } else {
            StatusKind::Other
        };
        return ClassifiedLine::StatusNotice(kind);
    }

    // The device terminates lines with CRLF on some firmware
    match text.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => ClassifiedLine::Sample(Sample { value, arrival }),
        _ => ClassifiedLine::Malformed(text.to_string()),
    }
}
