//! Per-second aggregation of amperage samples.
//!
//! Samples are bucketed by the wall-clock second in which they arrived. Windows are
//! opened lazily by the first sample of a second and finalized by the first sample of
//! a later second, so emission is driven by samples and never by a timer. Seconds
//! without samples produce no records.

use super::activation::ActivationDetector;
use super::classify::Sample;
use chrono::{DateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Finalized statistics for one wall-clock second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRecord {
    /// Second boundary the window belongs to
    pub start: DateTime<Utc>,
    /// `start` plus one second
    pub end: DateTime<Utc>,
    /// Arithmetic mean of every sample in the window
    pub mean_amperage: f64,
    /// Whether a debounced activation latched during the window
    pub activation: bool,
    /// Number of samples folded into the window (always >= 1)
    pub sample_count: u64,
}

#[derive(Debug, Clone)]
struct AggregationWindow {
    start: DateTime<Utc>,
    sum: f64,
    sample_count: u64,
}

impl AggregationWindow {
    fn open(start: DateTime<Utc>) -> Self {
        Self {
            start,
            sum: 0.0,
            sample_count: 0,
        }
    }
}

/// Buckets samples into one-second windows and tracks activation per window.
#[derive(Debug, Clone)]
pub struct WindowAggregator {
    window: Option<AggregationWindow>,
    detector: ActivationDetector,
}

impl WindowAggregator {
    /// Aggregator whose activation detector latches after `activation_threshold`
    /// net samples at or above `activation_value`.
    pub fn new(activation_threshold: u32, activation_value: f64) -> Self {
        Self {
            window: None,
            detector: ActivationDetector::new(activation_threshold, activation_value),
        }
    }

    /// Fold a sample in, returning the previous window if this sample started a new second.
    pub fn observe(&mut self, sample: &Sample) -> Option<WindowRecord> {
        let second = second_of(sample.arrival);

        let rolled_over = self.window.as_ref().is_some_and(|w| w.start != second);
        let finished = if rolled_over { self.finalize() } else { None };

        let window = self
            .window
            .get_or_insert_with(|| AggregationWindow::open(second));
        window.sum += sample.value;
        window.sample_count += 1;
        self.detector.observe(sample.value);

        finished
    }

    /// Finalize the open window early, e.g. on a requested stop.
    pub fn flush(&mut self) -> Option<WindowRecord> {
        self.finalize()
    }

    /// Start of the open window, if any sample has been observed since the last emission.
    pub fn open_window_start(&self) -> Option<DateTime<Utc>> {
        self.window.as_ref().map(|w| w.start)
    }

    /// Samples folded into the open window so far.
    pub fn open_sample_count(&self) -> u64 {
        self.window.as_ref().map_or(0, |w| w.sample_count)
    }

    fn finalize(&mut self) -> Option<WindowRecord> {
        let window = self.window.take()?;
        let activation = self.detector.latched();
        self.detector.reset();

        if window.sample_count == 0 {
            return None;
        }
        Some(WindowRecord {
            start: window.start,
            end: window.start + TimeDelta::seconds(1),
            mean_amperage: window.sum / window.sample_count as f64,
            activation,
            sample_count: window.sample_count,
        })
    }
}

fn second_of(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}
