//! Streaming telemetry pipeline
//!
//! Data flows one way through single-owner stages:
//!
//! ```text
//! transport bytes -> FrameDecoder -> classify -> WindowAggregator (+ ActivationDetector) -> WindowRecord
//! ```
//!
//! None of these stages synchronize; they are owned by the session's pipeline task.

pub mod activation;
pub mod classify;
pub mod frame;
pub mod window;

pub use activation::ActivationDetector;
pub use classify::{classify, ClassifiedLine, Sample, StatusKind};
pub use frame::{FrameDecoder, RawFrame};
pub use window::{WindowAggregator, WindowRecord};
