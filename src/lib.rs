//! # Ranger DAQ Core Library
//!
//! This crate logs current-draw telemetry from a CurrentRanger probe streaming over USB
//! serial. The probe emits an unframed, newline-delimited ASCII stream; this library turns
//! it into one record per wall-clock second holding the mean amperage and whether a
//! solenoid activation was detected during that second.
//!
//! ## Crate Structure
//!
//! - **`pipeline`**: The streaming stages. `FrameDecoder` re-assembles lines split across
//!   reads, `classify` separates samples from status lines and garbage, `WindowAggregator`
//!   buckets samples per second and owns the debounced `ActivationDetector`.
//! - **`session`**: `SessionController` owns the transport, performs the device handshake,
//!   drives the read loop, applies the error-rate abort policy and always runs the
//!   shutdown handshake. `SessionHandle` lets a supervisor observe it and request a stop.
//! - **`transport`**: The `Transport`/`Connector` seam, a `tokio-serial` implementation and
//!   an in-memory loopback for simulation and tests.
//! - **`sink`**: Where finished records go, e.g. `HourlyCsvSink` for per-hour CSV files.
//! - **`summary`**: Per-hour consumption summaries over recorded files.
//! - **`config`**: Figment-based layered configuration.
//! - **`error`**: The crate-wide `DaqError`.
//! - **`tracing_init`**: Subscriber setup for the binary.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod sink;
pub mod summary;
pub mod tracing_init;
pub mod transport;

pub use config::{AppConfig, SessionConfig};
pub use error::{AppResult, DaqError};
pub use session::{SessionController, SessionHandle, SessionReport, SessionState};
