//! Destinations for finalized window records.
//!
//! A failing sink never stops capture: the session logs the error and drops the record.

use crate::error::{AppResult, DaqError};
use crate::pipeline::WindowRecord;
use chrono::{Local, SecondsFormat};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::info;

/// Sub-directory of the output root that receives the hourly files.
pub const RECORD_SUBDIR: &str = "CurrentRanger";

/// Receives one record per finalized window.
pub trait WindowSink: Send {
    /// Persist or forward a record.
    fn write(&mut self, record: &WindowRecord) -> AppResult<()>;
}

/// Appends records to one CSV file per device and local hour.
///
/// Rows are `start,end,mean_amperage,activation` with RFC 3339 timestamps, written to
/// `<root>/CurrentRanger/<device> - YYYYMMDDHH.csv`.
#[derive(Debug)]
pub struct HourlyCsvSink {
    dir: PathBuf,
    device: String,
    current: Option<PathBuf>,
}

impl HourlyCsvSink {
    /// Sink writing under `root`, creating the record directory if needed.
    pub fn new(root: impl AsRef<Path>, device: impl Into<String>) -> AppResult<Self> {
        let dir = root.as_ref().join(RECORD_SUBDIR);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            device: device.into(),
            current: None,
        })
    }

    /// Directory holding the hourly files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that a record starting at `record.start` belongs to.
    pub fn path_for(&self, record: &WindowRecord) -> PathBuf {
        let hour = record.start.with_timezone(&Local).format("%Y%m%d%H");
        self.dir.join(format!("{} - {}.csv", self.device, hour))
    }

    fn append(&self, path: &Path, record: &WindowRecord) -> Result<(), csv::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record([
            record.start.to_rfc3339_opts(SecondsFormat::Millis, true),
            record.end.to_rfc3339_opts(SecondsFormat::Millis, true),
            record.mean_amperage.to_string(),
            record.activation.to_string(),
        ])?;
        writer.flush()?;
        Ok(())
    }
}

impl WindowSink for HourlyCsvSink {
    fn write(&mut self, record: &WindowRecord) -> AppResult<()> {
        let path = self.path_for(record);
        self.append(&path, record)
            .map_err(|e| DaqError::SinkWrite(format!("{}: {}", path.display(), e)))?;

        if self.current.as_deref() != Some(path.as_path()) {
            info!(file = %path.display(), "writing window records");
            self.current = Some(path);
        }
        Ok(())
    }
}

/// Forwards records over a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WindowRecord>,
}

impl ChannelSink {
    /// Sink plus the receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WindowRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl WindowSink for ChannelSink {
    fn write(&mut self, record: &WindowRecord) -> AppResult<()> {
        self.tx
            .send(record.clone())
            .map_err(|_| DaqError::SinkWrite("record receiver dropped".into()))
    }
}
