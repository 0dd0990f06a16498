//! Per-hour consumption summaries over recorded CSV files.
//!
//! Each hourly file written by [`HourlyCsvSink`](crate::sink::HourlyCsvSink) is reduced
//! to its average amperage, its window count and the number of windows with an
//! activation. Files that cannot be parsed are skipped with a warning.

use crate::error::{AppResult, DaqError};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reduction of one hourly record file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourSummary {
    /// Mean of the per-second mean amperages in the file
    pub mean_amperage: f64,
    /// Number of window records
    pub windows: usize,
    /// Windows in which an activation latched
    pub activations: usize,
    /// Source file
    pub file: PathBuf,
}

/// Summarize every `*.csv` file in `dir`, in file-name order.
///
/// `exclude` lets the caller keep a summary written into the same directory out of
/// its own input.
pub fn summarize_dir(dir: impl AsRef<Path>, exclude: Option<&Path>) -> AppResult<Vec<HourSummary>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")))
        .filter(|path| !exclude.is_some_and(|ex| same_file(ex, path)))
        .collect();
    files.sort();

    let mut summaries = Vec::with_capacity(files.len());
    for file in files {
        match summarize_file(&file) {
            Ok(Some(summary)) => summaries.push(summary),
            Ok(None) => debug!(file = %file.display(), "no records, skipping"),
            Err(e) => warn!(file = %file.display(), error = %e, "skipping unreadable record file"),
        }
    }
    Ok(summaries)
}

/// Summarize one record file; `None` if it holds no records.
pub fn summarize_file(path: impl AsRef<Path>) -> AppResult<Option<HourSummary>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut sum = 0.0;
    let mut windows = 0usize;
    let mut activations = 0usize;
    for row in reader.records() {
        let row = row?;
        let mean: f64 = row
            .get(2)
            .and_then(|field| field.parse().ok())
            .ok_or_else(|| malformed(path, windows + 1))?;
        let activation = match row.get(3) {
            Some(flag) if flag.eq_ignore_ascii_case("true") => true,
            Some(flag) if flag.eq_ignore_ascii_case("false") => false,
            _ => return Err(malformed(path, windows + 1)),
        };

        sum += mean;
        windows += 1;
        activations += usize::from(activation);
    }

    if windows == 0 {
        return Ok(None);
    }
    Ok(Some(HourSummary {
        mean_amperage: sum / windows as f64,
        windows,
        activations,
        file: path.to_path_buf(),
    }))
}

/// Write summaries as CSV with a header row.
pub fn write_summary(path: impl AsRef<Path>, summaries: &[HourSummary]) -> AppResult<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for summary in summaries {
        writer.serialize(summary)?;
    }
    writer.flush()?;
    Ok(())
}

fn malformed(path: &Path, row: usize) -> DaqError {
    DaqError::MalformedLine(format!(
        "{}: row {} is not a window record",
        path.display(),
        row
    ))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
