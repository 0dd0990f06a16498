//! CLI Entry Point for ranger-daq
//!
//! Provides command-line interface for:
//! - Logging a CurrentRanger probe to per-hour CSV files until Ctrl+C
//! - Summarizing recorded hourly files into one consumption table
//!
//! # Usage
//!
//! Log a device:
//! ```bash
//! ranger-daq log --device FPS-07 --port /dev/ttyACM0 --output ./bench
//! ```
//!
//! Summarize a recording directory:
//! ```bash
//! ranger-daq summarize ./bench/CurrentRanger --out consumption.csv
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ranger_daq::config::AppConfig;
use ranger_daq::sink::HourlyCsvSink;
use ranger_daq::summary;
use ranger_daq::tracing_init::{self, OutputFormat, TracingConfig};
use ranger_daq::transport::SerialConnector;
use ranger_daq::SessionController;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "ranger-daq")]
#[command(about = "CurrentRanger current-draw logger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a probe into per-hour CSV files until interrupted
    Log {
        /// Device name used as the prefix of every output file
        #[arg(long)]
        device: Option<String>,

        /// Serial port of the probe (e.g. /dev/ttyACM0, COM3)
        #[arg(long)]
        port: Option<String>,

        /// Output root; records go to <output>/CurrentRanger/
        #[arg(long)]
        output: Option<PathBuf>,

        /// Baud rate override
        #[arg(long)]
        baud: Option<u32>,

        /// Optional TOML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Console log format
        #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
        log_format: LogFormat,
    },

    /// Average every hourly record file in a directory
    Summarize {
        /// Directory holding the hourly CSV files
        dir: PathBuf,

        /// Output file (default: <dir>/consumption.csv)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormat> for OutputFormat {
    fn from(value: LogFormat) -> Self {
        match value {
            LogFormat::Pretty => OutputFormat::Pretty,
            LogFormat::Compact => OutputFormat::Compact,
            LogFormat::Json => OutputFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Log {
            device,
            port,
            output,
            baud,
            config,
            log_format,
        } => {
            let mut app = AppConfig::load_from(config.as_ref())?;
            if let Some(device) = device {
                app.logger.device = device;
            }
            if let Some(port) = port {
                app.session.port = port;
            }
            if let Some(output) = output {
                app.logger.output_dir = output;
            }
            if let Some(baud) = baud {
                app.session.baud_rate = baud;
            }
            app.validate()?;

            let tracing_config = TracingConfig::from_logger_config(&app.logger)
                .map_err(anyhow::Error::msg)?
                .with_format(log_format.into());
            tracing_init::init(tracing_config).map_err(anyhow::Error::msg)?;

            run_logger(app).await
        }
        Commands::Summarize { dir, out } => {
            tracing_init::init(TracingConfig::default()).map_err(anyhow::Error::msg)?;
            run_summary(dir, out)
        }
    }
}

async fn run_logger(app: AppConfig) -> Result<()> {
    let sink = HourlyCsvSink::new(&app.logger.output_dir, app.logger.device.clone())
        .context("Failed to prepare output directory")?;
    println!("Recording to {}", sink.dir().display());

    let (controller, handle) = SessionController::new(app.session, SerialConnector, Box::new(sink));
    let task = tokio::spawn(controller.run());

    print!("Initializing data capture...");
    std::io::stdout().flush()?;
    if !handle.wait_for_startup().await {
        println!(" FAILED");
        // The session task carries the actual cause
        let report = task.await?;
        report?;
        anyhow::bail!("session ended before streaming started");
    }
    println!(" OK");
    println!("Logging - Press Ctrl+C to stop");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Terminated by user");
            handle.request_stop();
        }
        _ = handle.wait_for_close() => {}
    }

    let report = task.await??;
    println!(
        "Session closed: {} samples, {} malformed lines, {} records written ({} dropped)",
        report.samples, report.errors, report.windows_emitted, report.windows_dropped
    );
    Ok(())
}

fn run_summary(dir: PathBuf, out: Option<PathBuf>) -> Result<()> {
    let out = out.unwrap_or_else(|| dir.join("consumption.csv"));
    let summaries = summary::summarize_dir(&dir, Some(&out))
        .with_context(|| format!("Failed to read {}", dir.display()))?;
    summary::write_summary(&out, &summaries)?;

    for s in &summaries {
        println!(
            "{:.9} A over {} windows ({} activations)  {}",
            s.mean_amperage,
            s.windows,
            s.activations,
            s.file.display()
        );
    }
    println!("Wrote {} summaries to {}", summaries.len(), out.display());
    Ok(())
}
