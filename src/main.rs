//! Houndwatch: live dog behaviour analysis over a video source

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use houndwatch::services::{FileStore, HttpAnalyzer, HttpDetector, Services};
use houndwatch::{Config, Pipeline};

#[derive(Debug, Parser)]
#[command(name = "houndwatch", version, about)]
struct Args {
    /// MJPEG URL, .mjpeg file, image directory, RTSP URL or /dev/videoN
    source: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How often the status line is logged
    #[arg(long, default_value_t = 5_000)]
    status_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("houndwatch=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    let source = args
        .source
        .or_else(|| config.capture.source.clone())
        .ok_or_else(|| eyre!("no source given on the command line or in capture.source"))?;

    info!("Houndwatch launching on {}", source);

    let services = Services::new(
        HttpDetector::new(config.detector.clone()),
        HttpAnalyzer::new(config.analyzer.clone()),
        FileStore::new(&config.store),
    );
    let mut pipeline = Pipeline::with_default_sources(config, services);
    pipeline.start(&source)?;

    let mut ticker = tokio::time::interval(Duration::from_millis(args.status_interval_ms.max(100)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
            _ = ticker.tick() => {
                report_status(&pipeline);
                if !pipeline.is_running() {
                    break;
                }
            }
        }
    }

    // Blocking HTTP clients must be dropped off the async workers
    let reason = tokio::task::block_in_place(move || {
        pipeline.stop();
        let reason = pipeline.stop_reason();
        drop(pipeline);
        reason
    });

    match reason {
        Some(reason) if reason.is_failure() => {
            warn!("Pipeline ended: {}", reason);
            Err(eyre!("pipeline ended: {}", reason))
        }
        Some(reason) => {
            info!("Houndwatch shutting down: {}", reason);
            Ok(())
        }
        None => Ok(()),
    }
}

fn report_status(pipeline: &Pipeline) {
    let (_, classification) = pipeline.latest();
    let last_processed = pipeline
        .last_processed_at()
        .map(|ts| ts.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "N/A".into());
    let classification = classification
        .map(|result| format!("{} ({})", result.classification, result.reason))
        .unwrap_or_else(|| "none".into());

    if pipeline.is_running() {
        info!(
            frames = pipeline.frame_count(),
            last_processed = %last_processed,
            classification = %classification,
            "System active"
        );
    } else {
        info!(reason = ?pipeline.stop_reason(), "System idle");
    }
}
