//! activityd - single-camera activity recorder
//!
//! This daemon:
//! 1. Loads configuration (file named by ACTIVITY_CONFIG, env, CLI flags)
//! 2. Builds the frame source, detector, recorder and notifiers
//! 3. Runs the capture -> processing -> recording pipeline
//! 4. Stops cleanly on Ctrl-C, closing any open recording

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use activity_detection::builder::build_pipeline;
use activity_detection::config::{AppConfig, DetectorBackend};
use activity_detection::{DropPolicy, RunStatus};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (.toml or .json).
    #[arg(long, env = "ACTIVITY_CONFIG")]
    config: Option<PathBuf>,
    /// Source: stub://name, an image directory, or a stream URL.
    #[arg(long)]
    source: Option<String>,
    /// Frames per second to capture.
    #[arg(long)]
    fps: Option<u32>,
    /// Detector backend (motion or tract).
    #[arg(long)]
    detector: Option<DetectorBackend>,
    /// ONNX model for the tract backend.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Directory that receives recorded segments.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Consecutive frames without activity before a recording stops.
    #[arg(long)]
    stop_threshold: Option<u32>,
    /// drop_newest or drop_oldest.
    #[arg(long)]
    drop_policy: Option<DropPolicy>,
    /// Append activity events as JSON lines to this file.
    #[arg(long)]
    event_log: Option<PathBuf>,
}

impl Args {
    fn apply(self, cfg: &mut AppConfig) -> Result<()> {
        if let Some(source) = self.source {
            cfg.source.url = source;
        }
        if let Some(fps) = self.fps {
            cfg.set_target_fps(fps);
        }
        if let Some(backend) = self.detector {
            cfg.set_detector_backend(backend);
        }
        if let Some(model) = self.model {
            cfg.detector.model_path = Some(model);
        }
        if let Some(dir) = self.output_dir {
            cfg.recorder.output_dir = dir;
        }
        if let Some(threshold) = self.stop_threshold {
            cfg.pipeline.stop_threshold = threshold;
        }
        if let Some(policy) = self.drop_policy {
            cfg.pipeline.drop_policy = policy;
        }
        if let Some(path) = self.event_log {
            cfg.notifier.event_log = Some(path);
        }
        cfg.validate()
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = AppConfig::load_from(args.config.as_deref())?;
    args.apply(&mut cfg)?;

    log::info!(
        "activityd {} source={} detector={:?} output={}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.url,
        cfg.detector.backend,
        cfg.recorder.output_dir.display()
    );

    let pipeline = build_pipeline(&cfg)?;
    let signal = pipeline.shutdown_signal();
    ctrlc::set_handler(move || signal.request_stop()).context("error setting Ctrl-C handler")?;

    let running = pipeline.start()?;
    let mut last_health_log = Instant::now();
    while !running.is_finished() {
        std::thread::sleep(Duration::from_millis(200));
        if last_health_log.elapsed() >= HEALTH_INTERVAL {
            let stats = running.stats();
            log::info!(
                "health: captured={} processed={} recorded={} segments={} queue_a={}/{} (dropped {}) queue_b={}/{} (dropped {})",
                stats.frames_captured,
                stats.frames_processed,
                stats.frames_recorded,
                stats.segments_started,
                stats.capture_queue_len,
                cfg.pipeline.queue_capacity,
                stats.capture_queue_dropped,
                stats.detection_queue_len,
                cfg.pipeline.queue_capacity,
                stats.detection_queue_dropped
            );
            last_health_log = Instant::now();
        }
    }

    let report = running.join();
    match report.status {
        RunStatus::Faulted(failure) => Err(anyhow!(
            "activityd stopped on {} ({})",
            failure,
            failure.kind.code()
        )),
        status => {
            log::info!("activityd stopped: {:?}", status);
            Ok(())
        }
    }
}
