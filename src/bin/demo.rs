//! demo - end-to-end synthetic run of the activity pipeline

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

use activity_detection::builder::build_components;
use activity_detection::config::AppConfig;
use activity_detection::record::{SegmentManifest, MANIFEST_FILE};
use activity_detection::{Pipeline, SyntheticSource};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds of synthetic video.
    #[arg(long, default_value_t = 8)]
    seconds: u64,
    /// Frames per second for the synthetic source.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Seconds per activity cycle (half quiet, half with motion).
    #[arg(long, default_value_t = 4)]
    cycle: u64,
    /// Output directory for recorded segments.
    #[arg(long, default_value = "demo_out")]
    out: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }

    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)?;

    stage("configure synthetic camera");
    let mut cfg = AppConfig::load_from(None)?;
    cfg.source.url = "stub://demo".to_string();
    cfg.set_target_fps(args.fps);
    cfg.recorder.output_dir = out_dir.clone();
    cfg.recorder.prefix = "demo".to_string();
    // One second of quiet closes a segment.
    cfg.pipeline.stop_threshold = args.fps;
    cfg.validate()?;

    let total_frames = args.seconds * args.fps as u64;
    let mut components = build_components(&cfg)?;
    components.source = Box::new(
        SyntheticSource::new(cfg.source.clone())
            .with_frame_limit(total_frames)
            .with_activity_period(args.cycle.max(1) * args.fps as u64),
    );

    stage("run pipeline");
    let report = Pipeline::new(components, cfg.pipeline.clone()).run()?;
    if let Some(failure) = report.failure() {
        return Err(anyhow!("demo pipeline faulted: {}", failure));
    }

    stage("collect segments");
    let segments = read_segments(&out_dir)?;

    println!("demo summary:");
    println!("  status: {:?}", report.status);
    println!("  elapsed: {:.1}s", report.elapsed.as_secs_f64());
    println!("  frames captured: {}", report.stats.frames_captured);
    println!("  frames processed: {}", report.stats.frames_processed);
    println!("  frames recorded: {}", report.stats.frames_recorded);
    println!(
        "  frames dropped: {} (capture) / {} (detection)",
        report.stats.capture_queue_dropped, report.stats.detection_queue_dropped
    );
    println!("  segments: {}", segments.len());
    for manifest in &segments {
        println!(
            "    {} frames={} sequences={:?}..{:?}",
            manifest.name, manifest.frames, manifest.first_sequence, manifest.last_sequence
        );
    }
    println!("next steps:");
    println!("  ls -la {}", out_dir.display());

    Ok(())
}

fn stage(msg: &str) {
    eprintln!("demo: {}", msg);
}

fn read_segments(out_dir: &Path) -> Result<Vec<SegmentManifest>> {
    let mut manifests = Vec::new();
    for entry in fs::read_dir(out_dir)? {
        let path = entry?.path().join(MANIFEST_FILE);
        if !path.is_file() {
            continue;
        }
        let raw = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        let manifest: SegmentManifest = serde_json::from_slice(&raw)
            .with_context(|| format!("parse {}", path.display()))?;
        manifests.push(manifest);
    }
    manifests.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.name.cmp(&b.name)));
    Ok(manifests)
}
