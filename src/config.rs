use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::ingest::{SourceConfig, DEFAULT_TARGET_FPS};
use crate::pipeline::{PipelineConfig, DEFAULT_POP_TIMEOUT, DEFAULT_STOP_SECONDS};
use crate::queue::{DropPolicy, DEFAULT_QUEUE_CAPACITY};
use crate::record::{DEFAULT_JPEG_QUALITY, DEFAULT_PREFIX};

const DEFAULT_SOURCE_URL: &str = "stub://front_camera";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_MOTION_INPUT: (u32, u32) = (320, 240);
const DEFAULT_TRACT_INPUT: (u32, u32) = (640, 640);
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_MOTION_PIXEL_THRESHOLD: u8 = 25;
const DEFAULT_MOTION_MIN_AREA: f32 = 0.01;
const DEFAULT_OUTPUT_DIR: &str = "recordings";

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    source: Option<SourceConfigFile>,
    preprocess: Option<PreprocessConfigFile>,
    detector: Option<DetectorConfigFile>,
    recorder: Option<RecorderConfigFile>,
    notifier: Option<NotifierConfigFile>,
    pipeline: Option<PipelineConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    loop_playback: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PreprocessConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<DetectorBackend>,
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    motion_pixel_threshold: Option<u8>,
    motion_min_area: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RecorderConfigFile {
    output_dir: Option<PathBuf>,
    prefix: Option<String>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifierConfigFile {
    event_log: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    queue_capacity: Option<usize>,
    pop_timeout_ms: Option<u64>,
    stop_threshold: Option<u32>,
    drop_policy: Option<DropPolicy>,
}

/// Detector implementation to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    /// Frame differencing on the CPU.
    Motion,
    /// ONNX person detector (feature: backend-tract).
    Tract,
}

impl FromStr for DetectorBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "motion" => Ok(DetectorBackend::Motion),
            "tract" | "onnx" => Ok(DetectorBackend::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}' (expected motion or tract)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreprocessSettings {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorBackend,
    pub model_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub motion_pixel_threshold: u8,
    pub motion_min_area: f32,
}

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub output_dir: PathBuf,
    pub prefix: String,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Default)]
pub struct NotifierSettings {
    /// JSON-lines event log; log output only when unset.
    pub event_log: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub preprocess: PreprocessSettings,
    pub detector: DetectorSettings,
    pub recorder: RecorderSettings,
    pub notifier: NotifierSettings,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Load from the file named by `ACTIVITY_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ACTIVITY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit file path instead of `ACTIVITY_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => AppConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let source_file = file.source.unwrap_or_default();
        let source = SourceConfig {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            width: source_file.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            loop_playback: source_file.loop_playback.unwrap_or(false),
        };

        let detector_file = file.detector.unwrap_or_default();
        let backend = detector_file.backend.unwrap_or(DetectorBackend::Motion);
        let detector = DetectorSettings {
            backend,
            model_path: detector_file.model_path,
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE),
            motion_pixel_threshold: detector_file
                .motion_pixel_threshold
                .unwrap_or(DEFAULT_MOTION_PIXEL_THRESHOLD),
            motion_min_area: detector_file.motion_min_area.unwrap_or(DEFAULT_MOTION_MIN_AREA),
        };

        let (default_w, default_h) = default_input_size(backend);
        let preprocess_file = file.preprocess.unwrap_or_default();
        let preprocess = PreprocessSettings {
            width: preprocess_file.width.unwrap_or(default_w),
            height: preprocess_file.height.unwrap_or(default_h),
        };

        let recorder_file = file.recorder.unwrap_or_default();
        let recorder = RecorderSettings {
            output_dir: recorder_file
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            prefix: recorder_file
                .prefix
                .unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            jpeg_quality: recorder_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let notifier = NotifierSettings {
            event_log: file.notifier.and_then(|n| n.event_log),
        };

        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline = PipelineConfig {
            queue_capacity: pipeline_file.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            pop_timeout: pipeline_file
                .pop_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POP_TIMEOUT),
            stop_threshold: pipeline_file
                .stop_threshold
                .unwrap_or_else(|| default_stop_threshold(source.target_fps)),
            drop_policy: pipeline_file.drop_policy.unwrap_or_default(),
        };

        Self {
            source,
            preprocess,
            detector,
            recorder,
            notifier,
            pipeline,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_nonempty("ACTIVITY_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(fps) = env_nonempty("ACTIVITY_TARGET_FPS") {
            let fps: u32 = fps
                .parse()
                .map_err(|_| anyhow!("ACTIVITY_TARGET_FPS must be an integer"))?;
            self.set_target_fps(fps);
        }
        if let Some(dir) = env_nonempty("ACTIVITY_OUTPUT_DIR") {
            self.recorder.output_dir = PathBuf::from(dir);
        }
        if let Some(threshold) = env_nonempty("ACTIVITY_STOP_THRESHOLD") {
            self.pipeline.stop_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("ACTIVITY_STOP_THRESHOLD must be an integer frame count"))?;
        }
        if let Some(backend) = env_nonempty("ACTIVITY_DETECTOR") {
            self.set_detector_backend(backend.parse()?);
        }
        if let Some(path) = env_nonempty("ACTIVITY_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(capacity) = env_nonempty("ACTIVITY_QUEUE_CAPACITY") {
            self.pipeline.queue_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("ACTIVITY_QUEUE_CAPACITY must be an integer"))?;
        }
        if let Some(ms) = env_nonempty("ACTIVITY_POP_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| anyhow!("ACTIVITY_POP_TIMEOUT_MS must be an integer number of milliseconds"))?;
            self.pipeline.pop_timeout = Duration::from_millis(ms);
        }
        if let Some(policy) = env_nonempty("ACTIVITY_DROP_POLICY") {
            self.pipeline.drop_policy = policy.parse()?;
        }
        if let Some(path) = env_nonempty("ACTIVITY_EVENT_LOG") {
            self.notifier.event_log = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Change the frame rate. A stop threshold still at the old rate's
    /// default follows the new rate.
    pub fn set_target_fps(&mut self, fps: u32) {
        if self.pipeline.stop_threshold == default_stop_threshold(self.source.target_fps) {
            self.pipeline.stop_threshold = default_stop_threshold(fps);
        }
        self.source.target_fps = fps;
    }

    /// Change the detector. A pre-processing size still at the old backend's
    /// default follows the new backend.
    pub fn set_detector_backend(&mut self, backend: DetectorBackend) {
        let current = (self.preprocess.width, self.preprocess.height);
        if current == default_input_size(self.detector.backend) {
            let (width, height) = default_input_size(backend);
            self.preprocess = PreprocessSettings { width, height };
        }
        self.detector.backend = backend;
    }

    /// Check cross-field constraints. Call again after applying CLI overrides.
    pub fn validate(&mut self) -> Result<()> {
        self.source.url = self.source.url.trim().to_string();
        if self.source.url.is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.preprocess.width == 0 || self.preprocess.height == 0 {
            return Err(anyhow!("preprocess size must be non-zero"));
        }
        if !(self.detector.confidence_threshold > 0.0 && self.detector.confidence_threshold <= 1.0)
        {
            return Err(anyhow!("confidence_threshold must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.detector.motion_min_area) {
            return Err(anyhow!("motion_min_area must be in [0, 1]"));
        }
        if self.detector.backend == DetectorBackend::Tract && self.detector.model_path.is_none() {
            return Err(anyhow!("the tract detector requires detector.model_path"));
        }
        if !(1..=100).contains(&self.recorder.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(anyhow!("queue_capacity must be greater than zero"));
        }
        if self.pipeline.pop_timeout.is_zero() {
            return Err(anyhow!("pop_timeout_ms must be greater than zero"));
        }
        if self.pipeline.stop_threshold == 0 {
            return Err(anyhow!("stop_threshold must be at least 1"));
        }
        Ok(())
    }
}

/// Input size a backend expects when none is configured.
pub fn default_input_size(backend: DetectorBackend) -> (u32, u32) {
    match backend {
        DetectorBackend::Motion => DEFAULT_MOTION_INPUT,
        DetectorBackend::Tract => DEFAULT_TRACT_INPUT,
    }
}

/// Frames covering `DEFAULT_STOP_SECONDS` at `target_fps`.
pub fn default_stop_threshold(target_fps: u32) -> u32 {
    let fps = if target_fps == 0 {
        DEFAULT_TARGET_FPS
    } else {
        target_fps
    };
    fps.saturating_mul(DEFAULT_STOP_SECONDS).max(1)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
