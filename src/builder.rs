//! Explicit wiring from `AppConfig` to pipeline collaborators.

use anyhow::Result;

use crate::config::{AppConfig, DetectorBackend};
use crate::detect::{Detector, MotionConfig, MotionDetector, PreProcessor, ResizePreProcessor};
use crate::ingest::{DirectorySource, FrameSource, SourceConfig, SourceKind, SyntheticSource};
use crate::notify::{EventLogNotifier, LogNotifier, Notifier, NotifierSet};
use crate::pipeline::{Components, Pipeline};
use crate::record::{Recorder, SegmentRecorder};

/// Pick a source by location: `stub://` is synthetic, other schemes are
/// streams, plain paths are image directories.
pub fn build_source(cfg: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    match SourceKind::for_url(&cfg.url) {
        SourceKind::Synthetic => Ok(Box::new(SyntheticSource::new(cfg.clone()))),
        SourceKind::Directory => Ok(Box::new(DirectorySource::new(cfg.clone()))),
        SourceKind::Stream => {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Box::new(crate::ingest::StreamSource::new(cfg.clone())?))
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!(
                    "stream source {} requires the rtsp-gstreamer feature",
                    cfg.url
                )
            }
        }
    }
}

pub fn build_preprocessor(cfg: &AppConfig) -> Result<Box<dyn PreProcessor>> {
    Ok(Box::new(ResizePreProcessor::new(
        cfg.preprocess.width,
        cfg.preprocess.height,
    )?))
}

pub fn build_detector(cfg: &AppConfig) -> Result<Box<dyn Detector>> {
    match cfg.detector.backend {
        DetectorBackend::Motion => Ok(Box::new(MotionDetector::new(MotionConfig {
            pixel_threshold: cfg.detector.motion_pixel_threshold,
            min_area: cfg.detector.motion_min_area,
        }))),
        DetectorBackend::Tract => {
            #[cfg(feature = "backend-tract")]
            {
                use anyhow::anyhow;
                use crate::detect::{TractConfig, TractDetector};

                let model_path = cfg
                    .detector
                    .model_path
                    .clone()
                    .ok_or_else(|| anyhow!("the tract detector requires detector.model_path"))?;
                let mut tract =
                    TractConfig::new(model_path, cfg.preprocess.width, cfg.preprocess.height);
                tract.confidence_threshold = cfg.detector.confidence_threshold;
                Ok(Box::new(TractDetector::new(tract)?))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                anyhow::bail!("the tract detector requires the backend-tract feature")
            }
        }
    }
}

pub fn build_recorder(cfg: &AppConfig) -> Box<dyn Recorder> {
    Box::new(
        SegmentRecorder::new(&cfg.recorder.output_dir)
            .with_prefix(cfg.recorder.prefix.clone())
            .with_jpeg_quality(cfg.recorder.jpeg_quality),
    )
}

/// Log notifier, plus a JSON-lines event log when configured.
pub fn build_notifier(cfg: &AppConfig) -> Result<Box<dyn Notifier>> {
    let mut set = NotifierSet::new().with(Box::new(LogNotifier::labelled(cfg.source.url.clone())));
    if let Some(path) = &cfg.notifier.event_log {
        set.push(Box::new(EventLogNotifier::open(path)?));
    }
    Ok(Box::new(set))
}

pub fn build_components(cfg: &AppConfig) -> Result<Components> {
    Ok(Components {
        source: build_source(&cfg.source)?,
        preprocessor: build_preprocessor(cfg)?,
        detector: build_detector(cfg)?,
        recorder: build_recorder(cfg),
        notifier: build_notifier(cfg)?,
    })
}

pub fn build_pipeline(cfg: &AppConfig) -> Result<Pipeline> {
    Ok(Pipeline::new(build_components(cfg)?, cfg.pipeline.clone()))
}
