use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, Utc};
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};

use super::Recorder;
use crate::frame::Frame;
use crate::PipelineError;

pub const DEFAULT_PREFIX: &str = "activity";
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const MANIFEST_FILE: &str = "segment.json";

/// Written next to the frames when a segment closes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentManifest {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub frames: u64,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

struct OpenSegment {
    name: String,
    dir: PathBuf,
    started_at: DateTime<Utc>,
    frames: u64,
    first_sequence: Option<u64>,
    last_sequence: Option<u64>,
    size: Option<(u32, u32)>,
}

/// Records each segment as a directory of numbered JPEG frames.
///
/// Layout: `<output_dir>/<prefix>_YYYYmmdd_HHMMSS/frame_000001.jpg ...` plus
/// `segment.json` once the segment is closed. A second segment opened within
/// the same second gets a `_2`, `_3`, ... suffix.
pub struct SegmentRecorder {
    output_dir: PathBuf,
    prefix: String,
    jpeg_quality: u8,
    current: Option<OpenSegment>,
    finished: Vec<PathBuf>,
}

impl SegmentRecorder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: DEFAULT_PREFIX.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            current: None,
            finished: Vec::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// JPEG quality, clamped to 1..=100.
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Directories of the segments closed so far, oldest first.
    pub fn finished_segments(&self) -> &[PathBuf] {
        &self.finished
    }

    /// Directory of the open segment, if any.
    pub fn current_segment(&self) -> Option<&Path> {
        self.current.as_ref().map(|segment| segment.dir.as_path())
    }

    fn allocate_dir(&self, now: DateTime<Local>) -> (String, PathBuf) {
        let base = format!("{}_{}", self.prefix, now.format("%Y%m%d_%H%M%S"));
        let mut name = base.clone();
        let mut n = 2;
        while self.output_dir.join(&name).exists() {
            name = format!("{base}_{n}");
            n += 1;
        }
        let dir = self.output_dir.join(&name);
        (name, dir)
    }

    fn write_frame(&self, path: &Path, frame: &Frame) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), self.jpeg_quality);
        encoder
            .encode_image(frame.image())
            .with_context(|| format!("failed to encode {}", path.display()))
    }
}

impl Recorder for SegmentRecorder {
    fn start_recording(&mut self) -> Result<()> {
        if let Some(open) = &self.current {
            return Err(anyhow!(PipelineError::recorder(format!(
                "segment {} is already open",
                open.name
            ))));
        }
        let (name, dir) = self.allocate_dir(Local::now());
        fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::recorder(format!("cannot create segment {}: {}", dir.display(), e))
        })?;
        log::info!("recording segment {}", dir.display());
        self.current = Some(OpenSegment {
            name,
            dir,
            started_at: Utc::now(),
            frames: 0,
            first_sequence: None,
            last_sequence: None,
            size: None,
        });
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<()> {
        let Some(open) = self.current.take() else {
            return Ok(());
        };
        let manifest = SegmentManifest {
            name: open.name,
            started_at: open.started_at,
            ended_at: Utc::now(),
            frames: open.frames,
            first_sequence: open.first_sequence,
            last_sequence: open.last_sequence,
            width: open.size.map(|(w, _)| w),
            height: open.size.map(|(_, h)| h),
        };
        let path = open.dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(&manifest)?;
        fs::write(&path, json).map_err(|e| {
            PipelineError::recorder(format!("cannot write {}: {}", path.display(), e))
        })?;
        log::info!(
            "segment saved: {} ({} frames)",
            open.dir.display(),
            manifest.frames
        );
        self.finished.push(open.dir);
        Ok(())
    }

    fn append_frame(&mut self, frame: &Frame) -> Result<()> {
        let Some(open) = &self.current else {
            return Ok(());
        };
        let path = open.dir.join(format!("frame_{:06}.jpg", open.frames + 1));
        self.write_frame(&path, frame)
            .map_err(|e| PipelineError::recorder(format!("{e:#}")))?;

        if let Some(open) = self.current.as_mut() {
            open.frames += 1;
            open.first_sequence.get_or_insert(frame.sequence());
            open.last_sequence = Some(frame.sequence());
            open.size.get_or_insert((frame.width(), frame.height()));
        }
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.current.is_some()
    }
}

impl Drop for SegmentRecorder {
    fn drop(&mut self) {
        if self.current.is_some() {
            if let Err(err) = self.stop_recording() {
                log::warn!("failed to close segment on drop: {err:#}");
            }
        }
    }
}
