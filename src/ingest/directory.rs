use std::path::{Path, PathBuf};

use anyhow::Result;

use super::{FrameSource, Pacer, SourceConfig};
use crate::frame::Frame;
use crate::PipelineError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Replays still images from a local directory in file-name order.
pub struct DirectorySource {
    config: SourceConfig,
    pacer: Pacer,
    files: Vec<PathBuf>,
    cursor: usize,
    sequence: u64,
}

impl DirectorySource {
    pub fn new(config: SourceConfig) -> Self {
        let pacer = Pacer::new(config.target_fps);
        Self {
            config,
            pacer,
            files: Vec::new(),
            cursor: 0,
            sequence: 0,
        }
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.config.url)
    }

    /// Images found by `start`, in playback order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for DirectorySource {
    fn name(&self) -> &str {
        &self.config.url
    }

    fn start(&mut self) -> Result<()> {
        let dir = self.path().to_path_buf();
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            PipelineError::source_io(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| PipelineError::source_io(format!("{}: {}", dir.display(), e)))?
                .path();
            if path.is_file() && is_image(&path) {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(
                PipelineError::source_io(format!("no images found in {}", dir.display())).into(),
            );
        }

        log::info!(
            "DirectorySource: {} image(s) in {}{}",
            files.len(),
            dir.display(),
            if self.config.loop_playback { " (looping)" } else { "" }
        );
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        log::info!(
            "DirectorySource: {} stopped after {} frames",
            self.config.url,
            self.sequence
        );
        self.files.clear();
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.files.is_empty() {
            return Err(PipelineError::source_io(format!("{} is not started", self.config.url)).into());
        }
        if self.cursor >= self.files.len() {
            if !self.config.loop_playback {
                return Ok(None);
            }
            self.cursor = 0;
        }
        let path = &self.files[self.cursor];
        let image = image::open(path)
            .map_err(|e| PipelineError::source_io(format!("cannot decode {}: {}", path.display(), e)))?
            .to_rgb8();
        self.cursor += 1;

        self.pacer.wait();
        self.sequence += 1;
        Ok(Some(Frame::new(image, self.sequence)))
    }
}
