use anyhow::Result;
use image::{Rgb, RgbImage};
use rand::Rng;

use super::{FrameSource, Pacer, SourceConfig};
use crate::frame::Frame;
use crate::PipelineError;

const BACKGROUND: u8 = 96;
const NOISE: i16 = 4;
const BLOCK_COLOR: Rgb<u8> = Rgb([230, 220, 200]);

/// Synthetic frame source for `stub://` URLs.
///
/// Renders a flat background with slight noise. In the second half of every
/// activity period a block walks across the scene, so a motion detector sees
/// activity come and go.
pub struct SyntheticSource {
    config: SourceConfig,
    pacer: Pacer,
    /// Position within the current pass; resets when playback loops.
    frame_count: u64,
    /// Sequence of the last delivered frame; never resets.
    sequence: u64,
    frame_limit: Option<u64>,
    activity_period: u64,
    started: bool,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        let pacer = Pacer::new(config.target_fps);
        let activity_period = (config.target_fps.max(1) as u64) * 10;
        Self {
            config,
            pacer,
            frame_count: 0,
            sequence: 0,
            frame_limit: None,
            activity_period,
            started: false,
        }
    }

    /// End the stream after `limit` frames.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Frames per activity cycle (idle half, then active half). Minimum 2.
    pub fn with_activity_period(mut self, frames: u64) -> Self {
        self.activity_period = frames.max(2);
        self
    }

    pub fn frames_produced(&self) -> u64 {
        self.sequence
    }

    /// Whether frame `sequence` (1-based) shows the moving block.
    pub fn is_active_frame(&self, sequence: u64) -> bool {
        let phase = (sequence.saturating_sub(1)) % self.activity_period;
        phase >= self.activity_period / 2
    }

    fn render(&self, sequence: u64) -> RgbImage {
        let (width, height) = (self.config.width, self.config.height);
        let mut rng = rand::thread_rng();
        let mut image = RgbImage::from_fn(width, height, |_, _| {
            let v = (BACKGROUND as i16 + rng.gen_range(-NOISE..=NOISE)) as u8;
            Rgb([v, v, v])
        });

        if self.is_active_frame(sequence) {
            let side = (width.min(height) / 4).max(1);
            let phase = (sequence - 1) % self.activity_period - self.activity_period / 2;
            let span = width.saturating_sub(side).max(1) as u64;
            let x0 = ((phase * 8) % span) as u32;
            let y0 = height.saturating_sub(side) / 2;
            for y in y0..(y0 + side).min(height) {
                for x in x0..(x0 + side).min(width) {
                    image.put_pixel(x, y, BLOCK_COLOR);
                }
            }
        }
        image
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.config.url
    }

    fn start(&mut self) -> Result<()> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(PipelineError::source_io(format!(
                "{}: frame size must be non-zero",
                self.config.url
            ))
            .into());
        }
        self.started = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{} @ {} fps)",
            self.config.url,
            self.config.width,
            self.config.height,
            self.config.target_fps
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        log::info!(
            "SyntheticSource: {} stopped after {} frames",
            self.config.url,
            self.sequence
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.started {
            return Err(PipelineError::source_io(format!("{} is not started", self.config.url)).into());
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            if !self.config.loop_playback {
                return Ok(None);
            }
            self.frame_count = 0;
        }
        self.pacer.wait();
        self.frame_count += 1;
        self.sequence += 1;
        let image = self.render(self.frame_count);
        Ok(Some(Frame::new(image, self.sequence)))
    }
}
