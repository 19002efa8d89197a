//! Network / media stream source backed by GStreamer.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;

use super::{FrameSource, Pacer, SourceConfig};
use crate::frame::Frame;
use crate::PipelineError;

/// Decodes any URI GStreamer understands (`rtsp://`, `http(s)://`, `file://`)
/// into RGB frames, decimated to the target frame rate.
pub struct StreamSource {
    config: SourceConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    pacer: Pacer,
    sequence: u64,
    last_frame_at: Option<Instant>,
    end_of_stream: bool,
}

impl StreamSource {
    /// Build the decode pipeline: uridecodebin ! videoconvert ! appsink (RGB).
    pub fn new(config: SourceConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let description = format!(
            "uridecodebin uri={} ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build stream pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("stream pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let pacer = Pacer::new(config.target_fps);
        Ok(Self {
            config,
            pipeline,
            appsink,
            pacer,
            sequence: 0,
            last_frame_at: None,
            end_of_stream: false,
        })
    }

    /// Time without a sample after which the stream counts as stalled.
    fn stall_timeout(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(20)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }

    fn poll_bus(&mut self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(PipelineError::source_io(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ))
                    .into());
                }
                MessageView::Eos(..) => self.end_of_stream = true,
                _ => {}
            }
        }
        Ok(())
    }
}

impl FrameSource for StreamSource {
    fn name(&self) -> &str {
        &self.config.url
    }

    fn start(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| PipelineError::source_io(format!("{}: {}", self.config.url, e)))?;
        self.pacer.reset();
        log::info!("StreamSource: connected to {}", self.config.url);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Null)
            .context("set stream pipeline to Null")?;
        log::info!(
            "StreamSource: {} stopped after {} frames",
            self.config.url,
            self.sequence
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let waiting_since = Instant::now();
        loop {
            self.poll_bus()?;
            if self.end_of_stream || self.appsink.is_eos() {
                return Ok(None);
            }

            let sample = self
                .appsink
                .try_pull_sample(gstreamer::ClockTime::from_mseconds(200));
            let Some(sample) = sample else {
                let since = self.last_frame_at.unwrap_or(waiting_since).max(waiting_since);
                if since.elapsed() > self.stall_timeout() {
                    return Err(PipelineError::source_io(format!(
                        "{}: stream stalled",
                        self.config.url
                    ))
                    .into());
                }
                continue;
            };

            if !self.pacer.admit(Instant::now()) {
                continue;
            }

            let (pixels, width, height) = sample_to_pixels(&sample)
                .map_err(|e| PipelineError::source_io(format!("{}: {e:#}", self.config.url)))?;
            self.sequence += 1;
            self.last_frame_at = Some(Instant::now());
            let frame = Frame::from_rgb(width, height, pixels, self.sequence).ok_or_else(|| {
                PipelineError::source_io(format!("{}: short RGB buffer", self.config.url))
            })?;
            return Ok(Some(frame));
        }
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("buffer shorter than frame")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("buffer row is out of bounds")?,
        );
    }
    Ok((pixels, width, height))
}
