//! Frame sources.
//!
//! - `stub://name`: synthetic scene with periodic activity (testing, demos)
//! - local directory: replays still images in file-name order
//! - `rtsp://`, `http(s)://`, `file://`: GStreamer decode (feature: rtsp-gstreamer)
//!
//! Sources pace themselves to the configured frame rate; the capture stage
//! just calls `next_frame` in a loop. Read and connection failures are
//! reported as `FailureKind::SourceIo`.

mod directory;
mod pacer;
#[cfg(feature = "rtsp-gstreamer")]
mod stream;
mod synthetic;

use anyhow::Result;

use crate::frame::Frame;

pub use directory::DirectorySource;
pub use pacer::Pacer;
#[cfg(feature = "rtsp-gstreamer")]
pub use stream::StreamSource;
pub use synthetic::SyntheticSource;

pub const DEFAULT_TARGET_FPS: u32 = 10;

/// Settings shared by every source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// Source location (`stub://...`, a directory path, or a stream URL).
    pub url: String,
    /// Frames per second to deliver. 0 disables pacing.
    pub target_fps: u32,
    /// Frame size for synthetic sources.
    pub width: u32,
    pub height: u32,
    /// Restart finite sources from the beginning when exhausted.
    pub loop_playback: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://front_camera".to_string(),
            target_fps: DEFAULT_TARGET_FPS,
            width: 640,
            height: 480,
            loop_playback: false,
        }
    }
}

/// Produces frames for the capture stage.
pub trait FrameSource: Send {
    /// Human-readable identifier for logs.
    fn name(&self) -> &str;

    /// Open the underlying stream. Called once before the first `next_frame`.
    fn start(&mut self) -> Result<()>;

    /// Release the underlying stream. Called once, and only after `start` succeeded.
    fn stop(&mut self) -> Result<()>;

    /// Next frame, or `None` when a finite source is exhausted.
    /// May block to pace delivery.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Which source implementation a location selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Synthetic,
    Directory,
    Stream,
}

impl SourceKind {
    pub fn for_url(url: &str) -> SourceKind {
        if url.starts_with("stub://") {
            SourceKind::Synthetic
        } else if url.contains("://") {
            SourceKind::Stream
        } else {
            SourceKind::Directory
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_scheme_selects_source() {
        assert_eq!(SourceKind::for_url("stub://yard"), SourceKind::Synthetic);
        assert_eq!(SourceKind::for_url("/var/frames"), SourceKind::Directory);
        assert_eq!(SourceKind::for_url("frames"), SourceKind::Directory);
        assert_eq!(
            SourceKind::for_url("rtsp://10.0.0.2:554/stream"),
            SourceKind::Stream
        );
        assert_eq!(
            SourceKind::for_url("http://cam.local/mjpeg"),
            SourceKind::Stream
        );
    }
}
