//! Segment recording.
//!
//! The activity monitor guarantees `start_recording` is only called while no
//! segment is open. Implementations should still treat a second start as an
//! error rather than silently opening another segment.

mod segment;

use anyhow::Result;

use crate::frame::Frame;

pub use segment::{
    SegmentManifest, SegmentRecorder, DEFAULT_JPEG_QUALITY, DEFAULT_PREFIX, MANIFEST_FILE,
};

pub trait Recorder: Send {
    /// Open a new segment.
    fn start_recording(&mut self) -> Result<()>;

    /// Close the open segment. No-op when nothing is open.
    fn stop_recording(&mut self) -> Result<()>;

    /// Append one frame to the open segment. No-op when nothing is open.
    fn append_frame(&mut self, frame: &Frame) -> Result<()>;

    fn is_recording(&self) -> bool;
}
