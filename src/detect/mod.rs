//! Pre-processing and detection.
//!
//! The processing stage drives two collaborators per frame:
//! - a `PreProcessor` that turns a `Frame` into the detector's input image;
//! - a `Detector` that turns that image into a `Prediction`.
//!
//! Detectors report regions in the coordinates of the image they were given.
//! `ProcessedImage::to_frame` maps them back onto the source frame.

mod backends;
mod preprocess;
mod result;

use anyhow::Result;

use crate::frame::Frame;

pub use backends::{MotionConfig, MotionDetector, ScriptedDetector};
#[cfg(feature = "backend-tract")]
pub use backends::{TractConfig, TractDetector};
pub use preprocess::{ProcessedImage, ResizePreProcessor};
pub use result::{non_max_suppression, BoundingBox, Prediction};

/// Turns a captured frame into detector input. No side effects.
pub trait PreProcessor: Send {
    fn process(&mut self, frame: &Frame) -> Result<ProcessedImage>;
}

/// Decides whether a processed image contains activity.
///
/// Output that cannot be interpreted as a prediction must be reported as a
/// `FailureKind::ModelOutput` error. The pipeline does not retry.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one image.
    fn detect(&mut self, image: &ProcessedImage) -> Result<Prediction>;

    /// Optional warm-up hook, called once on the processing thread before the
    /// first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
