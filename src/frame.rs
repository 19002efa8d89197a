//! Frame container.
//!
//! A `Frame` is produced once by a frame source and then moves by value through
//! the pipeline queues, so exactly one stage owns it at any time. It is not
//! `Clone`. The only mutation after capture is `annotate`, which the recording
//! stage applies just before a frame is appended to a recording.

use std::time::Instant;

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::BoundingBox;

/// Colour of annotation boxes.
pub const ANNOTATION_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Line thickness of annotation boxes, in pixels.
pub const ANNOTATION_THICKNESS: u32 = 2;

/// One captured image.
pub struct Frame {
    image: RgbImage,
    /// Capture order assigned by the source (first frame is 1).
    sequence: u64,
    /// Monotonic capture instant.
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from packed RGB8 bytes.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>, sequence: u64) -> Option<Self> {
        RgbImage::from_raw(width, height, pixels).map(|image| Self::new(image, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Draw each region onto the frame as a hollow rectangle.
    ///
    /// Regions are in frame pixel coordinates. Parts outside the frame are
    /// clipped; regions with no visible area are skipped.
    pub fn annotate(&mut self, regions: &[BoundingBox]) {
        let (width, height) = self.image.dimensions();
        for region in regions {
            let Some(clipped) = region.clip(width, height) else {
                continue;
            };
            for inset in 0..ANNOTATION_THICKNESS {
                let x = clipped.x1 as i32 + inset as i32;
                let y = clipped.y1 as i32 + inset as i32;
                let w = (clipped.x2 - clipped.x1) as i64 - 2 * inset as i64;
                let h = (clipped.y2 - clipped.y1) as i64 - 2 * inset as i64;
                if w < 1 || h < 1 {
                    break;
                }
                let rect = Rect::at(x, y).of_size(w as u32, h as u32);
                draw_hollow_rect_mut(&mut self.image, rect, ANNOTATION_COLOR);
            }
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}
