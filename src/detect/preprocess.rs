use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use super::result::{BoundingBox, Prediction};
use super::PreProcessor;
use crate::frame::Frame;

/// Detector input derived from a frame.
pub struct ProcessedImage {
    image: RgbImage,
    /// Source frame width divided by processed width.
    scale_x: f32,
    /// Source frame height divided by processed height.
    scale_y: f32,
}

impl ProcessedImage {
    /// Wrap an image that was derived from a `source_width` x `source_height` frame.
    pub fn new(image: RgbImage, source_width: u32, source_height: u32) -> Self {
        let scale_x = source_width as f32 / image.width().max(1) as f32;
        let scale_y = source_height as f32 / image.height().max(1) as f32;
        Self {
            image,
            scale_x,
            scale_y,
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn scale(&self) -> (f32, f32) {
        (self.scale_x, self.scale_y)
    }

    /// Map one box from processed coordinates to source frame coordinates.
    pub fn box_to_frame(&self, region: &BoundingBox) -> BoundingBox {
        region.scaled(self.scale_x, self.scale_y)
    }

    /// Map a whole prediction to source frame coordinates.
    pub fn to_frame(&self, prediction: Prediction) -> Prediction {
        prediction.map_regions(|region| self.box_to_frame(region))
    }
}

/// Resizes frames to a fixed detector input size.
#[derive(Clone, Debug)]
pub struct ResizePreProcessor {
    width: u32,
    height: u32,
    filter: FilterType,
}

impl ResizePreProcessor {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!(
                "pre-processor size must be non-zero (got {}x{})",
                width,
                height
            ));
        }
        Ok(Self {
            width,
            height,
            filter: FilterType::Triangle,
        })
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl PreProcessor for ResizePreProcessor {
    fn process(&mut self, frame: &Frame) -> Result<ProcessedImage> {
        let source = frame.image();
        let image = if source.dimensions() == (self.width, self.height) {
            source.clone()
        } else {
            imageops::resize(source, self.width, self.height, self.filter)
        };
        Ok(ProcessedImage::new(image, frame.width(), frame.height()))
    }
}
