use anyhow::Result;
use image::imageops;
use image::GrayImage;

use crate::detect::preprocess::ProcessedImage;
use crate::detect::result::{BoundingBox, Prediction};
use crate::detect::Detector;

/// Tuning for `MotionDetector`.
#[derive(Clone, Copy, Debug)]
pub struct MotionConfig {
    /// Per-pixel luma difference that counts as change.
    pub pixel_threshold: u8,
    /// Fraction of changed pixels (0..1) needed to report activity.
    pub min_area: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            pixel_threshold: 25,
            min_area: 0.01,
        }
    }
}

/// CPU motion detector based on frame differencing.
///
/// Compares each image with the previous one on luma. The reported region is
/// the bounding box of every changed pixel; its confidence is the changed
/// fraction. The first image only seeds the baseline.
#[derive(Default)]
pub struct MotionDetector {
    config: MotionConfig,
    previous: Option<GrayImage>,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            previous: None,
        }
    }

    fn compare(&self, previous: &GrayImage, current: &GrayImage) -> Prediction {
        let (width, height) = current.dimensions();
        let mut changed = 0u64;
        let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
        let (mut max_x, mut max_y) = (0u32, 0u32);

        for (x, y, pixel) in current.enumerate_pixels() {
            let before = previous.get_pixel(x, y)[0];
            if pixel[0].abs_diff(before) > self.config.pixel_threshold {
                changed += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }

        let total = (width as u64 * height as u64).max(1);
        let fraction = changed as f32 / total as f32;
        if changed == 0 || fraction < self.config.min_area {
            return Prediction::absent();
        }
        Prediction::present(vec![BoundingBox::new(
            min_x as f32,
            min_y as f32,
            (max_x + 1) as f32,
            (max_y + 1) as f32,
            fraction.min(1.0),
        )])
    }
}

impl Detector for MotionDetector {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, image: &ProcessedImage) -> Result<Prediction> {
        let current = imageops::grayscale(image.image());

        let prediction = match &self.previous {
            Some(previous) if previous.dimensions() == current.dimensions() => {
                self.compare(previous, &current)
            }
            Some(_) => {
                log::debug!("motion detector: input size changed, resetting baseline");
                Prediction::absent()
            }
            None => Prediction::absent(),
        };

        self.previous = Some(current);
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn image_with_block(x0: u32, y0: u32, size: u32) -> ProcessedImage {
        let mut img = RgbImage::from_pixel(100, 100, Rgb([10, 10, 10]));
        for y in y0..(y0 + size) {
            for x in x0..(x0 + size) {
                img.put_pixel(x, y, Rgb([240, 240, 240]));
            }
        }
        ProcessedImage::new(img, 100, 100)
    }

    fn background() -> ProcessedImage {
        ProcessedImage::new(RgbImage::from_pixel(100, 100, Rgb([10, 10, 10])), 100, 100)
    }

    #[test]
    fn first_image_only_seeds_baseline() -> Result<()> {
        let mut detector = MotionDetector::default();
        let p = detector.detect(&image_with_block(10, 10, 20))?;
        assert!(!p.detected);
        assert!(p.regions.is_empty());
        Ok(())
    }

    #[test]
    fn detects_block_appearing() -> Result<()> {
        let mut detector = MotionDetector::default();
        detector.detect(&background())?;

        let p = detector.detect(&image_with_block(20, 30, 10))?;
        assert!(p.detected);
        assert_eq!(p.regions.len(), 1);
        let region = p.regions[0];
        assert_eq!((region.x1, region.y1, region.x2, region.y2), (20.0, 30.0, 30.0, 40.0));
        assert!((region.confidence - 0.01).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn static_scene_is_not_activity() -> Result<()> {
        let mut detector = MotionDetector::default();
        detector.detect(&image_with_block(20, 30, 10))?;
        let p = detector.detect(&image_with_block(20, 30, 10))?;
        assert!(!p.detected);
        Ok(())
    }

    #[test]
    fn small_changes_stay_below_min_area() -> Result<()> {
        let mut detector = MotionDetector::new(MotionConfig {
            pixel_threshold: 25,
            min_area: 0.05,
        });
        detector.detect(&background())?;
        let p = detector.detect(&image_with_block(0, 0, 10))?;
        assert!(!p.detected);
        Ok(())
    }

    #[test]
    fn size_change_resets_baseline() -> Result<()> {
        let mut detector = MotionDetector::default();
        detector.detect(&background())?;
        let small = ProcessedImage::new(RgbImage::new(10, 10), 10, 10);
        assert!(!detector.detect(&small)?.detected);
        Ok(())
    }
}
