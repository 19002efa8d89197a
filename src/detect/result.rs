/// Axis-aligned box in pixel coordinates (`x1,y1` top-left, `x2,y2` bottom-right).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let intersection = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Multiply coordinates by per-axis factors.
    pub fn scaled(&self, sx: f32, sy: f32) -> BoundingBox {
        BoundingBox {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
            confidence: self.confidence,
        }
    }

    /// Snap to whole pixels inside a `width` x `height` image.
    /// Returns `None` when nothing of the box is visible.
    pub fn clip(&self, width: u32, height: u32) -> Option<BoundingBox> {
        if !(self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite())
        {
            return None;
        }
        let x1 = self.x1.max(0.0).floor();
        let y1 = self.y1.max(0.0).floor();
        let x2 = self.x2.min(width as f32).ceil();
        let y2 = self.y2.min(height as f32).ceil();
        if x2 - x1 < 1.0 || y2 - y1 < 1.0 {
            return None;
        }
        Some(BoundingBox::new(x1, y1, x2, y2, self.confidence))
    }
}

/// Detector output for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Prediction {
    /// Is there activity in the frame?
    pub detected: bool,
    /// Regions that triggered the detection, in detector order.
    pub regions: Vec<BoundingBox>,
}

impl Prediction {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn present(regions: Vec<BoundingBox>) -> Self {
        Self {
            detected: true,
            regions,
        }
    }

    /// Map every region through `f`, keeping order.
    pub fn map_regions(mut self, f: impl Fn(&BoundingBox) -> BoundingBox) -> Self {
        for region in &mut self.regions {
            *region = f(region);
        }
        self
    }
}

/// Greedy non-maximum suppression, highest confidence first.
pub fn non_max_suppression(boxes: &mut Vec<BoundingBox>, iou_threshold: f32) {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes.drain(..) {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    *boxes = kept;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
        let far = BoundingBox::new(20.0, 20.0, 30.0, 30.0, 1.0);
        assert_eq!(b.iou(&far), 0.0);
    }

    #[test]
    fn nms_keeps_best_of_overlapping_boxes() {
        let mut boxes = vec![
            BoundingBox::new(0.0, 0.0, 10.0, 10.0, 0.6),
            BoundingBox::new(1.0, 1.0, 11.0, 11.0, 0.9),
            BoundingBox::new(50.0, 50.0, 60.0, 60.0, 0.7),
        ];
        non_max_suppression(&mut boxes, 0.45);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].confidence, 0.9);
        assert_eq!(boxes[1].confidence, 0.7);
    }

    #[test]
    fn clip_rejects_invisible_boxes() {
        let b = BoundingBox::new(-5.0, 2.5, 8.2, 30.0, 0.5);
        let c = b.clip(10, 10).unwrap();
        assert_eq!((c.x1, c.y1, c.x2, c.y2), (0.0, 2.0, 9.0, 10.0));
        assert!(BoundingBox::new(12.0, 0.0, 20.0, 5.0, 0.5).clip(10, 10).is_none());
        assert!(BoundingBox::new(f32::NAN, 0.0, 5.0, 5.0, 0.5).clip(10, 10).is_none());
    }

    #[test]
    fn map_regions_preserves_order() {
        let p = Prediction::present(vec![
            BoundingBox::new(1.0, 1.0, 2.0, 2.0, 0.1),
            BoundingBox::new(3.0, 3.0, 4.0, 4.0, 0.2),
        ])
        .map_regions(|b| b.scaled(2.0, 3.0));
        assert!(p.detected);
        assert_eq!(p.regions[0], BoundingBox::new(2.0, 3.0, 4.0, 6.0, 0.1));
        assert_eq!(p.regions[1], BoundingBox::new(6.0, 9.0, 8.0, 12.0, 0.2));
    }
}
