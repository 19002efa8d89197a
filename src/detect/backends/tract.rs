#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::preprocess::ProcessedImage;
use crate::detect::result::{non_max_suppression, BoundingBox, Prediction};
use crate::detect::Detector;
use crate::PipelineError;

/// Settings for `TractDetector`.
#[derive(Clone, Debug)]
pub struct TractConfig {
    pub model_path: PathBuf,
    /// Model input size; must match the pre-processor output.
    pub width: u32,
    pub height: u32,
    /// Boxes at or below this score are ignored.
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Class index counted as activity (0 = person in COCO-trained models).
    pub class_index: usize,
}

impl TractConfig {
    pub fn new(model_path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            model_path: model_path.into(),
            width,
            height,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            class_index: 0,
        }
    }
}

/// ONNX person detector for YOLO-style models.
///
/// Expects one output shaped `[1, 4 + classes, anchors]`, where the first four
/// rows are centre x, centre y, width and height in input pixels. Any other
/// shape is reported as a model output error.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    config: TractConfig,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new(config: TractConfig) -> Result<Self> {
        let model = load_model(&config.model_path, config.width, config.height)?;
        Ok(Self { model, config })
    }

    fn build_input(&self, image: &ProcessedImage) -> Result<Tensor> {
        if (image.width(), image.height()) != (self.config.width, self.config.height) {
            return Err(anyhow!(
                "image size {}x{} does not match model input {}x{}",
                image.width(),
                image.height(),
                self.config.width,
                self.config.height
            ));
        }
        let pixels = image.image();
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.config.height as usize, self.config.width as usize),
            |(_, channel, y, x)| pixels.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn parse_output(&self, outputs: TVec<TValue>) -> Result<Vec<BoundingBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| PipelineError::model_output("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| PipelineError::model_output(format!("output tensor was not f32: {e}")))?;

        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 + self.config.class_index {
            return Err(PipelineError::model_output(format!(
                "unexpected output shape {:?}, wanted [1, 4 + classes, anchors]",
                shape
            ))
            .into());
        }

        let score_row = 4 + self.config.class_index;
        let mut boxes = Vec::new();
        for anchor in 0..shape[2] {
            let score = view[[0, score_row, anchor]];
            if !(score > self.config.confidence_threshold) {
                continue;
            }
            let cx = view[[0, 0, anchor]];
            let cy = view[[0, 1, anchor]];
            let w = view[[0, 2, anchor]];
            let h = view[[0, 3, anchor]];
            boxes.push(BoundingBox::new(
                cx - w / 2.0,
                cy - h / 2.0,
                cx + w / 2.0,
                cy + h / 2.0,
                score,
            ));
        }
        non_max_suppression(&mut boxes, self.config.iou_threshold);
        Ok(boxes)
    }
}

fn load_model(
    model_path: &Path,
    width: u32,
    height: u32,
) -> Result<SimplePlan<TypedFact, Box<dyn TypedOp>>> {
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(
                f32::datum_type(),
                tvec!(1, 3, height as usize, width as usize),
            ),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &ProcessedImage) -> Result<Prediction> {
        let input = self.build_input(image)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let regions = self.parse_output(outputs)?;
        log::debug!("tract: {} person box(es)", regions.len());
        if regions.is_empty() {
            Ok(Prediction::absent())
        } else {
            Ok(Prediction::present(regions))
        }
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = image::RgbImage::new(self.config.width, self.config.height);
        let image = ProcessedImage::new(blank, self.config.width, self.config.height);
        self.detect(&image).map(|_| ())
    }
}
