use std::collections::VecDeque;

use anyhow::Result;

use crate::detect::preprocess::ProcessedImage;
use crate::detect::result::{BoundingBox, Prediction};
use crate::detect::Detector;
use crate::PipelineError;

enum Step {
    /// Activity flag; a present verdict gets one box over the image centre.
    Flag(bool),
    Exact(Prediction),
    Fail(String),
}

/// Detector that replays a fixed script, one step per image.
///
/// Used for replay runs and tests. Once the script is exhausted every image
/// gets the fallback verdict (absent unless changed).
pub struct ScriptedDetector {
    script: VecDeque<Step>,
    fallback: bool,
    calls: u64,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            fallback: false,
            calls: 0,
        }
    }

    /// One step per flag, in order.
    pub fn from_flags(flags: &[bool]) -> Self {
        let mut detector = Self::new();
        detector.script.extend(flags.iter().map(|&flag| Step::Flag(flag)));
        detector
    }

    pub fn then(mut self, prediction: Prediction) -> Self {
        self.script.push_back(Step::Exact(prediction));
        self
    }

    pub fn then_flag(mut self, flag: bool) -> Self {
        self.script.push_back(Step::Flag(flag));
        self
    }

    /// Next step fails as if the model produced uninterpretable output.
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.script.push_back(Step::Fail(message.into()));
        self
    }

    /// Verdict once the script is exhausted.
    pub fn otherwise(mut self, flag: bool) -> Self {
        self.fallback = flag;
        self
    }

    /// Number of images seen.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    fn flag_prediction(flag: bool, image: &ProcessedImage) -> Prediction {
        if !flag {
            return Prediction::absent();
        }
        let (w, h) = (image.width() as f32, image.height() as f32);
        Prediction::present(vec![BoundingBox::new(
            w * 0.25,
            h * 0.25,
            w * 0.75,
            h * 0.75,
            1.0,
        )])
    }
}

impl Default for ScriptedDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, image: &ProcessedImage) -> Result<Prediction> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Step::Flag(flag)) => Ok(Self::flag_prediction(flag, image)),
            Some(Step::Exact(prediction)) => Ok(prediction),
            Some(Step::Fail(message)) => Err(PipelineError::model_output(message).into()),
            None => Ok(Self::flag_prediction(self.fallback, image)),
        }
    }
}
