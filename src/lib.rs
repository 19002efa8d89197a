//! Activity Detection Pipeline
//!
//! This crate watches a single camera, runs every frame through a detector, and
//! records activity segments while something is in view.
//!
//! # Architecture
//!
//! Three stages run on their own threads and hand work to each other through
//! bounded queues:
//!
//! 1. **Capture**: pulls frames from a `FrameSource` into queue A.
//! 2. **Processing**: pre-processes and detects, pushing `(frame, prediction)` into queue B.
//! 3. **Recording**: feeds the debounced `ActivityMonitor`, which opens and closes
//!    recordings and announces activity.
//!
//! Queues never block a producer. When a consumer falls behind, frames are dropped
//! and counted; a live camera is worth more fresh than complete.
//!
//! # Module Structure
//!
//! - `queue`: Bounded hand-off queue (drop-on-full, pop with timeout)
//! - `frame`: Frame container and annotation
//! - `activity`: Debounced start/stop state machine
//! - `pipeline`: Stages, shutdown signal, coordinator
//! - `ingest`: Frame sources (synthetic, image directory, network stream)
//! - `detect`: Pre-processing and detector backends
//! - `record`: Segment recorders
//! - `notify`: Activity notifiers
//! - `config` / `builder`: Typed configuration and explicit wiring

pub mod activity;
pub mod builder;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod record;

pub use activity::{ActivityMonitor, ActivityState, Transition};
pub use config::AppConfig;
pub use detect::{
    BoundingBox, Detector, MotionDetector, PreProcessor, Prediction, ProcessedImage,
    ResizePreProcessor, ScriptedDetector,
};
pub use frame::Frame;
pub use ingest::{DirectorySource, FrameSource, Pacer, SourceConfig, SyntheticSource};
pub use notify::{EventLogNotifier, LogNotifier, Notifier, NotifierSet};
pub use pipeline::{
    Components, Pipeline, PipelineConfig, RunReport, RunStatus, RunningPipeline, ShutdownSignal,
    Stage, StageFailure, StatsSnapshot,
};
pub use queue::{handoff_queue, DropPolicy, Popped, PushOutcome, QueueConsumer, QueueProducer};
pub use record::{Recorder, SegmentRecorder};

// -------------------- Errors --------------------

/// Failure classes a stage can report to the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Frame source could not be opened or read.
    SourceIo,
    /// Detector output could not be interpreted as a prediction.
    ModelOutput,
    /// Recorder could not open, write, or close a segment.
    Recorder,
    /// A stage thread panicked.
    StagePanic,
    /// Anything else.
    Internal,
}

impl FailureKind {
    pub fn code(self) -> &'static str {
        match self {
            FailureKind::SourceIo => "SOURCE_IO",
            FailureKind::ModelOutput => "MODEL_OUTPUT",
            FailureKind::Recorder => "RECORDER",
            FailureKind::StagePanic => "STAGE_PANIC",
            FailureKind::Internal => "INTERNAL",
        }
    }
}

/// Coded error carried inside `anyhow::Error` so the coordinator can classify it.
#[derive(Clone, Debug)]
pub struct PipelineError {
    pub kind: FailureKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn source_io(message: impl Into<String>) -> Self {
        Self::new(FailureKind::SourceIo, message)
    }

    pub fn model_output(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ModelOutput, message)
    }

    pub fn recorder(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Recorder, message)
    }

    /// Classify an arbitrary error. Errors that never went through
    /// `PipelineError` are `Internal`.
    pub fn kind_of(err: &anyhow::Error) -> FailureKind {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<PipelineError>())
            .map(|e| e.kind)
            .unwrap_or(FailureKind::Internal)
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}
impl std::error::Error for PipelineError {}
