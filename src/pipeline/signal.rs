use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::{FailureKind, PipelineError};

/// The three pipeline stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Capture,
    Processing,
    Recording,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Capture => "capture",
            Stage::Processing => "processing",
            Stage::Recording => "recording",
        }
    }

    /// Kind assigned to errors that carry no `PipelineError` of their own.
    pub fn default_failure_kind(self) -> FailureKind {
        match self {
            Stage::Capture => FailureKind::SourceIo,
            Stage::Processing => FailureKind::ModelOutput,
            Stage::Recording => FailureKind::Recorder,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a stage ended abnormally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: Stage, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(stage: Stage, err: &anyhow::Error) -> Self {
        let kind = match PipelineError::kind_of(err) {
            FailureKind::Internal => stage.default_failure_kind(),
            kind => kind,
        };
        Self::new(stage, kind, format!("{err:#}"))
    }

    pub fn panicked(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, FailureKind::StagePanic, message)
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage: {}", self.stage, self.message)
    }
}

impl std::error::Error for StageFailure {}

struct SignalState {
    running: AtomicBool,
    stop_requested: AtomicBool,
    failure: Mutex<Option<StageFailure>>,
}

/// Shared shutdown flag plus first-fault slot.
///
/// Cloning is cheap; every clone observes the same state. The running flag
/// goes from true to false exactly once, either on `request_stop` or on the
/// first reported failure.
#[derive(Clone)]
pub struct ShutdownSignal {
    state: Arc<SignalState>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState {
                running: AtomicBool::new(true),
                stop_requested: AtomicBool::new(false),
                failure: Mutex::new(None),
            }),
        }
    }

    /// Loop condition for every stage.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Cooperative stop, e.g. from a Ctrl-C handler.
    pub fn request_stop(&self) {
        if !self.state.stop_requested.swap(true, Ordering::SeqCst) {
            log::info!("shutdown requested");
        }
        self.state.running.store(false, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.state.stop_requested.load(Ordering::SeqCst)
    }

    /// Record a stage failure and stop the pipeline. Only the first failure is
    /// kept; returns whether this one was it.
    pub fn report_failure(&self, failure: StageFailure) -> bool {
        let mut slot = self
            .state
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let first = slot.is_none();
        if first {
            log::warn!("pipeline fault ({}): {}", failure.kind.code(), failure);
            *slot = Some(failure);
        } else {
            log::warn!("additional fault after shutdown began: {}", failure);
        }
        drop(slot);
        self.state.running.store(false, Ordering::SeqCst);
        first
    }

    /// The first reported failure, if any.
    pub fn failure(&self) -> Option<StageFailure> {
        self.state
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("running", &self.is_running())
            .field("stop_requested", &self.stop_requested())
            .field("failure", &self.failure())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn first_failure_wins_and_stops() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();
        assert!(observer.is_running());

        assert!(signal.report_failure(StageFailure::new(
            Stage::Processing,
            FailureKind::ModelOutput,
            "bad output"
        )));
        assert!(!signal.report_failure(StageFailure::panicked(Stage::Recording, "boom")));

        assert!(!observer.is_running());
        assert!(!observer.stop_requested());
        let failure = observer.failure().unwrap();
        assert_eq!(failure.stage, Stage::Processing);
        assert_eq!(failure.kind, FailureKind::ModelOutput);
    }

    #[test]
    fn request_stop_is_not_a_failure() {
        let signal = ShutdownSignal::new();
        signal.request_stop();
        signal.request_stop();
        assert!(!signal.is_running());
        assert!(signal.stop_requested());
        assert!(signal.failure().is_none());
    }

    #[test]
    fn unclassified_errors_take_the_stage_default() {
        let failure = StageFailure::from_error(Stage::Capture, &anyhow!("connection refused"));
        assert_eq!(failure.kind, FailureKind::SourceIo);

        let err: anyhow::Error = PipelineError::recorder("disk full").into();
        let failure = StageFailure::from_error(Stage::Capture, &err);
        assert_eq!(failure.kind, FailureKind::Recorder);
        assert_eq!(failure.to_string(), "capture stage: RECORDER: disk full");
    }
}
