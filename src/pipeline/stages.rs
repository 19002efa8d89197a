//! Stage loops.
//!
//! Each loop runs on its own thread and owns its collaborators for the
//! lifetime of the run. A loop ends when the shutdown signal clears, when its
//! upstream queue closes, or on the first error. Errors and panics are turned
//! into a `StageFailure` on the shared signal by `supervise`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};

use super::signal::{ShutdownSignal, Stage, StageFailure};
use crate::activity::{ActivityMonitor, Transition};
use crate::detect::{Detector, PreProcessor, Prediction};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::queue::{Popped, PushOutcome, QueueConsumer, QueueProducer};

/// Per-run counters shared by the stages and readers of `stats()`.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub captured: AtomicU64,
    pub processed: AtomicU64,
    pub observed: AtomicU64,
    pub recorded: AtomicU64,
    pub segments: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Run a stage body, converting an error or a panic into a reported failure.
pub(crate) fn supervise(stage: Stage, signal: &ShutdownSignal, body: impl FnOnce() -> Result<()>) {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => log::info!("{} stage finished", stage),
        Ok(Err(err)) => {
            signal.report_failure(StageFailure::from_error(stage, &err));
        }
        Err(payload) => {
            signal.report_failure(StageFailure::panicked(stage, panic_message(payload.as_ref())));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

/// Pull frames from the source into queue A until stopped or exhausted.
///
/// `started` is set once `FrameSource::start` has succeeded, so teardown knows
/// whether `stop` is owed.
pub(crate) fn capture_loop(
    source: &mut dyn FrameSource,
    queue: &QueueProducer<Frame>,
    signal: &ShutdownSignal,
    counters: &Counters,
    started: &mut bool,
) -> Result<()> {
    source
        .start()
        .with_context(|| format!("failed to start source {}", source.name()))?;
    *started = true;

    while signal.is_running() {
        let Some(frame) = source
            .next_frame()
            .with_context(|| format!("failed to read from {}", source.name()))?
        else {
            log::info!("source {} exhausted", source.name());
            break;
        };
        Counters::bump(&counters.captured);

        let sequence = frame.sequence();
        match queue.push(frame) {
            PushOutcome::Queued => {}
            PushOutcome::DroppedNewest => {
                log::warn!("frame dropped: {} ({} total)", sequence, queue.dropped())
            }
            PushOutcome::DroppedOldest => log::warn!(
                "frame dropped: evicted oldest for {} ({} total)",
                sequence,
                queue.dropped()
            ),
            PushOutcome::Disconnected => {
                log::debug!("processing stage gone, capture stopping");
                break;
            }
        }
    }
    Ok(())
}

/// Pre-process and detect each frame from queue A, forwarding pairs to queue B.
pub(crate) fn processing_loop(
    preprocessor: &mut dyn PreProcessor,
    detector: &mut dyn Detector,
    input: &QueueConsumer<Frame>,
    output: &QueueProducer<(Frame, Prediction)>,
    signal: &ShutdownSignal,
    counters: &Counters,
    pop_timeout: Duration,
) -> Result<()> {
    detector
        .warm_up()
        .with_context(|| format!("detector {} failed to warm up", detector.name()))?;

    while signal.is_running() {
        let frame = match input.pop(pop_timeout) {
            Popped::Item(frame) => frame,
            Popped::TimedOut => continue,
            Popped::Closed => break,
        };

        let processed = preprocessor
            .process(&frame)
            .with_context(|| format!("failed to pre-process frame {}", frame.sequence()))?;
        let prediction = detector
            .detect(&processed)
            .with_context(|| format!("detector {} failed on frame {}", detector.name(), frame.sequence()))?;
        let prediction = processed.to_frame(prediction);
        Counters::bump(&counters.processed);

        let sequence = frame.sequence();
        match output.push((frame, prediction)) {
            PushOutcome::Queued => {}
            PushOutcome::DroppedNewest => log::warn!(
                "processed frame dropped: {} ({} total)",
                sequence,
                output.dropped()
            ),
            PushOutcome::DroppedOldest => log::warn!(
                "processed frame dropped: evicted oldest for {} ({} total)",
                sequence,
                output.dropped()
            ),
            PushOutcome::Disconnected => {
                log::debug!("recording stage gone, processing stopping");
                break;
            }
        }
    }
    Ok(())
}

/// Feed (frame, prediction) pairs from queue B into the activity monitor.
pub(crate) fn recording_loop(
    monitor: &mut ActivityMonitor,
    input: &QueueConsumer<(Frame, Prediction)>,
    signal: &ShutdownSignal,
    counters: &Counters,
    pop_timeout: Duration,
) -> Result<()> {
    while signal.is_running() {
        let (frame, prediction) = match input.pop(pop_timeout) {
            Popped::Item(pair) => pair,
            Popped::TimedOut => continue,
            Popped::Closed => break,
        };
        Counters::bump(&counters.observed);

        let transition = monitor.observe(frame, &prediction)?;
        if transition == Transition::Started {
            Counters::bump(&counters.segments);
        }
        if transition.records_frame() {
            Counters::bump(&counters.recorded);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    #[test]
    fn supervise_reports_errors_and_panics() {
        let signal = ShutdownSignal::new();
        supervise(Stage::Recording, &signal, || Ok(()));
        assert!(signal.is_running());

        supervise(Stage::Processing, &signal, || panic!("index out of range"));
        let failure = signal.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::StagePanic);
        assert_eq!(failure.stage, Stage::Processing);
        assert!(failure.message.contains("index out of range"));
        assert!(!signal.is_running());
    }

    #[test]
    fn panic_message_handles_formatted_payloads() {
        let payload: Box<dyn Any + Send> = Box::new(format!("frame {}", 3));
        assert_eq!(panic_message(payload.as_ref()), "panicked: frame 3");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "panicked");
    }
}
