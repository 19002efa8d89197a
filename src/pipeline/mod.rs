//! Pipeline coordinator.
//!
//! `Pipeline` owns the collaborators and the two hand-off queues, starts the
//! three stage threads together and, on `join`, waits for all of them and
//! tears down: the source is stopped if it was started, and an open recording
//! is closed before the final `RunReport` is produced.
//!
//! ```text
//! FrameSource -> [capture] -> queue A -> [processing] -> queue B -> [recording] -> Recorder/Notifier
//! ```

mod signal;
mod stages;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::activity::ActivityMonitor;
use crate::detect::{Detector, PreProcessor, Prediction};
use crate::frame::Frame;
use crate::ingest::{FrameSource, DEFAULT_TARGET_FPS};
use crate::notify::Notifier;
use crate::queue::{handoff_queue, DropPolicy, QueueGauge, DEFAULT_QUEUE_CAPACITY};
use crate::record::Recorder;
use crate::FailureKind;

pub use signal::{ShutdownSignal, Stage, StageFailure};
use stages::{capture_loop, processing_loop, recording_loop, supervise, Counters};

pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_secs(1);
/// Seconds of absence that close a recording.
pub const DEFAULT_STOP_SECONDS: u32 = 3;
/// `DEFAULT_STOP_SECONDS` of frames at the default source rate.
pub const DEFAULT_STOP_THRESHOLD: u32 = DEFAULT_TARGET_FPS * DEFAULT_STOP_SECONDS;

/// Collaborators injected into the pipeline.
pub struct Components {
    pub source: Box<dyn FrameSource>,
    pub preprocessor: Box<dyn PreProcessor>,
    pub detector: Box<dyn Detector>,
    pub recorder: Box<dyn Recorder>,
    pub notifier: Box<dyn Notifier>,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Capacity of each hand-off queue.
    pub queue_capacity: usize,
    /// How long a stage waits on its input queue before re-checking the
    /// shutdown signal. Bounds shutdown latency.
    pub pop_timeout: Duration,
    /// Consecutive frames without activity that close a recording.
    pub stop_threshold: u32,
    pub drop_policy: DropPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pop_timeout: DEFAULT_POP_TIMEOUT,
            stop_threshold: DEFAULT_STOP_THRESHOLD,
            drop_policy: DropPolicy::default(),
        }
    }
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// Source exhausted; every stage drained and finished on its own.
    Clean,
    /// Stopped on request.
    Interrupted,
    /// A stage failed; the first failure is kept.
    Faulted(StageFailure),
}

/// Point-in-time counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub frames_observed: u64,
    pub frames_recorded: u64,
    pub segments_started: u64,
    pub capture_queue_len: usize,
    pub capture_queue_dropped: u64,
    pub detection_queue_len: usize,
    pub detection_queue_dropped: u64,
}

#[derive(Clone, Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub stats: StatsSnapshot,
    pub elapsed: Duration,
    /// A recording was still open at shutdown and was closed by teardown.
    pub closed_open_recording: bool,
}

impl RunReport {
    pub fn failure(&self) -> Option<&StageFailure> {
        match &self.status {
            RunStatus::Faulted(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.status, RunStatus::Faulted(_))
    }
}

/// A configured, not yet started pipeline.
pub struct Pipeline {
    components: Components,
    config: PipelineConfig,
    signal: ShutdownSignal,
}

impl Pipeline {
    pub fn new(components: Components, config: PipelineConfig) -> Self {
        Self {
            components,
            config,
            signal: ShutdownSignal::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Signal shared with the stages; available before `start` so a
    /// Ctrl-C handler can be installed first.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Spawn the three stage threads.
    pub fn start(self) -> Result<RunningPipeline> {
        let Pipeline {
            components,
            config,
            signal,
        } = self;
        let Components {
            source,
            preprocessor,
            detector,
            recorder,
            notifier,
        } = components;

        let (frames_tx, frames_rx) = handoff_queue::<Frame>(config.queue_capacity, config.drop_policy);
        let (pairs_tx, pairs_rx) =
            handoff_queue::<(Frame, Prediction)>(config.queue_capacity, config.drop_policy);
        let capture_gauge = frames_rx.gauge();
        let detection_gauge = pairs_rx.gauge();
        let counters = Arc::new(Counters::default());
        let monitor = ActivityMonitor::new(recorder, notifier, config.stop_threshold);

        log::info!(
            "starting pipeline: source={} detector={} queue_capacity={} pop_timeout={:?} stop_threshold={} drop_policy={:?}",
            source.name(),
            detector.name(),
            config.queue_capacity,
            config.pop_timeout,
            monitor.stop_threshold(),
            config.drop_policy
        );

        let recording = {
            let stage_signal = signal.clone();
            let counters = counters.clone();
            let pop_timeout = config.pop_timeout;
            spawn_stage(Stage::Recording, &signal, move || {
                let signal = stage_signal;
                let mut monitor = monitor;
                supervise(Stage::Recording, &signal, || {
                    recording_loop(&mut monitor, &pairs_rx, &signal, &counters, pop_timeout)
                });
                monitor
            })?
        };

        let processing = {
            let stage_signal = signal.clone();
            let counters = counters.clone();
            let pop_timeout = config.pop_timeout;
            spawn_stage(Stage::Processing, &signal, move || {
                let signal = stage_signal;
                let (mut preprocessor, mut detector) = (preprocessor, detector);
                supervise(Stage::Processing, &signal, || {
                    processing_loop(
                        preprocessor.as_mut(),
                        detector.as_mut(),
                        &frames_rx,
                        &pairs_tx,
                        &signal,
                        &counters,
                        pop_timeout,
                    )
                });
                // Queue B closes here, letting the recording stage drain.
                drop(pairs_tx);
                (preprocessor, detector)
            })?
        };

        let capture = {
            let stage_signal = signal.clone();
            let counters = counters.clone();
            spawn_stage(Stage::Capture, &signal, move || {
                let signal = stage_signal;
                let mut source = source;
                let mut started = false;
                supervise(Stage::Capture, &signal, || {
                    capture_loop(source.as_mut(), &frames_tx, &signal, &counters, &mut started)
                });
                drop(frames_tx);
                CaptureOutcome { source, started }
            })?
        };

        Ok(RunningPipeline {
            signal,
            capture: Some(capture),
            processing: Some(processing),
            recording: Some(recording),
            counters,
            capture_gauge,
            detection_gauge,
            started_at: Instant::now(),
        })
    }

    /// Start and wait for the run to end.
    pub fn run(self) -> Result<RunReport> {
        Ok(self.start()?.join())
    }
}

struct CaptureOutcome {
    source: Box<dyn FrameSource>,
    started: bool,
}

type ProcessingOutcome = (Box<dyn PreProcessor>, Box<dyn Detector>);

fn spawn_stage<T, F>(stage: Stage, signal: &ShutdownSignal, body: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    std::thread::Builder::new()
        .name(format!("{stage}-stage"))
        .spawn(body)
        .map_err(|err| {
            // Stages already spawned exit on their next loop check.
            signal.request_stop();
            err
        })
        .with_context(|| format!("failed to spawn {stage} stage thread"))
}

/// Handle to a started pipeline.
pub struct RunningPipeline {
    signal: ShutdownSignal,
    capture: Option<JoinHandle<CaptureOutcome>>,
    processing: Option<JoinHandle<ProcessingOutcome>>,
    recording: Option<JoinHandle<ActivityMonitor>>,
    counters: Arc<Counters>,
    capture_gauge: QueueGauge<Frame>,
    detection_gauge: QueueGauge<(Frame, Prediction)>,
    started_at: Instant,
}

impl RunningPipeline {
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Request a cooperative stop. Returns immediately; use `join` to wait.
    pub fn stop(&self) {
        self.signal.request_stop();
    }

    /// True once every stage thread has exited.
    pub fn is_finished(&self) -> bool {
        [
            self.capture.as_ref().map(|h| h.is_finished()),
            self.processing.as_ref().map(|h| h.is_finished()),
            self.recording.as_ref().map(|h| h.is_finished()),
        ]
        .into_iter()
        .all(|done| done.unwrap_or(true))
    }

    pub fn stats(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            frames_captured: c.captured.load(Ordering::Relaxed),
            frames_processed: c.processed.load(Ordering::Relaxed),
            frames_observed: c.observed.load(Ordering::Relaxed),
            frames_recorded: c.recorded.load(Ordering::Relaxed),
            segments_started: c.segments.load(Ordering::Relaxed),
            capture_queue_len: self.capture_gauge.len(),
            capture_queue_dropped: self.capture_gauge.dropped(),
            detection_queue_len: self.detection_gauge.len(),
            detection_queue_dropped: self.detection_gauge.dropped(),
        }
    }

    /// Wait for every stage, tear down, and report how the run ended.
    pub fn join(mut self) -> RunReport {
        let capture = join_stage(Stage::Capture, self.capture.take(), &self.signal);
        let processing = join_stage(Stage::Processing, self.processing.take(), &self.signal);
        let recording = join_stage(Stage::Recording, self.recording.take(), &self.signal);

        if let Some(CaptureOutcome {
            mut source,
            started: true,
        }) = capture
        {
            if let Err(err) = source.stop() {
                log::warn!("failed to stop source {}: {:#}", source.name(), err);
            }
        }
        drop(processing);

        let mut closed_open_recording = false;
        if let Some(mut monitor) = recording {
            match monitor.close() {
                Ok(closed) => {
                    closed_open_recording = closed;
                    if closed {
                        log::info!("closed open recording at shutdown");
                    }
                }
                Err(err) => {
                    self.signal.report_failure(StageFailure::new(
                        Stage::Recording,
                        FailureKind::Recorder,
                        format!("{err:#}"),
                    ));
                }
            }
        }

        let status = match self.signal.failure() {
            Some(failure) => RunStatus::Faulted(failure),
            None if self.signal.stop_requested() => RunStatus::Interrupted,
            None => RunStatus::Clean,
        };
        let stats = self.stats();
        let elapsed = self.started_at.elapsed();
        match &status {
            RunStatus::Faulted(failure) => log::error!("pipeline faulted: {}", failure),
            other => log::info!(
                "pipeline stopped ({:?}) after {:.1}s: captured={} processed={} recorded={} segments={}",
                other,
                elapsed.as_secs_f64(),
                stats.frames_captured,
                stats.frames_processed,
                stats.frames_recorded,
                stats.segments_started
            ),
        }

        RunReport {
            status,
            stats,
            elapsed,
            closed_open_recording,
        }
    }
}

fn join_stage<T>(stage: Stage, handle: Option<JoinHandle<T>>, signal: &ShutdownSignal) -> Option<T> {
    match handle?.join() {
        Ok(outcome) => Some(outcome),
        Err(_) => {
            signal.report_failure(StageFailure::panicked(stage, "stage thread panicked during teardown"));
            None
        }
    }
}

impl Drop for RunningPipeline {
    fn drop(&mut self) {
        if self.capture.is_some() || self.processing.is_some() || self.recording.is_some() {
            // Dropped without join: stop the stages.
            self.signal.request_stop();
        }
    }
}
