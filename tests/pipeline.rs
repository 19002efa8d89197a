use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use image::RgbImage;

use activity_detection::{
    Components, Detector, FailureKind, Frame, FrameSource, Notifier, Pipeline, PipelineConfig,
    PipelineError, PreProcessor, ProcessedImage, Recorder, ResizePreProcessor, RunStatus,
    ScriptedDetector, SegmentRecorder, Stage,
};

type Journal = Arc<Mutex<Vec<String>>>;

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

fn count(journal: &Journal, entry: &str) -> usize {
    entries(journal).iter().filter(|e| *e == entry).count()
}

fn appended(journal: &Journal) -> Vec<u64> {
    entries(journal)
        .iter()
        .filter_map(|e| e.strip_prefix("append ").map(|n| n.parse().unwrap()))
        .collect()
}

struct TestSource {
    journal: Journal,
    total: Option<u64>,
    produced: u64,
    pace: Option<Duration>,
    fail_on_start: bool,
    fail_at: Option<u64>,
}

impl TestSource {
    fn finite(journal: &Journal, total: u64) -> Self {
        Self {
            journal: journal.clone(),
            total: Some(total),
            produced: 0,
            pace: None,
            fail_on_start: false,
            fail_at: None,
        }
    }

    fn endless(journal: &Journal, pace: Duration) -> Self {
        Self {
            total: None,
            pace: Some(pace),
            ..Self::finite(journal, 0)
        }
    }
}

impl FrameSource for TestSource {
    fn name(&self) -> &str {
        "test"
    }

    fn start(&mut self) -> Result<()> {
        if self.fail_on_start {
            return Err(PipelineError::source_io("camera unreachable").into());
        }
        self.journal.lock().unwrap().push("source start".into());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.journal.lock().unwrap().push("source stop".into());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.total.is_some_and(|total| self.produced >= total) {
            return Ok(None);
        }
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        self.produced += 1;
        if self.fail_at == Some(self.produced) {
            return Err(PipelineError::source_io("read timed out").into());
        }
        Ok(Some(Frame::new(RgbImage::new(8, 8), self.produced)))
    }
}

struct TestRecorder {
    journal: Journal,
    open: bool,
}

impl Recorder for TestRecorder {
    fn start_recording(&mut self) -> Result<()> {
        assert!(!self.open, "start while a recording is open");
        self.open = true;
        self.journal.lock().unwrap().push("start".into());
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.journal.lock().unwrap().push("stop".into());
        }
        Ok(())
    }

    fn append_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.open {
            self.journal
                .lock()
                .unwrap()
                .push(format!("append {}", frame.sequence()));
        }
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.open
    }
}

struct TestNotifier(Journal);

impl Notifier for TestNotifier {
    fn activity_started(&mut self) {
        self.0.lock().unwrap().push("started".into());
    }

    fn activity_ended(&mut self) {
        self.0.lock().unwrap().push("ended".into());
    }
}

/// Delays every detection to make the processing stage the bottleneck.
struct SlowDetector(Duration);

impl Detector for SlowDetector {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn detect(&mut self, _image: &ProcessedImage) -> Result<activity_detection::Prediction> {
        std::thread::sleep(self.0);
        Ok(activity_detection::Prediction::absent())
    }
}

struct PanickingPreProcessor {
    inner: ResizePreProcessor,
    panic_at: u64,
}

impl PreProcessor for PanickingPreProcessor {
    fn process(&mut self, frame: &Frame) -> Result<ProcessedImage> {
        if frame.sequence() == self.panic_at {
            panic!("corrupt frame {}", frame.sequence());
        }
        self.inner.process(frame)
    }
}

fn components(journal: &Journal, source: TestSource, detector: Box<dyn Detector>) -> Components {
    Components {
        source: Box::new(source),
        preprocessor: Box::new(ResizePreProcessor::new(8, 8).unwrap()),
        detector,
        recorder: Box::new(TestRecorder {
            journal: journal.clone(),
            open: false,
        }),
        notifier: Box::new(TestNotifier(journal.clone())),
    }
}

fn config(stop_threshold: u32) -> PipelineConfig {
    PipelineConfig {
        pop_timeout: Duration::from_millis(100),
        stop_threshold,
        ..PipelineConfig::default()
    }
}

#[test]
fn end_to_end_records_one_debounced_segment() {
    let journal = Journal::default();
    let flags = [true, true, true, true, false, false, false, false, false, false];
    let detector = ScriptedDetector::from_flags(&flags);
    let pipeline = Pipeline::new(
        components(&journal, TestSource::finite(&journal, 10), Box::new(detector)),
        config(5),
    );

    let report = pipeline.run().expect("pipeline starts");

    assert_eq!(report.status, RunStatus::Clean);
    assert_eq!(count(&journal, "start"), 1);
    assert_eq!(count(&journal, "stop"), 1);
    assert_eq!(count(&journal, "started"), 1);
    assert_eq!(count(&journal, "ended"), 1);
    assert_eq!(appended(&journal), (1..=8).collect::<Vec<_>>());

    let log = entries(&journal);
    let pos = |entry: &str| log.iter().position(|e| e == entry).unwrap();
    assert!(pos("start") < pos("append 1"));
    assert!(pos("append 8") < pos("stop"));
    assert!(pos("stop") < pos("ended"));
    assert_eq!(log.last().map(String::as_str), Some("source stop"));

    assert_eq!(report.stats.frames_captured, 10);
    assert_eq!(report.stats.frames_processed, 10);
    assert_eq!(report.stats.frames_observed, 10);
    assert_eq!(report.stats.frames_recorded, 8);
    assert_eq!(report.stats.segments_started, 1);
    assert!(!report.closed_open_recording);
}

#[test]
fn stop_returns_within_the_pop_timeout() {
    let journal = Journal::default();
    let pipeline = Pipeline::new(
        components(
            &journal,
            TestSource::endless(&journal, Duration::from_millis(5)),
            Box::new(ScriptedDetector::new()),
        ),
        config(3),
    );
    let pop_timeout = pipeline.config().pop_timeout;
    let running = pipeline.start().expect("pipeline starts");
    std::thread::sleep(Duration::from_millis(150));

    let stopped_at = Instant::now();
    running.stop();
    let report = running.join();

    // One pop timeout plus scheduling slack.
    let bound = pop_timeout * 11 / 10 + Duration::from_millis(50);
    assert!(
        stopped_at.elapsed() < bound,
        "join took {:?}, bound {:?}",
        stopped_at.elapsed(),
        bound
    );
    assert_eq!(report.status, RunStatus::Interrupted);
    assert!(report.stats.frames_captured > 0);
    assert_eq!(count(&journal, "source stop"), 1);
}

#[test]
fn shutdown_closes_an_open_recording() {
    let journal = Journal::default();
    let pipeline = Pipeline::new(
        components(
            &journal,
            TestSource::endless(&journal, Duration::from_millis(5)),
            Box::new(ScriptedDetector::new().otherwise(true)),
        ),
        config(3),
    );
    let signal = pipeline.shutdown_signal();
    let running = pipeline.start().expect("pipeline starts");

    let deadline = Instant::now() + Duration::from_secs(5);
    while count(&journal, "started") == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    signal.request_stop();
    let report = running.join();

    assert_eq!(report.status, RunStatus::Interrupted);
    assert!(report.closed_open_recording);
    assert_eq!(count(&journal, "start"), 1);
    assert_eq!(count(&journal, "stop"), 1);
    assert_eq!(count(&journal, "ended"), 1);
}

#[test]
fn source_start_failure_faults_without_stopping_source() {
    let journal = Journal::default();
    let source = TestSource {
        fail_on_start: true,
        ..TestSource::finite(&journal, 10)
    };
    let report = Pipeline::new(
        components(&journal, source, Box::new(ScriptedDetector::new())),
        config(3),
    )
    .run()
    .expect("pipeline starts");

    let failure = report.failure().expect("faulted");
    assert_eq!(failure.stage, Stage::Capture);
    assert_eq!(failure.kind, FailureKind::SourceIo);
    assert_eq!(count(&journal, "source stop"), 0);
}

#[test]
fn source_read_failure_stops_every_stage() {
    let journal = Journal::default();
    let source = TestSource {
        fail_at: Some(4),
        pace: Some(Duration::from_millis(5)),
        ..TestSource::finite(&journal, 100)
    };
    let report = Pipeline::new(
        components(&journal, source, Box::new(ScriptedDetector::new())),
        config(3),
    )
    .run()
    .expect("pipeline starts");

    let failure = report.failure().expect("faulted");
    assert_eq!(failure.kind, FailureKind::SourceIo);
    assert!(failure.message.contains("read timed out"));
    assert!(report.stats.frames_captured <= 3);
    assert_eq!(count(&journal, "source stop"), 1);
}

#[test]
fn detector_failure_is_reported_and_recording_closed() {
    let journal = Journal::default();
    let detector = ScriptedDetector::new()
        .then_flag(true)
        .then_flag(true)
        .then_fail("output tensor had rank 2");
    let source = TestSource {
        pace: Some(Duration::from_millis(5)),
        ..TestSource::finite(&journal, 50)
    };
    let report = Pipeline::new(components(&journal, source, Box::new(detector)), config(3))
        .run()
        .expect("pipeline starts");

    let failure = report.failure().expect("faulted");
    assert_eq!(failure.stage, Stage::Processing);
    assert_eq!(failure.kind, FailureKind::ModelOutput);
    // Whatever was started got closed.
    assert_eq!(count(&journal, "start"), count(&journal, "stop"));
    assert_eq!(count(&journal, "started"), count(&journal, "ended"));
}

#[test]
fn stage_panic_is_reported_as_a_fault() {
    let journal = Journal::default();
    let mut parts = components(
        &journal,
        TestSource::finite(&journal, 10),
        Box::new(ScriptedDetector::new()),
    );
    parts.preprocessor = Box::new(PanickingPreProcessor {
        inner: ResizePreProcessor::new(8, 8).unwrap(),
        panic_at: 2,
    });

    let report = Pipeline::new(parts, config(3)).run().expect("pipeline starts");

    let failure = report.failure().expect("faulted");
    assert_eq!(failure.stage, Stage::Processing);
    assert_eq!(failure.kind, FailureKind::StagePanic);
    assert!(failure.message.contains("corrupt frame 2"));
    assert_eq!(count(&journal, "source stop"), 1);
}

#[test]
fn slow_processing_drops_frames_without_blocking_capture() {
    let journal = Journal::default();
    let cfg = PipelineConfig {
        queue_capacity: 2,
        ..config(3)
    };
    let started = Instant::now();
    let report = Pipeline::new(
        components(
            &journal,
            TestSource::finite(&journal, 50),
            Box::new(SlowDetector(Duration::from_millis(20))),
        ),
        cfg,
    )
    .run()
    .expect("pipeline starts");

    assert_eq!(report.status, RunStatus::Clean);
    let stats = report.stats;
    assert_eq!(stats.frames_captured, 50);
    assert!(stats.capture_queue_dropped > 0);
    assert_eq!(stats.frames_processed + stats.capture_queue_dropped, 50);
    assert_eq!(
        stats.frames_observed + stats.detection_queue_dropped,
        stats.frames_processed
    );
    // Only the queued frames were processed, never all 50.
    assert!(started.elapsed() < Duration::from_millis(50 * 20));
}

#[test]
fn recorded_frames_keep_capture_order() {
    let journal = Journal::default();
    let report = Pipeline::new(
        components(
            &journal,
            TestSource::finite(&journal, 40),
            Box::new(ScriptedDetector::new().otherwise(true)),
        ),
        config(3),
    )
    .run()
    .expect("pipeline starts");

    assert_eq!(report.status, RunStatus::Clean);
    let seqs = appended(&journal);
    assert_eq!(seqs, (1..=40).collect::<Vec<_>>());
    // Still recording when the source ran out: teardown closed it.
    assert!(report.closed_open_recording);
}

#[test]
fn segment_recorder_writes_detected_frames() -> Result<()> {
    let journal = Journal::default();
    let dir = tempfile::tempdir()?;
    let mut parts = components(
        &journal,
        TestSource::finite(&journal, 6),
        Box::new(ScriptedDetector::from_flags(&[false, true, true, false, false, false])),
    );
    parts.recorder = Box::new(SegmentRecorder::new(dir.path()).with_prefix("it"));

    let report = Pipeline::new(parts, config(2)).run()?;
    assert_eq!(report.status, RunStatus::Clean);

    let segments: Vec<_> = std::fs::read_dir(dir.path())?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    assert_eq!(segments.len(), 1);
    let seg = &segments[0];
    // Frames 2..=4: two detections and one absent frame. Frame 5 closes the segment.
    for n in 1..=3 {
        assert!(seg.join(format!("frame_{:06}.jpg", n)).is_file());
    }
    assert!(!seg.join("frame_000004.jpg").exists());
    assert!(seg.join("segment.json").is_file());
    assert_eq!(count(&journal, "started"), 1);
    assert_eq!(count(&journal, "ended"), 1);
    Ok(())
}
