//! Debounced activity state machine.
//!
//! A single detection opens a recording. Closing it takes `stop_threshold`
//! consecutive frames without activity, so a flickering detector does not
//! chop one event into many segments.
//!
//! `ActivityState` is the pure transition function. `ActivityMonitor` wraps it
//! with the recorder and notifier side effects and is owned by the recording
//! stage thread.

use anyhow::{Context, Result};

use crate::detect::Prediction;
use crate::frame::Frame;
use crate::notify::Notifier;
use crate::record::Recorder;

/// What one observation did to the state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Idle, activity seen: a recording opens.
    Started,
    /// Recording stays open.
    Continued,
    /// Absence reached the threshold: the recording closes.
    Stopped,
    /// Idle and nothing seen.
    Idle,
}

impl Transition {
    /// Is the observed frame part of a recording? The frame that closes one
    /// is not.
    pub fn records_frame(self) -> bool {
        matches!(self, Transition::Started | Transition::Continued)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActivityState {
    is_recording: bool,
    consecutive_absent_count: u32,
}

impl ActivityState {
    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    pub fn consecutive_absent_count(&self) -> u32 {
        self.consecutive_absent_count
    }

    /// Advance by one observation. A `stop_threshold` of 0 behaves as 1.
    pub fn step(&mut self, detected: bool, stop_threshold: u32) -> Transition {
        match (self.is_recording, detected) {
            (false, true) => {
                self.is_recording = true;
                self.consecutive_absent_count = 0;
                Transition::Started
            }
            (false, false) => Transition::Idle,
            (true, true) => {
                self.consecutive_absent_count = 0;
                Transition::Continued
            }
            (true, false) => {
                self.consecutive_absent_count += 1;
                if self.consecutive_absent_count >= stop_threshold.max(1) {
                    *self = ActivityState::default();
                    Transition::Stopped
                } else {
                    Transition::Continued
                }
            }
        }
    }
}

/// Drives a `Recorder` and a `Notifier` from (frame, prediction) pairs.
pub struct ActivityMonitor {
    state: ActivityState,
    stop_threshold: u32,
    recorder: Box<dyn Recorder>,
    notifier: Box<dyn Notifier>,
}

impl ActivityMonitor {
    pub fn new(
        recorder: Box<dyn Recorder>,
        notifier: Box<dyn Notifier>,
        stop_threshold: u32,
    ) -> Self {
        Self {
            state: ActivityState::default(),
            stop_threshold: stop_threshold.max(1),
            recorder,
            notifier,
        }
    }

    pub fn state(&self) -> ActivityState {
        self.state
    }

    pub fn stop_threshold(&self) -> u32 {
        self.stop_threshold
    }

    /// Feed one frame and its prediction.
    ///
    /// Frames observed while the recording stays open get the prediction's
    /// regions drawn on them and are appended. The frame that closes a
    /// recording is not appended.
    pub fn observe(&mut self, mut frame: Frame, prediction: &Prediction) -> Result<Transition> {
        let mut next = self.state;
        let transition = next.step(prediction.detected, self.stop_threshold);

        match transition {
            Transition::Started => {
                self.recorder
                    .start_recording()
                    .context("failed to start recording")?;
                self.state = next;
                self.notifier.activity_started();
            }
            Transition::Continued | Transition::Idle => self.state = next,
            Transition::Stopped => {}
        }

        if transition.records_frame() {
            frame.annotate(&prediction.regions);
            self.recorder
                .append_frame(&frame)
                .with_context(|| format!("failed to append frame {}", frame.sequence()))?;
        }

        if transition == Transition::Stopped {
            self.recorder
                .stop_recording()
                .context("failed to stop recording")?;
            self.state = next;
            self.notifier.activity_ended();
        }

        log::debug!(
            "frame {}: {:?} (absent {})",
            frame.sequence(),
            transition,
            self.state.consecutive_absent_count
        );
        Ok(transition)
    }

    /// Close an open recording and announce the end. Returns whether one was open.
    pub fn close(&mut self) -> Result<bool> {
        let was_recording = self.state.is_recording;
        if was_recording || self.recorder.is_recording() {
            self.recorder
                .stop_recording()
                .context("failed to close recording")?;
        }
        self.state = ActivityState::default();
        if was_recording {
            self.notifier.activity_ended();
        }
        Ok(was_recording)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::PipelineError;
    use image::RgbImage;
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<String>>>;

    struct FakeRecorder {
        journal: Journal,
        open: bool,
        fail_start: bool,
    }

    impl Recorder for FakeRecorder {
        fn start_recording(&mut self) -> Result<()> {
            if self.fail_start {
                return Err(PipelineError::recorder("disk full").into());
            }
            self.open = true;
            self.journal.lock().unwrap().push("start".into());
            Ok(())
        }
        fn stop_recording(&mut self) -> Result<()> {
            self.open = false;
            self.journal.lock().unwrap().push("stop".into());
            Ok(())
        }
        fn append_frame(&mut self, frame: &Frame) -> Result<()> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("append {}", frame.sequence()));
            Ok(())
        }
        fn is_recording(&self) -> bool {
            self.open
        }
    }

    struct FakeNotifier(Journal);

    impl Notifier for FakeNotifier {
        fn activity_started(&mut self) {
            self.0.lock().unwrap().push("started".into());
        }
        fn activity_ended(&mut self) {
            self.0.lock().unwrap().push("ended".into());
        }
    }

    fn monitor(threshold: u32) -> (ActivityMonitor, Journal) {
        let journal: Journal = Arc::default();
        let recorder = FakeRecorder {
            journal: journal.clone(),
            open: false,
            fail_start: false,
        };
        let monitor = ActivityMonitor::new(
            Box::new(recorder),
            Box::new(FakeNotifier(journal.clone())),
            threshold,
        );
        (monitor, journal)
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(RgbImage::new(8, 8), seq)
    }

    fn prediction(detected: bool) -> Prediction {
        if detected {
            Prediction::present(vec![BoundingBox::new(1.0, 1.0, 6.0, 6.0, 0.9)])
        } else {
            Prediction::absent()
        }
    }

    fn feed(monitor: &mut ActivityMonitor, flags: &[bool]) -> Vec<Transition> {
        flags
            .iter()
            .enumerate()
            .map(|(i, &d)| monitor.observe(frame(i as u64 + 1), &prediction(d)).unwrap())
            .collect()
    }

    fn count(journal: &Journal, entry: &str) -> usize {
        journal.lock().unwrap().iter().filter(|e| *e == entry).count()
    }

    #[test]
    fn step_is_pure_hysteresis() {
        let mut state = ActivityState::default();
        assert_eq!(state.step(false, 2), Transition::Idle);
        assert_eq!(state.step(true, 2), Transition::Started);
        assert_eq!(state.step(false, 2), Transition::Continued);
        assert_eq!(state.consecutive_absent_count(), 1);
        assert_eq!(state.step(true, 2), Transition::Continued);
        assert_eq!(state.consecutive_absent_count(), 0);
        assert_eq!(state.step(false, 2), Transition::Continued);
        assert_eq!(state.step(false, 2), Transition::Stopped);
        assert_eq!(state, ActivityState::default());
    }

    #[test]
    fn detection_while_idle_starts_once_and_announces() {
        let (mut monitor, journal) = monitor(3);
        assert_eq!(feed(&mut monitor, &[true]), vec![Transition::Started]);
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["start", "started", "append 1"]
        );
        assert!(monitor.state().is_recording());
    }

    #[test]
    fn absence_must_be_consecutive_to_stop() {
        let (mut monitor, journal) = monitor(3);
        let transitions = feed(
            &mut monitor,
            &[true, false, false, true, false, false, false],
        );
        assert_eq!(
            transitions.iter().filter(|t| **t == Transition::Stopped).count(),
            1
        );
        assert_eq!(transitions[6], Transition::Stopped);
        assert_eq!(count(&journal, "start"), 1);
        assert_eq!(count(&journal, "stop"), 1);
        assert_eq!(count(&journal, "ended"), 1);
        // The closing frame is not recorded.
        let entries = journal.lock().unwrap().clone();
        assert_eq!(&entries[entries.len() - 3..], ["append 6", "stop", "ended"]);
        assert_eq!(count(&journal, "append 7"), 0);
    }

    #[test]
    fn closing_frame_is_not_appended() {
        let (mut monitor, journal) = monitor(1);
        feed(&mut monitor, &[true, false]);
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["start", "started", "append 1", "stop", "ended"]
        );
        assert!(!Transition::Stopped.records_frame());
    }

    #[test]
    fn repeated_detections_do_not_restart() {
        let (mut monitor, journal) = monitor(3);
        feed(&mut monitor, &[true, true, true, true]);
        assert_eq!(count(&journal, "start"), 1);
        assert_eq!(count(&journal, "started"), 1);
        assert_eq!(monitor.state().consecutive_absent_count(), 0);
    }

    #[test]
    fn idle_absence_has_no_side_effects() {
        let (mut monitor, journal) = monitor(3);
        feed(&mut monitor, &[false, false, false]);
        assert!(journal.lock().unwrap().is_empty());
        assert!(!monitor.close().unwrap());
        assert!(journal.lock().unwrap().is_empty());
    }

    #[test]
    fn close_stops_an_open_recording() {
        let (mut monitor, journal) = monitor(5);
        feed(&mut monitor, &[true, false]);
        assert!(monitor.close().unwrap());
        assert!(!monitor.state().is_recording());
        let entries = journal.lock().unwrap().clone();
        assert_eq!(&entries[entries.len() - 2..], ["stop", "ended"]);
    }

    #[test]
    fn failed_start_leaves_state_idle() {
        let journal: Journal = Arc::default();
        let recorder = FakeRecorder {
            journal: journal.clone(),
            open: false,
            fail_start: true,
        };
        let mut monitor = ActivityMonitor::new(
            Box::new(recorder),
            Box::new(FakeNotifier(journal.clone())),
            3,
        );
        let err = monitor.observe(frame(1), &prediction(true)).unwrap_err();
        assert_eq!(PipelineError::kind_of(&err), crate::FailureKind::Recorder);
        assert!(!monitor.state().is_recording());
        assert!(journal.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_threshold_is_treated_as_one() {
        let (mut monitor, _journal) = monitor(0);
        assert_eq!(monitor.stop_threshold(), 1);
        assert_eq!(
            feed(&mut monitor, &[true, false]),
            vec![Transition::Started, Transition::Stopped]
        );
    }
}
