use std::time::{Duration, Instant};

/// Frame-rate throttle.
///
/// `wait` sleeps until the next frame is due. A caller that falls behind by
/// more than one interval is re-anchored to now instead of bursting to catch up.
#[derive(Clone, Debug)]
pub struct Pacer {
    interval: Option<Duration>,
    next_due: Option<Instant>,
}

impl Pacer {
    /// `target_fps` of 0 means unpaced.
    pub fn new(target_fps: u32) -> Self {
        let interval = (target_fps > 0).then(|| Duration::from_secs(1) / target_fps);
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn unpaced() -> Self {
        Self::new(0)
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Block until the next frame is due.
    pub fn wait(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        let now = Instant::now();
        match self.next_due {
            Some(due) if due > now => {
                std::thread::sleep(due - now);
                self.next_due = Some(due + interval);
            }
            Some(due) if now - due < interval => self.next_due = Some(due + interval),
            _ => self.next_due = Some(now + interval),
        }
    }

    /// Non-blocking variant for sources that cannot sleep: returns whether a
    /// frame arriving now should be kept. Used to decimate live streams.
    pub fn admit(&mut self, now: Instant) -> bool {
        let Some(interval) = self.interval else {
            return true;
        };
        match self.next_due {
            Some(due) if now < due => false,
            _ => {
                self.next_due = Some(now + interval);
                true
            }
        }
    }

    /// Forget the schedule, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.next_due = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_fps_is_unpaced() {
        let mut pacer = Pacer::new(0);
        assert!(pacer.interval().is_none());
        let started = Instant::now();
        for _ in 0..100 {
            pacer.wait();
        }
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn wait_spaces_frames() {
        let mut pacer = Pacer::new(50);
        let started = Instant::now();
        for _ in 0..4 {
            pacer.wait();
        }
        // First call is immediate, then three 20ms intervals.
        assert!(started.elapsed() >= Duration::from_millis(55));
    }

    #[test]
    fn admit_decimates() {
        let mut pacer = Pacer::new(10);
        let t0 = Instant::now();
        assert!(pacer.admit(t0));
        assert!(!pacer.admit(t0 + Duration::from_millis(40)));
        assert!(pacer.admit(t0 + Duration::from_millis(100)));
    }
}
