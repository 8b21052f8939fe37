use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic run clock with pause/resume. Paused intervals do not accrue
/// toward the elapsed readout.
#[derive(Debug, Default)]
pub struct Timer {
    /// Wall-clock start of the run, as reported by the client.
    start_time: Option<SystemTime>,
    /// Monotonic anchor of the currently running interval.
    running_since: Option<Instant>,
    /// Elapsed time accrued across completed intervals.
    accrued: Duration,
}

impl Timer {
    /// Starts the clock, resetting any previous state.
    pub fn start(&mut self, start_time: SystemTime) {
        self.start_time = Some(start_time);
        self.running_since = Some(Instant::now());
        self.accrued = Duration::ZERO;
    }

    /// Stops accrual. No-op when already paused or never started.
    pub fn pause(&mut self) {
        if let Some(anchor) = self.running_since.take() {
            self.accrued += anchor.elapsed();
        }
    }

    /// Resumes accrual. No-op when already running or never started.
    pub fn resume(&mut self) {
        if self.start_time.is_some() && self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    /// Returns total accrued run time.
    pub fn elapsed(&self) -> Duration {
        let running = self
            .running_since
            .map(|anchor| anchor.elapsed())
            .unwrap_or(Duration::ZERO);
        self.accrued + running
    }

    /// Returns the run start as float seconds since the Unix epoch, or 0
    /// when the clock was never started.
    pub fn start_secs(&self) -> f64 {
        self.start_time
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}
