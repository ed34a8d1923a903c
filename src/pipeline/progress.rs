//! Progress accounting for one job

use crate::utils::MICROS_PER_SEC;
use serde::Serialize;

/// Published progress numbers
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ProgressState {
    /// Completed share of the effective duration, in `[0, 1]`
    pub fraction: f64,
    pub frames_processed: u64,
    pub frames_estimated: u64,
}

/// Tracks progress from the timestamps of kept frames
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    effective_duration_us: i64,
    state: ProgressState,
}

impl ProgressTracker {
    /// Estimate the output frame count from the duration and the *target* rate
    pub fn new(effective_duration_us: i64, target_fps: f64) -> Self {
        let seconds = effective_duration_us.max(0) as f64 / MICROS_PER_SEC as f64;
        let frames_estimated = (seconds * target_fps.max(0.0)).floor() as u64;

        Self {
            effective_duration_us,
            state: ProgressState {
                fraction: 0.0,
                frames_processed: 0,
                frames_estimated,
            },
        }
    }

    /// Record one kept frame at its rebased timestamp
    pub fn advance(&mut self, adjusted_timestamp_us: i64) -> ProgressState {
        self.state.frames_processed += 1;
        if self.effective_duration_us > 0 {
            let fraction = adjusted_timestamp_us as f64 / self.effective_duration_us as f64;
            // Never step backwards, even on a misordered timestamp
            self.state.fraction = fraction.clamp(0.0, 1.0).max(self.state.fraction);
        }
        self.state
    }

    pub fn snapshot(&self) -> ProgressState {
        self.state
    }
}

impl ProgressState {
    /// Terminal numbers: everything estimated counts as done
    pub fn finished(frames_estimated: u64) -> Self {
        Self {
            fraction: 1.0,
            frames_processed: frames_estimated,
            frames_estimated,
        }
    }
}
