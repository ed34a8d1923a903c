//! Frame-rate throttle

use crate::utils::MICROS_PER_SEC;

/// Keeps decoded frames no closer together than one target frame interval
///
/// Dropping never reorders frames; kept timestamps stay strictly in
/// decode-output order.
#[derive(Debug, Clone)]
pub struct Throttle {
    /// Minimum spacing between kept frames in microseconds
    interval_us: f64,

    last_kept_us: Option<i64>,
}

impl Throttle {
    /// Create a throttle for `target_fps` (non-positive keeps every frame)
    pub fn new(target_fps: f64) -> Self {
        let interval_us = if target_fps > 0.0 {
            MICROS_PER_SEC as f64 / target_fps
        } else {
            0.0
        };

        Self {
            interval_us,
            last_kept_us: None,
        }
    }

    /// Decide on one in-range frame, remembering it when kept
    pub fn should_keep(&mut self, timestamp_us: i64) -> bool {
        let keep = match self.last_kept_us {
            None => true,
            Some(last) => (timestamp_us - last) as f64 >= self.interval_us,
        };
        if keep {
            self.last_kept_us = Some(timestamp_us);
        }
        keep
    }

    pub fn interval_us(&self) -> f64 {
        self.interval_us
    }
}
