//! Time window of a trimmed job

use crate::utils::error::{Result, TranscodeError};
use crate::utils::format_timestamp_us;

/// Validated `[start, end]` range in source microseconds
///
/// `end_us` is already clamped to the track duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimWindow {
    pub start_us: i64,
    pub end_us: i64,
    cuts_end: bool,
}

impl TrimWindow {
    /// Resolve a requested range against the track duration
    ///
    /// Fails with a configuration error when nothing remains to encode.
    pub fn resolve(start_us: Option<i64>, end_us: Option<i64>, duration_us: i64) -> Result<Self> {
        let start_us = start_us.unwrap_or(0);
        if start_us < 0 {
            return Err(TranscodeError::Config(format!(
                "Trim start must not be negative, got {}",
                start_us
            )));
        }

        let effective_end = end_us.map_or(duration_us, |end| end.min(duration_us));
        if effective_end - start_us <= 0 {
            return Err(TranscodeError::Config(format!(
                "Empty trim window: start {} is not before end {} (duration {})",
                format_timestamp_us(start_us),
                format_timestamp_us(effective_end),
                format_timestamp_us(duration_us)
            )));
        }

        Ok(Self {
            start_us,
            end_us: effective_end,
            cuts_end: effective_end < duration_us,
        })
    }

    /// Window covering the whole track
    pub fn full(duration_us: i64) -> Result<Self> {
        Self::resolve(None, None, duration_us)
    }

    pub fn effective_duration_us(&self) -> i64 {
        self.end_us - self.start_us
    }

    /// True when decoding has to start from a keyframe before `start_us`
    pub fn needs_seek(&self) -> bool {
        self.start_us > 0
    }

    /// Decoded frames before the start are released unrendered
    pub fn is_before_start(&self, timestamp_us: i64) -> bool {
        self.needs_seek() && timestamp_us < self.start_us
    }

    /// Samples and frames after the end are not used
    pub fn is_past_end(&self, timestamp_us: i64) -> bool {
        self.cuts_end && timestamp_us > self.end_us
    }

    /// Output timestamp of a source timestamp
    pub fn rebase(&self, timestamp_us: i64) -> i64 {
        timestamp_us - self.start_us
    }
}
