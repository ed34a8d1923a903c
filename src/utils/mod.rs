//! Utility module for the transcoder
//!
//! This module provides common utilities used throughout the crate:
//! - Error handling with custom error types
//! - Configuration management
//! - Time conversion helpers

pub mod config;
pub mod error;

// Re-export commonly used items
pub use config::{Config, GeneralConfig, OverlayConfig, TranscodeConfig};
pub use error::{IntoTranscodeError, Result, TranscodeError};

/// Microseconds per second, the pipeline's time base
pub const MICROS_PER_SEC: i64 = 1_000_000;

/// Format a microsecond timestamp for logs as "MM:SS.mmm"
pub fn format_timestamp_us(ts_us: i64) -> String {
    let sign = if ts_us < 0 { "-" } else { "" };
    let abs = ts_us.unsigned_abs();
    let total_ms = abs / 1000;
    let minutes = total_ms / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{}{:02}:{:02}.{:03}", sign, minutes, seconds, millis)
}
