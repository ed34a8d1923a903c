//! Output frame size for the transcode path

use crate::decoder::TrackInfo;
use crate::utils::error::{Result, TranscodeError};

/// Encoded output size, both sides even
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputGeometry {
    pub width: u32,
    pub height: u32,
}

impl OutputGeometry {
    /// Fit the upright picture so its longer side is `longest_side`
    ///
    /// A 90 or 270 degree rotation swaps the coded width and height first.
    /// Both results are floored to even values.
    pub fn compute(track: &TrackInfo, longest_side: u32) -> Result<Self> {
        let (width, height) = if track.is_transposed() {
            (track.height, track.width)
        } else {
            (track.width, track.height)
        };

        if width == 0 || height == 0 {
            return Err(TranscodeError::Config(format!(
                "Video track has no usable size ({}x{})",
                track.width, track.height
            )));
        }
        if longest_side < 2 {
            return Err(TranscodeError::Config(format!(
                "Target size {} is too small",
                longest_side
            )));
        }

        let (long, short) = (width.max(height) as u64, width.min(height) as u64);
        let scaled_long = floor_even(longest_side);
        let scaled_short = floor_even((short * longest_side as u64 / long) as u32).max(2);

        Ok(if width >= height {
            Self { width: scaled_long, height: scaled_short }
        } else {
            Self { width: scaled_short, height: scaled_long }
        })
    }
}

fn floor_even(value: u32) -> u32 {
    value - value % 2
}
