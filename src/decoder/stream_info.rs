//! Video track metadata extraction
//!
//! Reads dimensions, duration, frame rate and display rotation of the
//! selected video stream. Rotation comes from the stream's display-matrix
//! side data, falling back to the legacy `rotate` metadata tag.

use crate::decoder::TrackInfo;
use crate::utils::error::{IntoTranscodeError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::Rescale;

/// Builds [`TrackInfo`] from an opened input
pub struct StreamInfoExtractor;

impl StreamInfoExtractor {
    /// Extract metadata of the stream at `stream_index`
    pub fn extract_track(input: &ffmpeg::format::context::Input, stream_index: usize) -> Result<TrackInfo> {
        let stream = input
            .stream(stream_index)
            .ok_or_else(|| crate::internal_error!("stream {} vanished", stream_index))?;

        let decoder = ffmpeg::codec::Context::from_parameters(stream.parameters())
            .decoder_err("Reading codec parameters")?
            .decoder()
            .video()
            .decoder_err("Reading video parameters")?;

        let duration_us = if stream.duration() > 0 {
            stream.duration().rescale(stream.time_base(), ffmpeg::rescale::TIME_BASE)
        } else {
            // Container duration is already in AV_TIME_BASE (microseconds)
            input.duration().max(0)
        };

        Ok(TrackInfo {
            width: decoder.width(),
            height: decoder.height(),
            duration_us,
            rotation_degrees: Self::rotation(&stream),
            frame_rate: Self::frame_rate(&stream),
        })
    }

    /// Frame rate from `avg_frame_rate`, then `r_frame_rate`
    fn frame_rate(stream: &ffmpeg::format::stream::Stream) -> Option<f64> {
        [stream.avg_frame_rate(), stream.rate()]
            .into_iter()
            .find(|rate| rate.numerator() > 0 && rate.denominator() > 0)
            .map(f64::from)
    }

    fn rotation(stream: &ffmpeg::format::stream::Stream) -> u32 {
        for side_data in stream.side_data() {
            if side_data.kind() == ffmpeg::codec::packet::side_data::Type::DisplayMatrix {
                if let Some(degrees) = rotation_from_display_matrix(side_data.data()) {
                    return degrees;
                }
            }
        }

        stream
            .metadata()
            .get("rotate")
            .and_then(|tag| tag.trim().parse::<f64>().ok())
            .map(normalize_rotation)
            .unwrap_or(0)
    }
}

/// Clockwise rotation encoded in a 3x3 display matrix (nine native-endian i32s)
///
/// The first two columns are 16.16 fixed point. Returns `None` for a
/// truncated or degenerate matrix.
pub fn rotation_from_display_matrix(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < 36 {
        return None;
    }

    let entry = |i: usize| -> f64 {
        let raw = [bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]];
        f64::from(i32::from_ne_bytes(raw)) / 65536.0
    };

    let scale_x = entry(0).hypot(entry(3));
    let scale_y = entry(1).hypot(entry(4));
    if scale_x == 0.0 || scale_y == 0.0 {
        return None;
    }

    // Negated av_display_rotation_get(): how far the picture must turn clockwise
    let clockwise = (entry(1) / scale_y).atan2(entry(0) / scale_x).to_degrees();
    Some(normalize_rotation(clockwise))
}

/// Snap an arbitrary angle in degrees to 0, 90, 180 or 270
pub fn normalize_rotation(degrees: f64) -> u32 {
    if !degrees.is_finite() {
        return 0;
    }
    let quarter_turns = (degrees / 90.0).round() as i64;
    (quarter_turns.rem_euclid(4) * 90) as u32
}
