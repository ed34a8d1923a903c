//! Decoder module for the transcoder
//!
//! This module covers the input side of the pipeline: demultiplexing the
//! source container into encoded samples and decoding those samples into
//! images published on a [`FrameSurface`]. Both stages sit behind traits so
//! the pipeline can run against FFmpeg or against test doubles.

mod ffmpeg_decoder;
mod ffmpeg_demuxer;
mod stream_info;

pub use ffmpeg_decoder::FfmpegVideoDecoder;
pub use ffmpeg_demuxer::FfmpegDemuxer;
pub use stream_info::{normalize_rotation, rotation_from_display_matrix, StreamInfoExtractor};

use crate::renderer::FrameSurface;
use crate::utils::error::Result;
use std::time::Duration;

/// Metadata of the selected video track, read once when the source is opened
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    /// Coded width in pixels
    pub width: u32,

    /// Coded height in pixels
    pub height: u32,

    /// Track duration in microseconds
    pub duration_us: i64,

    /// Clockwise display rotation: 0, 90, 180 or 270
    pub rotation_degrees: u32,

    /// Frame rate advertised by the container, if any
    pub frame_rate: Option<f64>,
}

impl TrackInfo {
    /// Frame rate hint, or `fallback` when the container carries none
    pub fn frame_rate_or(&self, fallback: f64) -> f64 {
        match self.frame_rate {
            Some(fps) if fps.is_finite() && fps > 0.0 => fps,
            _ => fallback,
        }
    }

    /// True when the display rotation swaps the logical width and height
    pub fn is_transposed(&self) -> bool {
        self.rotation_degrees == 90 || self.rotation_degrees == 270
    }
}

/// One compressed access unit, timestamps in microseconds
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSample {
    pub data: Vec<u8>,
    pub pts_us: i64,
    pub dts_us: i64,
    pub is_key: bool,
}

/// A decoded picture still owned by the decoder
///
/// The pipeline must hand every buffer back through
/// [`VideoDecoder::release_output`], choosing whether it reaches the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBuffer {
    pub id: u64,
    pub pts_us: i64,
}

/// Result of polling the decoder
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderOutput {
    /// Nothing ready yet
    TryAgain,

    /// A decoded picture is ready
    Buffer(OutputBuffer),

    /// All input has been decoded and drained
    EndOfStream,
}

/// Source container reader
pub trait Demuxer: Send {
    /// Metadata of the selected video track
    fn track_info(&self) -> &TrackInfo;

    /// Position the reader on the last keyframe at or before `timestamp_us`
    fn seek_to_keyframe(&mut self, timestamp_us: i64) -> Result<()>;

    /// Next video access unit in decode order, or `None` once the input is exhausted
    fn read_sample(&mut self) -> Result<Option<EncodedSample>>;

    /// Create a decoder for the selected track that renders into `surface`
    fn open_decoder(&mut self, surface: FrameSurface) -> Result<Box<dyn VideoDecoder>>;
}

/// Video decoder with explicit output-buffer ownership
pub trait VideoDecoder: Send {
    /// Queue one access unit for decoding
    fn queue_sample(&mut self, sample: EncodedSample) -> Result<()>;

    /// Tell the decoder no more samples will follow
    fn signal_end_of_input(&mut self) -> Result<()>;

    /// Poll for a decoded picture, waiting at most `timeout`
    fn dequeue_output(&mut self, timeout: Duration) -> Result<DecoderOutput>;

    /// Return a buffer to the decoder; with `render` set the picture is
    /// published on the decoder's surface first
    fn release_output(&mut self, buffer: OutputBuffer, render: bool) -> Result<()>;
}

/// Initialize FFmpeg once per process
pub fn init_ffmpeg() -> Result<()> {
    static INIT: once_cell::sync::OnceCell<()> = once_cell::sync::OnceCell::new();

    INIT.get_or_try_init(|| {
        ffmpeg_next::init()?;
        ffmpeg_next::log::set_level(ffmpeg_next::log::Level::Warning);
        log::debug!("FFmpeg initialized");
        Ok::<(), ffmpeg_next::Error>(())
    })?;

    Ok(())
}
