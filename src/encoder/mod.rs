//! Encoder module for the transcoder
//!
//! Output side of the pipeline. The video path feeds rendered frames into an
//! [`EncoderSurface`], drains encoded packets from a [`VideoEncoder`] and
//! writes them through a [`Muxer`]. The overlay path hands read-back frames
//! to an [`AnimatedImageEncoder`] and keeps the finished bytes.

mod animated;
mod ffmpeg_encoder;
mod ffmpeg_muxer;
mod ffmpeg_webp;

pub use animated::{AnimatedImageEncoder, ImageHint, WebPConfig};
pub use ffmpeg_encoder::FfmpegVideoEncoder;
pub use ffmpeg_muxer::FfmpegMuxer;
pub use ffmpeg_webp::FfmpegWebpEncoder;

use crate::utils::error::{Result, TranscodeError};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frames the encoder surface can hold before the compositor blocks
pub const SURFACE_CAPACITY: usize = 4;

/// Longest single wait on a full surface before re-checking for a halt
const SUBMIT_POLL: Duration = Duration::from_millis(20);

/// One composited frame: tightly packed RGBA8 rows, top row first
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub pts_us: i64,
}

/// Items travelling from the compositor to the encoder
#[derive(Debug)]
pub enum SurfaceInput {
    Frame(RenderedFrame),
    EndOfStream,
}

/// Producer end of an encoder's input queue
///
/// The compositor submits rendered frames here; the feed loop signals end
/// of stream here once decoding has drained. Once [`EncoderSurface::halt`]
/// is called on any clone, pending and later submits fail with
/// [`TranscodeError::Cancelled`].
#[derive(Debug, Clone)]
pub struct EncoderSurface {
    sender: Sender<SurfaceInput>,
    submit_timeout: Duration,
    halted: Arc<AtomicBool>,
}

impl EncoderSurface {
    /// Create a surface and the receiving end the encoder consumes
    pub fn channel(submit_timeout: Duration) -> (Self, Receiver<SurfaceInput>) {
        let (sender, receiver) = bounded(SURFACE_CAPACITY);
        let surface = Self {
            sender,
            submit_timeout,
            halted: Arc::new(AtomicBool::new(false)),
        };
        (surface, receiver)
    }

    /// Stop accepting input; a producer blocked on a full surface returns promptly
    pub fn halt(&self) {
        self.halted.store(true, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Queue a rendered frame for encoding
    pub fn submit(&self, frame: RenderedFrame) -> Result<()> {
        self.send(SurfaceInput::Frame(frame))
    }

    /// Mark the end of the input stream
    pub fn signal_end_of_stream(&self) -> Result<()> {
        self.send(SurfaceInput::EndOfStream)
    }

    fn send(&self, mut input: SurfaceInput) -> Result<()> {
        let deadline = Instant::now() + self.submit_timeout;
        loop {
            if self.is_halted() {
                return Err(TranscodeError::Cancelled);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TranscodeError::Encoder(format!(
                    "Encoder input stalled for {:?}",
                    self.submit_timeout
                )));
            }

            match self.sender.send_timeout(input, remaining.min(SUBMIT_POLL)) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => input = returned,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(TranscodeError::Encoder("Encoder input surface closed".to_string()))
                }
            }
        }
    }
}

/// One encoded access unit, timestamps in microseconds
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub pts_us: i64,
    pub dts_us: i64,
    pub is_key: bool,
}

/// Negotiated encoder output format, announced once before the first packet
#[derive(Clone)]
pub struct OutputFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,

    /// Container-ready codec parameters (codec id, extradata); `None` for
    /// encoders that do not come from libavcodec
    pub codec_parameters: Option<ffmpeg_next::codec::Parameters>,
}

impl fmt::Debug for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputFormat")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frame_rate", &self.frame_rate)
            .field("codec_parameters", &self.codec_parameters.as_ref().map(|p| p.id()))
            .finish()
    }
}

/// Result of polling the video encoder
#[derive(Debug)]
pub enum EncoderOutput {
    /// Nothing ready within the timeout
    TryAgain,

    /// The output format is known; the muxer may start
    FormatChanged(OutputFormat),

    Packet(EncodedPacket),

    /// Every submitted frame has been encoded and drained
    EndOfStream,
}

/// Settings for the AVC encoder
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,

    /// Bits per second
    pub bitrate: usize,

    pub keyframe_interval_secs: u32,

    /// Preferred encoder name; any H.264 encoder is used when it is missing
    pub codec: String,

    /// How long a submit may block on a full input surface
    pub submit_timeout: Duration,
}

impl VideoEncoderSettings {
    /// Frames between keyframes
    pub fn gop_size(&self) -> u32 {
        (self.frame_rate * self.keyframe_interval_secs).max(1)
    }
}

/// Surface-fed video encoder
pub trait VideoEncoder: Send {
    /// Producer handle for rendered frames
    fn input_surface(&self) -> EncoderSurface;

    /// Poll for encoder output, waiting at most `timeout` for new input
    fn dequeue_output(&mut self, timeout: Duration) -> Result<EncoderOutput>;
}

/// Container writer
///
/// Samples may only be written after [`Muxer::start`].
pub trait Muxer: Send {
    /// Register a track for the encoder's output format, returning its index
    fn add_track(&mut self, format: &OutputFormat) -> Result<usize>;

    /// Write the container header
    fn start(&mut self) -> Result<()>;

    fn is_started(&self) -> bool;

    /// Write one packet to `track`
    fn write_sample(&mut self, track: usize, packet: &EncodedPacket) -> Result<()>;

    /// Finish the container
    fn stop(&mut self) -> Result<()>;
}
