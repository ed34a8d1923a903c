//! Pipeline module for the transcoder
//!
//! This module owns job orchestration: the per-job math (output geometry,
//! trim window, throttle, progress), the state machine observers subscribe
//! to, and the two job runners that drive demuxer, decoder, compositor,
//! encoder and muxer through the feed and drain loops.

mod backend;
mod feed;
mod geometry;
mod orchestrator;
mod overlay_job;
mod progress;
mod resources;
mod state;
mod throttle;
mod transcode_job;
mod trim;

pub use backend::FfmpegBackend;
pub use geometry::OutputGeometry;
pub use orchestrator::Transcoder;
pub use progress::{ProgressState, ProgressTracker};
pub use state::{PipelineState, PipelineStateManager, ProgressEvent};
pub use throttle::Throttle;
pub use trim::TrimWindow;

use crate::decoder::Demuxer;
use crate::encoder::{AnimatedImageEncoder, EncoderSurface, Muxer, VideoEncoder, VideoEncoderSettings, WebPConfig};
use crate::renderer::{Compositor, OverlayCompositor, OverlayImage};
use crate::utils::error::{Result, TranscodeError};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Identifier handed out for every accepted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Trim/crop/scale request
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub start_us: Option<i64>,
    pub end_us: Option<i64>,

    /// Output frame-rate cap; the configured default when `None`
    pub max_fps: Option<f64>,
}

impl TranscodeRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            start_us: None,
            end_us: None,
            max_fps: None,
        }
    }

    pub fn with_trim(mut self, start_us: Option<i64>, end_us: Option<i64>) -> Self {
        self.start_us = start_us;
        self.end_us = end_us;
        self
    }

    pub fn with_max_fps(mut self, max_fps: f64) -> Self {
        self.max_fps = Some(max_fps);
        self
    }
}

/// Overlay-to-animated-image request
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayRequest {
    pub video: PathBuf,
    pub overlay: PathBuf,
    pub output: PathBuf,
    pub config: WebPConfig,
    pub max_fps: f64,
}

/// Factory for every codec, container and GPU handle a job acquires
///
/// Jobs only talk to these capabilities, so the whole pipeline runs against
/// FFmpeg/wgpu in production and against counting doubles in tests.
pub trait MediaBackend: Send + Sync {
    fn open_demuxer(&self, path: &Path) -> Result<Box<dyn Demuxer>>;

    fn create_video_encoder(&self, settings: &VideoEncoderSettings) -> Result<Box<dyn VideoEncoder>>;

    fn create_muxer(&self, path: &Path) -> Result<Box<dyn Muxer>>;

    /// Compositor drawing `geometry`-sized frames into `surface`
    fn create_compositor(
        &self,
        geometry: OutputGeometry,
        rotation_degrees: u32,
        surface: EncoderSurface,
    ) -> Result<Box<dyn Compositor>>;

    fn create_overlay_compositor(
        &self,
        overlay: &OverlayImage,
        rotation_degrees: u32,
    ) -> Result<Box<dyn OverlayCompositor>>;

    fn create_image_encoder(&self) -> Result<Box<dyn AnimatedImageEncoder>>;
}

/// Stop flags shared by a job's loops
///
/// `cancel` belongs to the caller; `abort` is raised by a loop that failed
/// so its peer unwinds too.
#[derive(Debug, Clone, Default)]
pub(crate) struct JobControl {
    cancel: Arc<AtomicBool>,
    abort: Arc<AtomicBool>,
}

impl JobControl {
    pub fn new(cancel: Arc<AtomicBool>) -> Self {
        Self {
            cancel,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fails with [`TranscodeError::Cancelled`] once either flag is raised
    pub fn check(&self) -> Result<()> {
        if self.cancel.load(Ordering::Acquire) || self.abort.load(Ordering::Acquire) {
            Err(TranscodeError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// Target output rate: the cap, unless the source is slower
pub(crate) fn target_frame_rate(max_fps: f64, source_fps: f64) -> Result<f64> {
    if !max_fps.is_finite() || max_fps <= 0.0 {
        return Err(TranscodeError::Config(format!(
            "Frame-rate cap must be positive, got {}",
            max_fps
        )));
    }
    Ok(max_fps.min(source_fps))
}
