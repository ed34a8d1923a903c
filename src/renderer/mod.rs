//! Renderer module for the transcoder
//!
//! GPU side of the pipeline. The decoder publishes pictures into a
//! [`FrameSurface`]; a compositor waits for each one with a bounded timeout,
//! uploads it and draws it through wgpu into an offscreen target, then
//! either feeds the video encoder or returns the read-back pixels.

pub mod crop_scale;
pub mod gpu_context;
pub mod overlay;
pub mod pipeline;
pub mod surface;
pub mod texture;
pub mod transform;
mod video_layer;

pub use crop_scale::CropScaleCompositor;
pub use gpu_context::GpuContext;
pub use overlay::{OverlayImage, WgpuOverlayCompositor};
pub use surface::{FrameSignal, FrameSurface, SurfaceImage};
pub use transform::{letterbox_viewport, rotation_matrix, Viewport};

use crate::utils::error::Result;
use std::time::Duration;

/// Compositor bound to a video encoder's input surface
pub trait Compositor: Send {
    /// Surface the decoder should render into
    fn decoder_surface(&self) -> FrameSurface;

    /// Wait for the decoder to deliver the next picture and latch it
    ///
    /// A timeout surfaces as [`TranscodeError::FrameTimeout`](crate::utils::error::TranscodeError::FrameTimeout).
    fn await_new_frame(&mut self, timeout: Duration) -> Result<()>;

    /// Draw the latched picture and submit it to the encoder with `pts_us`
    fn draw_frame(&mut self, pts_us: i64) -> Result<()>;
}

/// Compositor producing read-back RGBA canvases with an overlay on top
pub trait OverlayCompositor: Send {
    fn decoder_surface(&self) -> FrameSurface;

    fn await_new_frame(&mut self, timeout: Duration) -> Result<()>;

    /// Compose the latched picture with the overlay and read the canvas back
    fn draw_frame(&mut self) -> Result<Vec<u8>>;

    /// Side of the square output canvas
    fn output_size(&self) -> u32;
}
