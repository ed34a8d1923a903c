//! Decoded-video texture shared by both compositors

use crate::renderer::gpu_context::GpuContext;
use crate::renderer::pipeline::{QuadBinding, QuadPipeline};
use crate::renderer::surface::FrameSurface;
use crate::renderer::texture::FrameTexture;
use crate::renderer::transform::rotation_matrix;
use crate::utils::error::{Result, TranscodeError};
use log::debug;
use std::time::Duration;

/// The decoder's surface plus the GPU texture holding its latest picture
pub(crate) struct VideoLayer {
    surface: FrameSurface,
    texture: FrameTexture,
    binding: QuadBinding,
    rotation_degrees: u32,
    has_frame: bool,
}

impl VideoLayer {
    pub fn new(gpu: &GpuContext, pipeline: &QuadPipeline, rotation_degrees: u32) -> Self {
        let texture = FrameTexture::new(&gpu.device, 1, 1);
        let binding = pipeline.create_binding(&gpu.device, texture.view());
        pipeline.set_transform(&gpu.queue, &binding, rotation_matrix(rotation_degrees));

        Self {
            surface: FrameSurface::new(),
            texture,
            binding,
            rotation_degrees,
            has_frame: false,
        }
    }

    pub fn surface(&self) -> FrameSurface {
        self.surface.clone()
    }

    /// Wait for the decoder to publish a picture, then upload it
    pub fn await_and_upload(
        &mut self,
        gpu: &GpuContext,
        pipeline: &QuadPipeline,
        timeout: Duration,
    ) -> Result<()> {
        self.surface.await_frame(timeout)?;

        // The permit can outlive its image when two publishes raced one latch
        let Some(image) = self.surface.latch() else {
            debug!("Frame signal without a pending image, keeping previous texture");
            return Ok(());
        };

        if self.texture.upload_image(&gpu.device, &gpu.queue, &image)? {
            debug!(
                "Video texture resized to {}x{}",
                image.width, image.height
            );
            self.binding = pipeline.create_binding(&gpu.device, self.texture.view());
            pipeline.set_transform(&gpu.queue, &self.binding, rotation_matrix(self.rotation_degrees));
        }
        self.has_frame = true;
        Ok(())
    }

    /// Binding to draw, once at least one picture has been uploaded
    pub fn binding(&self) -> Result<&QuadBinding> {
        if self.has_frame {
            Ok(&self.binding)
        } else {
            Err(TranscodeError::invariant("Draw requested before any decoded frame arrived"))
        }
    }

    /// Picture size as displayed, after undoing rotation
    pub fn displayed_dimensions(&self) -> (u32, u32) {
        let (width, height) = self.texture.dimensions();
        if self.rotation_degrees == 90 || self.rotation_degrees == 270 {
            (height, width)
        } else {
            (width, height)
        }
    }
}
