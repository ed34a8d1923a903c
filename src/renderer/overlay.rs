//! Overlay compositor for the animated-image path
//!
//! Each frame is composed on a square transparent canvas: the decoded video
//! letterboxed in the centre, the overlay image stretched over the whole
//! canvas on top with alpha blending. The canvas is read back as RGBA.

use crate::renderer::gpu_context::GpuContext;
use crate::renderer::pipeline::{QuadBinding, QuadPipeline};
use crate::renderer::surface::FrameSurface;
use crate::renderer::texture::{FrameTexture, RenderTarget, TEXTURE_FORMAT};
use crate::renderer::transform::{letterbox_viewport, Viewport};
use crate::renderer::video_layer::VideoLayer;
use crate::renderer::OverlayCompositor;
use crate::utils::error::{Result, TranscodeError};
use image::imageops::FilterType;
use log::debug;
use std::path::Path;
use std::time::Duration;

/// Overlay picture decoded once per job, RGBA8 at canvas size
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayImage {
    size: u32,
    pixels: Vec<u8>,
}

impl OverlayImage {
    /// Decode an image file and resize it to a `size` x `size` canvas
    ///
    /// An unreadable or undecodable file is a configuration error.
    pub fn load(path: &Path, size: u32) -> Result<Self> {
        if size == 0 {
            return Err(TranscodeError::Config("Overlay canvas size must be positive".to_string()));
        }

        let decoded = image::open(path).map_err(|e| {
            TranscodeError::Config(format!("Cannot read overlay image {}: {}", path.display(), e))
        })?;
        let resized = decoded.resize_exact(size, size, FilterType::Triangle).to_rgba8();

        debug!(
            "Overlay {} decoded ({}x{} -> {}x{})",
            path.display(),
            decoded.width(),
            decoded.height(),
            size,
            size
        );

        Ok(Self { size, pixels: resized.into_raw() })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

pub struct WgpuOverlayCompositor {
    video: VideoLayer,
    video_pipeline: QuadPipeline,
    overlay_pipeline: QuadPipeline,
    // Kept alive for the bind group below
    _overlay_texture: FrameTexture,
    overlay_binding: QuadBinding,
    target: RenderTarget,
    size: u32,
    gpu: GpuContext,
}

impl WgpuOverlayCompositor {
    pub fn new(overlay: &OverlayImage, rotation_degrees: u32) -> Result<Self> {
        let gpu = GpuContext::new_headless()?;
        let size = overlay.size();

        let video_pipeline = QuadPipeline::new(
            &gpu.device,
            TEXTURE_FORMAT,
            wgpu::BlendState::REPLACE,
            "Overlay Video Pipeline",
        );
        let overlay_pipeline = QuadPipeline::new(
            &gpu.device,
            TEXTURE_FORMAT,
            wgpu::BlendState::ALPHA_BLENDING,
            "Overlay Image Pipeline",
        );

        let mut overlay_texture = FrameTexture::new(&gpu.device, size, size);
        overlay_texture.upload(&gpu.device, &gpu.queue, size, size, overlay.pixels())?;
        let overlay_binding = overlay_pipeline.create_binding(&gpu.device, overlay_texture.view());

        let video = VideoLayer::new(&gpu, &video_pipeline, rotation_degrees);
        let target = RenderTarget::new(&gpu.device, size, size);

        debug!("Overlay compositor {}x{} on {}", size, size, gpu.adapter_name());

        Ok(Self {
            video,
            video_pipeline,
            overlay_pipeline,
            _overlay_texture: overlay_texture,
            overlay_binding,
            target,
            size,
            gpu,
        })
    }

    fn video_viewport(&self) -> Viewport {
        let (width, height) = self.video.displayed_dimensions();
        letterbox_viewport(width, height, self.size)
    }
}

impl OverlayCompositor for WgpuOverlayCompositor {
    fn decoder_surface(&self) -> FrameSurface {
        self.video.surface()
    }

    fn await_new_frame(&mut self, timeout: Duration) -> Result<()> {
        self.video.await_and_upload(&self.gpu, &self.video_pipeline, timeout)
    }

    fn draw_frame(&mut self) -> Result<Vec<u8>> {
        let video_binding = self.video.binding()?;
        let viewport = self.video_viewport();
        let canvas = self.size as f32;

        let mut encoder = self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Overlay Encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Overlay Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: self.target.view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_viewport(viewport.x, viewport.y, viewport.width, viewport.height, 0.0, 1.0);
            self.video_pipeline.draw(&mut render_pass, video_binding);

            render_pass.set_viewport(0.0, 0.0, canvas, canvas, 0.0, 1.0);
            self.overlay_pipeline.draw(&mut render_pass, &self.overlay_binding);
        }

        self.target.encode_readback(&mut encoder);
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        self.target.read_pixels(&self.gpu.device)
    }

    fn output_size(&self) -> u32 {
        self.size
    }
}

impl Drop for WgpuOverlayCompositor {
    fn drop(&mut self) {
        debug!("Overlay compositor released");
    }
}
