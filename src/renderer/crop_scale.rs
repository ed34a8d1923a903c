//! Crop/scale compositor for the transcode path
//!
//! Draws each decoded picture, rotated upright, over the whole output
//! geometry and hands the result to the video encoder's input surface.

use crate::encoder::{EncoderSurface, RenderedFrame};
use crate::renderer::gpu_context::GpuContext;
use crate::renderer::pipeline::QuadPipeline;
use crate::renderer::surface::FrameSurface;
use crate::renderer::texture::{RenderTarget, TEXTURE_FORMAT};
use crate::renderer::video_layer::VideoLayer;
use crate::renderer::Compositor;
use crate::utils::error::Result;
use log::debug;
use std::time::Duration;

pub struct CropScaleCompositor {
    video: VideoLayer,
    pipeline: QuadPipeline,
    target: RenderTarget,
    encoder_surface: EncoderSurface,
    frames_drawn: u64,
    // Dropped last: every GPU object above belongs to this device
    gpu: GpuContext,
}

impl CropScaleCompositor {
    /// Create a compositor rendering `width` x `height` frames into `encoder_surface`
    pub fn new(
        width: u32,
        height: u32,
        rotation_degrees: u32,
        encoder_surface: EncoderSurface,
    ) -> Result<Self> {
        let gpu = GpuContext::new_headless()?;
        let pipeline = QuadPipeline::new(
            &gpu.device,
            TEXTURE_FORMAT,
            wgpu::BlendState::REPLACE,
            "Crop Scale Pipeline",
        );
        let video = VideoLayer::new(&gpu, &pipeline, rotation_degrees);
        let target = RenderTarget::new(&gpu.device, width, height);

        debug!(
            "Crop/scale compositor {}x{} (rotation {}) on {}",
            width,
            height,
            rotation_degrees,
            gpu.adapter_name()
        );

        Ok(Self {
            video,
            pipeline,
            target,
            encoder_surface,
            frames_drawn: 0,
            gpu,
        })
    }
}

impl Compositor for CropScaleCompositor {
    fn decoder_surface(&self) -> FrameSurface {
        self.video.surface()
    }

    fn await_new_frame(&mut self, timeout: Duration) -> Result<()> {
        self.video.await_and_upload(&self.gpu, &self.pipeline, timeout)
    }

    fn draw_frame(&mut self, pts_us: i64) -> Result<()> {
        let binding = self.video.binding()?;

        let mut encoder = self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Crop Scale Encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Crop Scale Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: self.target.view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.pipeline.draw(&mut render_pass, binding);
        }

        self.target.encode_readback(&mut encoder);
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        let pixels = self.target.read_pixels(&self.gpu.device)?;

        self.encoder_surface.submit(RenderedFrame {
            width: self.target.width(),
            height: self.target.height(),
            pixels,
            pts_us,
        })?;
        self.frames_drawn += 1;
        Ok(())
    }
}

impl Drop for CropScaleCompositor {
    fn drop(&mut self) {
        debug!("Crop/scale compositor released after {} frames", self.frames_drawn);
    }
}
