//! GPU textures for compositing
//!
//! [`FrameTexture`] holds the latest decoded picture (or a static overlay
//! image) as RGBA8. [`RenderTarget`] is the offscreen colour attachment the
//! compositors draw into, plus a mappable buffer for reading it back.

use crate::renderer::surface::SurfaceImage;
use crate::utils::error::{Result, TranscodeError};

/// Colour format shared by all compositing textures
pub const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Bytes per row of a `width`-pixel RGBA8 copy, padded for buffer copies
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Sampled RGBA texture, recreated when the picture size changes
pub struct FrameTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    dimensions: (u32, u32),
}

impl FrameTexture {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let (texture, view) = Self::create(device, width.max(1), height.max(1));
        Self {
            texture,
            view,
            dimensions: (width.max(1), height.max(1)),
        }
    }

    fn create(device: &wgpu::Device, width: u32, height: u32) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Frame Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    /// Upload tightly packed RGBA pixels
    ///
    /// Returns `true` when the texture had to be recreated, in which case any
    /// bind group referencing the old view is stale.
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<bool> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(TranscodeError::Renderer(format!(
                "Bad texture upload: {}x{} with {} bytes",
                width,
                height,
                pixels.len()
            )));
        }

        let recreated = self.dimensions != (width, height);
        if recreated {
            let (texture, view) = Self::create(device, width, height);
            self.texture = texture;
            self.view = view;
            self.dimensions = (width, height);
        }

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        Ok(recreated)
    }

    pub fn upload_image(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &SurfaceImage,
    ) -> Result<bool> {
        self.upload(device, queue, image.width, image.height, &image.pixels)
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }
}

/// Offscreen colour attachment with CPU readback
pub struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback: wgpu::Buffer,
    width: u32,
    height: u32,
    bytes_per_row: u32,
}

impl RenderTarget {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Render Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bytes_per_row = padded_bytes_per_row(width);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Render Target Readback"),
            size: bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            texture,
            view,
            readback,
            width,
            height,
            bytes_per_row,
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Queue a copy of the target into the readback buffer
    pub fn encode_readback(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Map the readback buffer and return tightly packed RGBA rows, top row first
    ///
    /// Must be called after the commands from [`encode_readback`](Self::encode_readback)
    /// were submitted.
    pub fn read_pixels(&self, device: &wgpu::Device) -> Result<Vec<u8>> {
        let slice = self.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| TranscodeError::Renderer(format!("GPU poll failed: {}", e)))?;
        rx.recv()
            .map_err(|_| TranscodeError::Renderer("Readback channel closed".to_string()))?
            .map_err(|e| TranscodeError::Renderer(format!("Readback map failed: {}", e)))?;

        let pixels = {
            let mapped = slice.get_mapped_range();
            strip_row_padding(&mapped, self.width, self.height, self.bytes_per_row)
        };
        self.readback.unmap();
        Ok(pixels)
    }
}

fn strip_row_padding(padded: &[u8], width: u32, height: u32, bytes_per_row: u32) -> Vec<u8> {
    let row_bytes = width as usize * 4;
    let stride = bytes_per_row as usize;
    let mut out = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        out.extend_from_slice(&padded[start..start + row_bytes]);
    }
    out
}
