//! Production backend: FFmpeg codecs and containers, wgpu compositing

use crate::decoder::{init_ffmpeg, Demuxer, FfmpegDemuxer};
use crate::encoder::{
    AnimatedImageEncoder, EncoderSurface, FfmpegMuxer, FfmpegVideoEncoder, FfmpegWebpEncoder, Muxer,
    VideoEncoder, VideoEncoderSettings,
};
use crate::pipeline::{MediaBackend, OutputGeometry};
use crate::renderer::{Compositor, CropScaleCompositor, OverlayCompositor, OverlayImage, WgpuOverlayCompositor};
use crate::utils::error::Result;
use std::path::Path;

#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Result<Self> {
        init_ffmpeg()?;
        Ok(Self)
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_demuxer(&self, path: &Path) -> Result<Box<dyn Demuxer>> {
        Ok(Box::new(FfmpegDemuxer::open(path)?))
    }

    fn create_video_encoder(&self, settings: &VideoEncoderSettings) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(FfmpegVideoEncoder::new(settings.clone())?))
    }

    fn create_muxer(&self, path: &Path) -> Result<Box<dyn Muxer>> {
        Ok(Box::new(FfmpegMuxer::create(path)?))
    }

    fn create_compositor(
        &self,
        geometry: OutputGeometry,
        rotation_degrees: u32,
        surface: EncoderSurface,
    ) -> Result<Box<dyn Compositor>> {
        Ok(Box::new(CropScaleCompositor::new(
            geometry.width,
            geometry.height,
            rotation_degrees,
            surface,
        )?))
    }

    fn create_overlay_compositor(
        &self,
        overlay: &OverlayImage,
        rotation_degrees: u32,
    ) -> Result<Box<dyn OverlayCompositor>> {
        Ok(Box::new(WgpuOverlayCompositor::new(overlay, rotation_degrees)?))
    }

    fn create_image_encoder(&self) -> Result<Box<dyn AnimatedImageEncoder>> {
        Ok(Box::new(FfmpegWebpEncoder::new()))
    }
}
