//! Handles a job acquires, released in dependency order

use crate::decoder::{Demuxer, VideoDecoder};
use crate::encoder::{AnimatedImageEncoder, Muxer, VideoEncoder};
use crate::renderer::{Compositor, OverlayCompositor};
use log::debug;

/// Every handle a job may hold
///
/// [`release_all`](Self::release_all) drops them in the fixed order demuxer,
/// decoder, encoder, muxer, GPU; it also runs on drop, so an early return
/// or a panic still releases whatever was acquired.
#[derive(Default)]
pub(crate) struct JobResources {
    pub demuxer: Option<Box<dyn Demuxer>>,
    pub decoder: Option<Box<dyn VideoDecoder>>,
    pub encoder: Option<Box<dyn VideoEncoder>>,
    pub image_encoder: Option<Box<dyn AnimatedImageEncoder>>,
    pub muxer: Option<Box<dyn Muxer>>,
    pub compositor: Option<Box<dyn Compositor>>,
    pub overlay_compositor: Option<Box<dyn OverlayCompositor>>,
}

impl JobResources {
    pub fn release_all(&mut self) {
        if self.demuxer.take().is_some() {
            debug!("Released demuxer");
        }
        if self.decoder.take().is_some() {
            debug!("Released decoder");
        }
        if self.encoder.take().is_some() {
            debug!("Released video encoder");
        }
        if self.image_encoder.take().is_some() {
            debug!("Released image encoder");
        }
        if self.muxer.take().is_some() {
            debug!("Released muxer");
        }
        if self.compositor.take().is_some() {
            debug!("Released GPU compositor");
        }
        if self.overlay_compositor.take().is_some() {
            debug!("Released GPU overlay compositor");
        }
    }
}

impl Drop for JobResources {
    fn drop(&mut self) {
        self.release_all();
    }
}
