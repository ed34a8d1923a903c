//! Sticker Transcoder
//!
//! Decode → GPU composite → encode pipeline with two jobs: trimming,
//! rotating and scaling a clip into an H.264 MP4, and compositing a static
//! overlay onto a clip to produce an animated WebP.
//!
//! [`pipeline::Transcoder`] is the entry point; it runs one job at a time
//! against a [`pipeline::MediaBackend`] and publishes [`pipeline::ProgressEvent`]s.

pub mod decoder;
pub mod encoder;
pub mod pipeline;
pub mod renderer;
pub mod utils;

pub use pipeline::{
    FfmpegBackend, JobId, MediaBackend, OverlayRequest, PipelineState, ProgressEvent, TranscodeRequest,
    Transcoder,
};
pub use utils::{Config, Result, TranscodeError};
