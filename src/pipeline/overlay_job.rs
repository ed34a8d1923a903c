//! Overlay-to-animated-image job
//!
//! Same feed+render loop as the transcode job, but each kept frame is read
//! back from the GPU and handed to the animated-image encoder. There is no
//! container and no drain thread; the output is written after finalize.

use crate::pipeline::feed::{skip_transient, FeedLoop, RenderOutcome};
use crate::pipeline::resources::JobResources;
use crate::pipeline::{
    target_frame_rate, JobControl, JobId, MediaBackend, OverlayRequest, PipelineStateManager,
    ProgressTracker, TrimWindow,
};
use crate::renderer::OverlayImage;
use crate::utils::error::{Result, TranscodeError};
use crate::utils::Config;
use log::info;
use std::sync::Arc;

pub(crate) struct OverlayJob {
    pub id: JobId,
    pub request: OverlayRequest,
    pub backend: Arc<dyn MediaBackend>,
    pub config: Arc<Config>,
    pub state: Arc<PipelineStateManager>,
    pub control: JobControl,
}

impl OverlayJob {
    pub fn run(self) -> Result<()> {
        let mut resources = JobResources::default();
        let result = self.execute(&mut resources);
        resources.release_all();
        result
    }

    fn execute(&self, resources: &mut JobResources) -> Result<()> {
        let settings = &self.config.overlay;
        info!(
            "{}: overlaying {} on {} -> {}",
            self.id,
            self.request.overlay.display(),
            self.request.video.display(),
            self.request.output.display()
        );

        let demuxer = resources
            .demuxer
            .insert(self.backend.open_demuxer(&self.request.video)?);
        let track = demuxer.track_info().clone();

        let trim = TrimWindow::full(track.duration_us)?;
        let source_fps = track.frame_rate_or(self.config.general.fallback_frame_rate as f64);
        let target_fps = target_frame_rate(self.request.max_fps, source_fps)?;
        let overlay = OverlayImage::load(&self.request.overlay, settings.output_size)?;

        let tunables = self.request.config.set_fields();
        let mut progress = ProgressTracker::new(trim.effective_duration_us(), target_fps);
        self.state.update_progress(progress.snapshot());
        info!(
            "{}: {}x{} rot {} -> {}x{} canvas, {:.2} fps (source {:.2}), ~{} frames, encoder options {:?}",
            self.id,
            track.width,
            track.height,
            track.rotation_degrees,
            overlay.size(),
            overlay.size(),
            target_fps,
            source_fps,
            progress.snapshot().frames_estimated,
            tunables
        );

        let compositor = resources.overlay_compositor.insert(
            self.backend
                .create_overlay_compositor(&overlay, track.rotation_degrees)?,
        );
        drop(overlay);

        let canvas = compositor.output_size();
        let image_encoder = resources
            .image_encoder
            .insert(self.backend.create_image_encoder()?);
        image_encoder.init(canvas, canvas, &self.request.config)?;
        let decoder = resources
            .decoder
            .insert(demuxer.open_decoder(compositor.decoder_surface())?);

        let frame_wait = settings.frame_wait_timeout();
        let feed = FeedLoop::new(&trim, target_fps, settings.dequeue_timeout(), &self.control);
        let stats = feed.run(&mut **demuxer, &mut **decoder, |pts_us| {
            let awaited = skip_transient(compositor.await_new_frame(frame_wait), pts_us)?;
            if awaited == RenderOutcome::Skipped {
                return Ok(RenderOutcome::Skipped);
            }

            let pixels = compositor.draw_frame()?;
            image_encoder.add_frame(&pixels, pts_us / 1000)?;
            self.state.update_progress(progress.advance(trim.rebase(pts_us)));
            Ok(RenderOutcome::Rendered)
        })?;

        let bytes = image_encoder.finalize()?;
        if bytes.is_empty() {
            return Err(TranscodeError::Encoder("Encoding produced no data".to_string()));
        }
        std::fs::write(&self.request.output, &bytes)?;

        info!(
            "{}: {} frames composed, {} skipped, {} dropped, {} bytes written",
            self.id,
            stats.frames_rendered,
            stats.frames_skipped,
            stats.frames_dropped,
            bytes.len()
        );
        Ok(())
    }
}
