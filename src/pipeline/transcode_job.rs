//! Trim/crop/scale job
//!
//! The job thread runs the feed+render loop; a second named thread owns the
//! encoder and muxer for the drain loop and hands them back when it ends so
//! teardown still releases them in order.

use crate::encoder::{EncoderOutput, Muxer, VideoEncoder, VideoEncoderSettings};
use crate::pipeline::feed::{skip_transient, FeedLoop, RenderOutcome};
use crate::pipeline::resources::JobResources;
use crate::pipeline::{
    target_frame_rate, JobControl, JobId, MediaBackend, OutputGeometry, PipelineStateManager,
    ProgressTracker, TranscodeRequest, TrimWindow,
};
use crate::utils::error::{Result, TranscodeError};
use crate::utils::{format_timestamp_us, Config};
use log::{debug, info};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub(crate) struct TranscodeJob {
    pub id: JobId,
    pub request: TranscodeRequest,
    pub backend: Arc<dyn MediaBackend>,
    pub config: Arc<Config>,
    pub state: Arc<PipelineStateManager>,
    pub control: JobControl,
}

impl TranscodeJob {
    /// Run to completion, releasing every handle before returning
    pub fn run(self) -> Result<()> {
        let mut resources = JobResources::default();
        let result = self.execute(&mut resources);
        resources.release_all();
        result
    }

    fn execute(&self, resources: &mut JobResources) -> Result<()> {
        let settings = &self.config.transcode;
        info!(
            "{}: transcoding {} -> {}",
            self.id,
            self.request.input.display(),
            self.request.output.display()
        );

        let demuxer = resources
            .demuxer
            .insert(self.backend.open_demuxer(&self.request.input)?);
        let track = demuxer.track_info().clone();

        // Everything that can be rejected is checked before any codec exists
        let trim = TrimWindow::resolve(self.request.start_us, self.request.end_us, track.duration_us)?;
        let source_fps = track.frame_rate_or(self.config.general.fallback_frame_rate as f64);
        let max_fps = self
            .request
            .max_fps
            .unwrap_or(settings.default_max_fps as f64);
        let target_fps = target_frame_rate(max_fps, source_fps)?;
        let geometry = OutputGeometry::compute(&track, settings.target_longest_side)?;

        let mut progress = ProgressTracker::new(trim.effective_duration_us(), target_fps);
        self.state.update_progress(progress.snapshot());
        info!(
            "{}: {}x{} rot {} -> {}x{}, {} to {}, {:.2} fps (source {:.2}), ~{} frames",
            self.id,
            track.width,
            track.height,
            track.rotation_degrees,
            geometry.width,
            geometry.height,
            format_timestamp_us(trim.start_us),
            format_timestamp_us(trim.end_us),
            target_fps,
            source_fps,
            progress.snapshot().frames_estimated
        );

        let encoder_settings = VideoEncoderSettings {
            width: geometry.width,
            height: geometry.height,
            frame_rate: target_fps.round().max(1.0) as u32,
            bitrate: settings.bitrate,
            keyframe_interval_secs: settings.keyframe_interval_secs,
            codec: settings.codec.clone(),
            submit_timeout: settings.frame_wait_timeout(),
        };
        let encoder = self.backend.create_video_encoder(&encoder_settings)?;
        let encoder_surface = encoder.input_surface();
        resources.encoder = Some(encoder);
        resources.muxer = Some(self.backend.create_muxer(&self.request.output)?);

        let compositor = resources.compositor.insert(self.backend.create_compositor(
            geometry,
            track.rotation_degrees,
            encoder_surface.clone(),
        )?);
        let decoder = resources
            .decoder
            .insert(demuxer.open_decoder(compositor.decoder_surface())?);

        if trim.needs_seek() {
            demuxer.seek_to_keyframe(trim.start_us)?;
        }

        let encoder = take(&mut resources.encoder, "video encoder")?;
        let muxer = take(&mut resources.muxer, "muxer")?;
        let drain_control = self.control.clone();
        let drain_surface = encoder_surface.clone();
        let dequeue_timeout = settings.dequeue_timeout();
        let drain = thread::Builder::new()
            .name(format!("drain-{}", self.id))
            .spawn(move || {
                let mut encoder = encoder;
                let mut muxer = muxer;
                let result = drain_encoder(&mut *encoder, &mut *muxer, &drain_control, dequeue_timeout);
                if result.is_err() {
                    drain_control.abort();
                }
                // Nothing reads the surface any more; unblock the compositor
                drain_surface.halt();
                (encoder, muxer, result)
            })
            .map_err(|e| TranscodeError::Internal(format!("Failed to spawn drain thread: {}", e)))?;

        let frame_wait = settings.frame_wait_timeout();
        let feed = FeedLoop::new(&trim, target_fps, dequeue_timeout, &self.control);
        let feed_result = feed
            .run(&mut **demuxer, &mut **decoder, |pts_us| {
                let awaited = skip_transient(compositor.await_new_frame(frame_wait), pts_us)?;
                if awaited == RenderOutcome::Skipped {
                    return Ok(RenderOutcome::Skipped);
                }

                let adjusted_us = trim.rebase(pts_us);
                compositor.draw_frame(adjusted_us)?;
                self.state.update_progress(progress.advance(adjusted_us));
                Ok(RenderOutcome::Rendered)
            })
            .and_then(|stats| encoder_surface.signal_end_of_stream().map(|_| stats));

        if feed_result.is_err() {
            self.control.abort();
        }
        drop(encoder_surface);

        let (encoder, muxer, drain_result) = drain
            .join()
            .map_err(|_| TranscodeError::Internal("Drain thread panicked".to_string()))?;
        resources.encoder = Some(encoder);
        resources.muxer = Some(muxer);

        match (feed_result, drain_result) {
            (Ok(stats), Ok(packets)) => {
                info!(
                    "{}: {} frames rendered, {} skipped, {} dropped, {} packets written",
                    self.id, stats.frames_rendered, stats.frames_skipped, stats.frames_dropped, packets
                );
                Ok(())
            }
            _ if self.control.is_cancelled() => Err(TranscodeError::Cancelled),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            // The loop that failed first aborted its peer
            (Err(feed), Err(drain)) => {
                if drain.is_cancellation() {
                    Err(feed)
                } else {
                    Err(drain)
                }
            }
        }
    }
}

fn take<T: ?Sized>(slot: &mut Option<Box<T>>, what: &str) -> Result<Box<T>> {
    slot.take()
        .ok_or_else(|| TranscodeError::invariant(format!("{} was not created", what)))
}

/// Drain loop: move encoder output into the container until end of stream
///
/// Returns the number of packets written.
pub(crate) fn drain_encoder(
    encoder: &mut dyn VideoEncoder,
    muxer: &mut dyn Muxer,
    control: &JobControl,
    timeout: Duration,
) -> Result<u64> {
    let mut track = None;
    let mut written = 0u64;

    loop {
        control.check()?;

        match encoder.dequeue_output(timeout)? {
            EncoderOutput::TryAgain => {}
            EncoderOutput::FormatChanged(format) => {
                if muxer.is_started() {
                    return Err(TranscodeError::invariant("Encoder output format changed after muxer start"));
                }
                debug!("Encoder output format ready: {:?}", format);
                track = Some(muxer.add_track(&format)?);
                muxer.start()?;
            }
            EncoderOutput::Packet(packet) => {
                let index = match track {
                    Some(index) if muxer.is_started() => index,
                    _ => {
                        return Err(TranscodeError::invariant(
                            "Encoded packet arrived before the muxer was started",
                        ))
                    }
                };
                muxer.write_sample(index, &packet)?;
                written += 1;
            }
            EncoderOutput::EndOfStream => {
                if !muxer.is_started() {
                    return Err(TranscodeError::Encoder(
                        "Encoder finished without producing any output".to_string(),
                    ));
                }
                muxer.stop()?;
                return Ok(written);
            }
        }
    }
}
