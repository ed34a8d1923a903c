//! Feed+render loop shared by both job kinds
//!
//! Pulls samples from the demuxer into the decoder, and decoded buffers out
//! of it, until the decoder reports end of stream. Each in-range buffer the
//! throttle keeps is released to the decoder's surface and handed to the
//! caller's render step; every other buffer is released unrendered.

use crate::decoder::{DecoderOutput, Demuxer, OutputBuffer, VideoDecoder};
use crate::pipeline::{JobControl, Throttle, TrimWindow};
use crate::utils::error::Result;
use crate::utils::format_timestamp_us;
use log::{debug, warn};
use std::time::Duration;

/// What the render step did with a kept frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenderOutcome {
    Rendered,
    Skipped,
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FeedStats {
    pub samples_fed: u64,
    pub frames_decoded: u64,
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub frames_dropped: u64,
}

pub(crate) struct FeedLoop<'a> {
    trim: &'a TrimWindow,
    throttle: Throttle,
    dequeue_timeout: Duration,
    control: &'a JobControl,
    input_done: bool,
    stats: FeedStats,
}

impl<'a> FeedLoop<'a> {
    pub fn new(
        trim: &'a TrimWindow,
        target_fps: f64,
        dequeue_timeout: Duration,
        control: &'a JobControl,
    ) -> Self {
        Self {
            trim,
            throttle: Throttle::new(target_fps),
            dequeue_timeout,
            control,
            input_done: false,
            stats: FeedStats::default(),
        }
    }

    /// Run until the decoder drains; `render` gets the source timestamp of
    /// each kept frame after its picture was released to the surface
    pub fn run<F>(
        mut self,
        demuxer: &mut dyn Demuxer,
        decoder: &mut dyn VideoDecoder,
        mut render: F,
    ) -> Result<FeedStats>
    where
        F: FnMut(i64) -> Result<RenderOutcome>,
    {
        loop {
            self.control.check()?;

            if !self.input_done {
                self.feed_one(demuxer, decoder)?;
            }

            match decoder.dequeue_output(self.dequeue_timeout)? {
                DecoderOutput::TryAgain => {}
                DecoderOutput::EndOfStream => break,
                DecoderOutput::Buffer(buffer) => {
                    self.stats.frames_decoded += 1;
                    self.handle_buffer(decoder, buffer, &mut render)?;
                }
            }
        }

        debug!("Feed loop finished: {:?}", self.stats);
        Ok(self.stats)
    }

    fn feed_one(&mut self, demuxer: &mut dyn Demuxer, decoder: &mut dyn VideoDecoder) -> Result<()> {
        match demuxer.read_sample()? {
            Some(sample) if self.trim.is_past_end(sample.pts_us) => {
                debug!(
                    "Sample at {} is past the trim end, ending input",
                    format_timestamp_us(sample.pts_us)
                );
                decoder.signal_end_of_input()?;
                self.input_done = true;
            }
            Some(sample) => {
                decoder.queue_sample(sample)?;
                self.stats.samples_fed += 1;
            }
            None => {
                decoder.signal_end_of_input()?;
                self.input_done = true;
            }
        }
        Ok(())
    }

    fn handle_buffer<F>(
        &mut self,
        decoder: &mut dyn VideoDecoder,
        buffer: OutputBuffer,
        render: &mut F,
    ) -> Result<()>
    where
        F: FnMut(i64) -> Result<RenderOutcome>,
    {
        let pts_us = buffer.pts_us;
        let in_range = !self.trim.is_before_start(pts_us) && !self.trim.is_past_end(pts_us);

        if !in_range || !self.throttle.should_keep(pts_us) {
            decoder.release_output(buffer, false)?;
            self.stats.frames_dropped += 1;
            return Ok(());
        }

        decoder.release_output(buffer, true)?;
        match render(pts_us)? {
            RenderOutcome::Rendered => self.stats.frames_rendered += 1,
            RenderOutcome::Skipped => self.stats.frames_skipped += 1,
        }
        Ok(())
    }
}

/// Turn a transient per-frame fault into a skip, propagating anything else
pub(crate) fn skip_transient(result: Result<()>, pts_us: i64) -> Result<RenderOutcome> {
    match result {
        Ok(()) => Ok(RenderOutcome::Rendered),
        Err(e) if e.is_transient() => {
            warn!("Skipping frame at {}: {}", format_timestamp_us(pts_us), e);
            Ok(RenderOutcome::Skipped)
        }
        Err(e) => Err(e),
    }
}
