//! FFmpeg-based video decoder implementation
//!
//! Wraps a libavcodec video decoder behind the buffer-ownership contract of
//! [`VideoDecoder`]: decoded pictures stay inside the decoder until released,
//! and only released-with-render pictures are converted to RGBA and published
//! on the frame surface.

use crate::decoder::{DecoderOutput, EncodedSample, OutputBuffer, VideoDecoder};
use crate::renderer::{FrameSurface, SurfaceImage};
use crate::utils::error::{IntoTranscodeError, Result, TranscodeError};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::error::EAGAIN;
use log::{debug, trace};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Decoder state machine around `send_packet` / `receive_frame`
pub struct FfmpegVideoDecoder {
    decoder: ffmpeg::decoder::Video,

    /// Samples the codec refused with EAGAIN, retried before the next receive
    pending: VecDeque<ffmpeg::Packet>,

    /// Dequeued pictures not yet released
    outstanding: HashMap<u64, ffmpeg::frame::Video>,

    next_id: u64,

    /// RGBA converter, rebuilt when the picture geometry changes
    converter: Option<ffmpeg::software::scaling::Context>,

    surface: FrameSurface,

    end_of_input: bool,
    eof_sent: bool,
}

// SAFETY: codec, frame and scaler contexts are owned exclusively and used only
// through `&mut self` on the feed thread.
unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    pub fn new(decoder: ffmpeg::decoder::Video, surface: FrameSurface) -> Self {
        Self {
            decoder,
            pending: VecDeque::new(),
            outstanding: HashMap::new(),
            next_id: 0,
            converter: None,
            surface,
            end_of_input: false,
            eof_sent: false,
        }
    }

    /// Push queued packets into the codec until it pushes back
    fn flush_pending(&mut self) -> Result<()> {
        while let Some(packet) = self.pending.front() {
            match self.decoder.send_packet(packet) {
                Ok(()) => {
                    self.pending.pop_front();
                }
                Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => return Ok(()),
                Err(e) => return Err(e).decoder_err("Sending packet"),
            }
        }

        if self.end_of_input && !self.eof_sent {
            self.decoder.send_eof().decoder_err("Signalling end of input")?;
            self.eof_sent = true;
        }

        Ok(())
    }

    fn to_rgba(&mut self, frame: &ffmpeg::frame::Video, pts_us: i64) -> Result<SurfaceImage> {
        let rebuild = match &self.converter {
            Some(converter) => {
                let input = converter.input();
                input.width != frame.width() || input.height != frame.height() || input.format != frame.format()
            }
            None => true,
        };

        if rebuild {
            self.converter = Some(
                ffmpeg::software::scaling::Context::get(
                    frame.format(),
                    frame.width(),
                    frame.height(),
                    ffmpeg::format::Pixel::RGBA,
                    frame.width(),
                    frame.height(),
                    ffmpeg::software::scaling::Flags::BILINEAR,
                )
                .decoder_err("Creating RGBA converter")?,
            );
        }

        let converter = self
            .converter
            .as_mut()
            .ok_or_else(|| crate::internal_error!("converter missing"))?;

        let mut rgba = ffmpeg::frame::Video::empty();
        converter.run(frame, &mut rgba).decoder_err("Converting to RGBA")?;

        // Strip row padding so the surface holds tightly packed rows
        let width = rgba.width();
        let height = rgba.height();
        let row_bytes = width as usize * 4;
        let stride = rgba.stride(0);
        let data = rgba.data(0);
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(&data[start..start + row_bytes]);
        }

        SurfaceImage::new(width, height, pixels, pts_us)
    }
}

impl VideoDecoder for FfmpegVideoDecoder {
    fn queue_sample(&mut self, sample: EncodedSample) -> Result<()> {
        if self.end_of_input {
            return Err(TranscodeError::invariant("Sample queued after end of input"));
        }

        let mut packet = ffmpeg::Packet::copy(&sample.data);
        packet.set_pts(Some(sample.pts_us));
        packet.set_dts(Some(sample.dts_us));
        if sample.is_key {
            packet.set_flags(ffmpeg::codec::packet::Flags::KEY);
        }

        self.pending.push_back(packet);
        self.flush_pending()
    }

    fn signal_end_of_input(&mut self) -> Result<()> {
        self.end_of_input = true;
        self.flush_pending()
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<DecoderOutput> {
        // libavcodec decodes synchronously, so there is never anything to wait for
        let mut frame = ffmpeg::frame::Video::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {
                let pts_us = frame.timestamp().or_else(|| frame.pts()).unwrap_or(0);
                let id = self.next_id;
                self.next_id += 1;
                self.outstanding.insert(id, frame);
                trace!("Decoded frame {} at {} us", id, pts_us);
                Ok(DecoderOutput::Buffer(OutputBuffer { id, pts_us }))
            }
            Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => {
                self.flush_pending()?;
                Ok(DecoderOutput::TryAgain)
            }
            Err(ffmpeg::Error::Eof) => Ok(DecoderOutput::EndOfStream),
            Err(e) => Err(e).decoder_err("Receiving frame"),
        }
    }

    fn release_output(&mut self, buffer: OutputBuffer, render: bool) -> Result<()> {
        let frame = self
            .outstanding
            .remove(&buffer.id)
            .ok_or_else(|| TranscodeError::invariant(format!("Unknown output buffer {}", buffer.id)))?;

        if render {
            let image = self.to_rgba(&frame, buffer.pts_us)?;
            self.surface.publish(image);
        }

        Ok(())
    }
}

impl Drop for FfmpegVideoDecoder {
    fn drop(&mut self) {
        debug!(
            "Releasing video decoder ({} pending packets, {} outstanding frames)",
            self.pending.len(),
            self.outstanding.len()
        );
    }
}
