//! FFmpeg-based H.264 encoder
//!
//! Pulls rendered RGBA frames from the input surface, converts them to
//! YUV 4:2:0 and drives libavcodec's `send_frame` / `receive_packet` loop.
//! Timestamps stay in microseconds end to end.

use crate::decoder::init_ffmpeg;
use crate::encoder::{
    EncodedPacket, EncoderOutput, EncoderSurface, OutputFormat, RenderedFrame, SurfaceInput, VideoEncoder,
    VideoEncoderSettings,
};
use crate::utils::error::{IntoTranscodeError, Result, TranscodeError};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::error::EAGAIN;
use log::{debug, info};
use std::time::Duration;

pub struct FfmpegVideoEncoder {
    encoder: ffmpeg::encoder::video::Encoder,
    settings: VideoEncoderSettings,
    surface: EncoderSurface,
    input: Receiver<SurfaceInput>,

    /// RGBA to YUV420P converter
    converter: ffmpeg::software::scaling::Context,

    format_announced: bool,
    eof_sent: bool,
    frames_in: u64,
    packets_out: u64,
}

// SAFETY: the codec and scaler contexts are owned exclusively and only used
// through `&mut self` on the drain thread.
unsafe impl Send for FfmpegVideoEncoder {}

impl FfmpegVideoEncoder {
    pub fn new(settings: VideoEncoderSettings) -> Result<Self> {
        init_ffmpeg()?;

        let codec = ffmpeg::encoder::find_by_name(&settings.codec)
            .or_else(|| ffmpeg::encoder::find(ffmpeg::codec::Id::H264))
            .ok_or_else(|| TranscodeError::UnsupportedFormat("No H.264 encoder available".to_string()))?;

        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec);
        // MP4 keeps SPS/PPS in the sample description, not in-band
        context.set_flags(ffmpeg::codec::flag::Flags::GLOBAL_HEADER);

        let mut video = context.encoder().video().encoder_err("Creating encoder context")?;
        video.set_width(settings.width);
        video.set_height(settings.height);
        video.set_format(ffmpeg::format::Pixel::YUV420P);
        video.set_time_base(ffmpeg::rescale::TIME_BASE);
        video.set_frame_rate(Some(ffmpeg::Rational::new(settings.frame_rate as i32, 1)));
        video.set_bit_rate(settings.bitrate);
        video.set_gop(settings.gop_size());
        video.set_max_b_frames(0);

        let codec_name = codec.name().to_string();
        let mut options = ffmpeg::Dictionary::new();
        if codec_name == "libx264" {
            options.set("preset", "veryfast");
        }

        let encoder = video.open_as_with(codec, options).encoder_err("Opening encoder")?;

        let converter = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGBA,
            settings.width,
            settings.height,
            ffmpeg::format::Pixel::YUV420P,
            settings.width,
            settings.height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .encoder_err("Creating YUV converter")?;

        let (surface, input) = EncoderSurface::channel(settings.submit_timeout);

        info!(
            "Encoder {} opened: {}x{} @ {} fps, {} bps, gop {}",
            codec_name,
            settings.width,
            settings.height,
            settings.frame_rate,
            settings.bitrate,
            settings.gop_size()
        );

        Ok(Self {
            encoder,
            settings,
            surface,
            input,
            converter,
            format_announced: false,
            eof_sent: false,
            frames_in: 0,
            packets_out: 0,
        })
    }

    fn receive_packet(&mut self) -> Result<Option<EncoderOutput>> {
        let mut packet = ffmpeg::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => {
                self.packets_out += 1;
                let pts_us = packet.pts().unwrap_or(0);
                Ok(Some(EncoderOutput::Packet(EncodedPacket {
                    data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                    pts_us,
                    dts_us: packet.dts().unwrap_or(pts_us),
                    is_key: packet.is_key(),
                })))
            }
            Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(Some(EncoderOutput::EndOfStream)),
            Err(e) => Err(e).encoder_err("Receiving packet"),
        }
    }

    fn send_frame(&mut self, frame: RenderedFrame) -> Result<()> {
        if frame.width != self.settings.width || frame.height != self.settings.height {
            return Err(TranscodeError::Encoder(format!(
                "Frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, self.settings.width, self.settings.height
            )));
        }

        let mut rgba = ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGBA, frame.width, frame.height);
        let stride = rgba.stride(0);
        let row_bytes = frame.width as usize * 4;
        let plane = rgba.data_mut(0);
        for (row, src) in frame.pixels.chunks_exact(row_bytes).enumerate() {
            plane[row * stride..row * stride + row_bytes].copy_from_slice(src);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.converter.run(&rgba, &mut yuv).encoder_err("Converting to YUV")?;
        yuv.set_pts(Some(frame.pts_us));

        self.encoder.send_frame(&yuv).encoder_err("Sending frame")?;
        self.frames_in += 1;
        Ok(())
    }
}

impl VideoEncoder for FfmpegVideoEncoder {
    fn input_surface(&self) -> EncoderSurface {
        self.surface.clone()
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<EncoderOutput> {
        if !self.format_announced {
            self.format_announced = true;
            return Ok(EncoderOutput::FormatChanged(OutputFormat {
                width: self.settings.width,
                height: self.settings.height,
                frame_rate: self.settings.frame_rate,
                codec_parameters: Some(ffmpeg::codec::Parameters::from(&self.encoder)),
            }));
        }

        if let Some(output) = self.receive_packet()? {
            return Ok(output);
        }

        if self.eof_sent {
            return Ok(EncoderOutput::TryAgain);
        }

        match self.input.recv_timeout(timeout) {
            Ok(SurfaceInput::Frame(frame)) => self.send_frame(frame)?,
            Ok(SurfaceInput::EndOfStream) | Err(RecvTimeoutError::Disconnected) => {
                debug!("Encoder input finished after {} frames", self.frames_in);
                self.encoder.send_eof().encoder_err("Flushing encoder")?;
                self.eof_sent = true;
            }
            Err(RecvTimeoutError::Timeout) => return Ok(EncoderOutput::TryAgain),
        }

        Ok(self.receive_packet()?.unwrap_or(EncoderOutput::TryAgain))
    }
}

impl Drop for FfmpegVideoEncoder {
    fn drop(&mut self) {
        debug!(
            "Releasing video encoder ({} frames in, {} packets out)",
            self.frames_in, self.packets_out
        );
    }
}
