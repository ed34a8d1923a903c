//! FFmpeg-based demuxer implementation
//!
//! Opens the source container with libavformat, selects the first video
//! stream and yields its packets with timestamps rebased to microseconds.

use crate::decoder::{init_ffmpeg, EncodedSample, FfmpegVideoDecoder, StreamInfoExtractor, TrackInfo, VideoDecoder, Demuxer};
use crate::renderer::FrameSurface;
use crate::utils::error::{IntoTranscodeError, Result, TranscodeError};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::Rescale;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Demuxer over a local media file
pub struct FfmpegDemuxer {
    /// Input format context
    input: ffmpeg::format::context::Input,

    /// Index of the selected video stream
    stream_index: usize,

    /// Time base of the selected stream
    time_base: ffmpeg::Rational,

    track: TrackInfo,

    path: PathBuf,
}

// SAFETY: the format context is owned exclusively by this value and is only
// reached through `&mut self`, so moving it to the job's feed thread is sound.
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    /// Open `path` and select its first video track
    pub fn open(path: &Path) -> Result<Self> {
        init_ffmpeg()?;

        if !path.exists() {
            return Err(TranscodeError::NotFound(path.display().to_string()));
        }

        let input = ffmpeg::format::input(&path)
            .decoder_err(&format!("Opening {}", path.display()))?;

        let (stream_index, time_base) = input
            .streams()
            .find(|stream| stream.parameters().medium() == ffmpeg::media::Type::Video)
            .map(|stream| (stream.index(), stream.time_base()))
            .ok_or_else(|| {
                TranscodeError::Config(format!("No video track found in {}", path.display()))
            })?;

        let track = StreamInfoExtractor::extract_track(&input, stream_index)?;
        info!(
            "Opened {}: {}x{}, {} us, rotation {}, fps {:?}",
            path.display(),
            track.width,
            track.height,
            track.duration_us,
            track.rotation_degrees,
            track.frame_rate
        );

        Ok(Self {
            input,
            stream_index,
            time_base,
            track,
            path: path.to_path_buf(),
        })
    }

    fn to_micros(&self, ts: Option<i64>) -> Option<i64> {
        ts.map(|ts| ts.rescale(self.time_base, ffmpeg::rescale::TIME_BASE))
    }
}

impl Demuxer for FfmpegDemuxer {
    fn track_info(&self) -> &TrackInfo {
        &self.track
    }

    fn seek_to_keyframe(&mut self, timestamp_us: i64) -> Result<()> {
        // Stream index -1: the target is in AV_TIME_BASE and the upper bound keeps
        // the landing keyframe at or before the requested time
        self.input
            .seek(timestamp_us, ..=timestamp_us)
            .decoder_err(&format!("Seeking {} to {} us", self.path.display(), timestamp_us))?;
        debug!("Seeked to keyframe at or before {} us", timestamp_us);
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<EncodedSample>> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(e).decoder_err("Reading packet"),
            }

            if packet.stream() != self.stream_index {
                continue;
            }

            let Some(data) = packet.data() else {
                continue;
            };

            let dts_us = self.to_micros(packet.dts());
            let pts_us = self.to_micros(packet.pts()).or(dts_us).unwrap_or(0);

            return Ok(Some(EncodedSample {
                data: data.to_vec(),
                pts_us,
                dts_us: dts_us.unwrap_or(pts_us),
                is_key: packet.is_key(),
            }));
        }
    }

    fn open_decoder(&mut self, surface: FrameSurface) -> Result<Box<dyn VideoDecoder>> {
        let stream = self
            .input
            .stream(self.stream_index)
            .ok_or_else(|| crate::internal_error!("stream {} vanished", self.stream_index))?;

        let mut context = ffmpeg::codec::Context::from_parameters(stream.parameters())
            .decoder_err("Creating decoder context")?;

        // Samples reach the decoder in microseconds
        unsafe {
            (*context.as_mut_ptr()).pkt_timebase = ffmpeg::ffi::AVRational { num: 1, den: 1_000_000 };
        }
        context.set_threading(ffmpeg::codec::threading::Config {
            kind: ffmpeg::codec::threading::Type::Frame,
            count: 0,
        });

        let decoder = context.decoder().video().decoder_err("Opening video decoder")?;
        debug!("Video decoder opened: {:?}", decoder.id());

        Ok(Box::new(FfmpegVideoDecoder::new(decoder, surface)))
    }
}

impl Drop for FfmpegDemuxer {
    fn drop(&mut self) {
        debug!("Closing demuxer for {}", self.path.display());
    }
}
