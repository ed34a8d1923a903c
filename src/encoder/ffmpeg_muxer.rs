//! FFmpeg-based MP4 muxer

use crate::decoder::init_ffmpeg;
use crate::encoder::{EncodedPacket, Muxer, OutputFormat};
use crate::utils::error::{IntoTranscodeError, Result, TranscodeError};
use ffmpeg_next as ffmpeg;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Writes one video track into an MP4 container
pub struct FfmpegMuxer {
    output: ffmpeg::format::context::Output,
    path: PathBuf,
    tracks: usize,
    started: bool,
    stopped: bool,
    samples_written: u64,
}

// SAFETY: the output context is owned exclusively and only used through
// `&mut self` on the drain thread.
unsafe impl Send for FfmpegMuxer {}

impl FfmpegMuxer {
    pub fn create(path: &Path) -> Result<Self> {
        init_ffmpeg()?;

        let output = ffmpeg::format::output_as(&path, "mp4")
            .muxer_err(&format!("Creating {}", path.display()))?;

        debug!("Muxer created for {}", path.display());
        Ok(Self {
            output,
            path: path.to_path_buf(),
            tracks: 0,
            started: false,
            stopped: false,
            samples_written: 0,
        })
    }
}

impl Muxer for FfmpegMuxer {
    fn add_track(&mut self, format: &OutputFormat) -> Result<usize> {
        if self.started {
            return Err(TranscodeError::invariant("Track added after the muxer started"));
        }

        let parameters = format
            .codec_parameters
            .clone()
            .ok_or_else(|| TranscodeError::Muxer("Output format carries no codec parameters".to_string()))?;

        let mut stream = self
            .output
            .add_stream(parameters.id())
            .muxer_err("Adding video stream")?;
        stream.set_parameters(parameters);
        stream.set_time_base(ffmpeg::rescale::TIME_BASE);
        // Let the MP4 muxer pick the sample entry tag
        let mut stream_parameters = stream.parameters();
        unsafe {
            (*stream_parameters.as_mut_ptr()).codec_tag = 0;
        }

        let index = stream.index();
        self.tracks += 1;
        debug!("Added track {} ({}x{} @ {} fps)", index, format.width, format.height, format.frame_rate);
        Ok(index)
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(TranscodeError::invariant("Muxer started twice"));
        }
        if self.tracks == 0 {
            return Err(TranscodeError::invariant("Muxer started without tracks"));
        }

        self.output.write_header().muxer_err("Writing container header")?;
        self.started = true;
        info!("Muxer started: {}", self.path.display());
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn write_sample(&mut self, track: usize, packet: &EncodedPacket) -> Result<()> {
        if !self.started {
            return Err(TranscodeError::invariant("Sample written before the muxer started"));
        }

        let time_base = self
            .output
            .stream(track)
            .map(|stream| stream.time_base())
            .ok_or_else(|| TranscodeError::Muxer(format!("Unknown track {}", track)))?;

        let mut av_packet = ffmpeg::Packet::copy(&packet.data);
        av_packet.set_stream(track);
        av_packet.set_pts(Some(packet.pts_us));
        av_packet.set_dts(Some(packet.dts_us));
        if packet.is_key {
            av_packet.set_flags(ffmpeg::codec::packet::Flags::KEY);
        }
        av_packet.set_position(-1);
        av_packet.rescale_ts(ffmpeg::rescale::TIME_BASE, time_base);

        av_packet
            .write_interleaved(&mut self.output)
            .muxer_err("Writing sample")?;
        self.samples_written += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.started || self.stopped {
            return Ok(());
        }

        self.output.write_trailer().muxer_err("Writing container trailer")?;
        self.stopped = true;
        info!("Muxer stopped after {} samples: {}", self.samples_written, self.path.display());
        Ok(())
    }
}

impl Drop for FfmpegMuxer {
    fn drop(&mut self) {
        if self.started && !self.stopped {
            debug!("Muxer for {} released without a trailer", self.path.display());
        }
    }
}
