//! Animated WebP through libavcodec's `libwebp_anim` encoder
//!
//! Frames are encoded into a temporary `.webp` file through the webp muxer;
//! `finalize` flushes the encoder, writes the trailer and returns the file's
//! bytes.

use crate::decoder::init_ffmpeg;
use crate::encoder::{AnimatedImageEncoder, ImageHint, WebPConfig};
use crate::utils::error::{IntoTranscodeError, Result, TranscodeError};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::error::EAGAIN;
use log::debug;
use tempfile::NamedTempFile;

const ENCODER_NAME: &str = "libwebp_anim";

/// Millisecond time base of the animation
const MILLIS: ffmpeg::Rational = ffmpeg::Rational(1, 1000);

/// Fields of [`WebPConfig`] the libavcodec wrapper can express
const SUPPORTED_FIELDS: [&str; 4] = ["lossless", "quality", "method", "imageHint"];

/// Translate a config into `libwebp_anim` codec options
///
/// Returns the options plus the names of set fields that have no equivalent.
pub fn libwebp_options(config: &WebPConfig) -> (Vec<(&'static str, String)>, Vec<&'static str>) {
    let mut options = vec![
        ("quality", format!("{}", config.effective_quality())),
        ("compression_level", config.effective_method().to_string()),
    ];

    if let Some(lossless) = config.lossless {
        options.push(("lossless", if lossless { "1" } else { "0" }.to_string()));
    }

    if let Some(hint) = config.image_hint {
        let preset = match hint {
            ImageHint::Default => "default",
            ImageHint::Picture => "picture",
            ImageHint::Photo => "photo",
            ImageHint::Graph => "drawing",
        };
        options.push(("preset", preset.to_string()));
    }

    let ignored = config
        .set_fields()
        .into_iter()
        .filter(|field| !SUPPORTED_FIELDS.contains(field))
        .collect();

    (options, ignored)
}

struct WebpSession {
    encoder: ffmpeg::encoder::video::Encoder,
    output: ffmpeg::format::context::Output,
    converter: ffmpeg::software::scaling::Context,
    file: NamedTempFile,
    width: u32,
    height: u32,
    last_pts: Option<i64>,
    frames: u64,
}

/// [`AnimatedImageEncoder`] backed by FFmpeg
#[derive(Default)]
pub struct FfmpegWebpEncoder {
    session: Option<WebpSession>,
}

// SAFETY: all FFmpeg contexts live in the session, owned exclusively and only
// reached through `&mut self` on the feed thread.
unsafe impl Send for FfmpegWebpEncoder {}

impl FfmpegWebpEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&mut self) -> Result<&mut WebpSession> {
        self.session
            .as_mut()
            .ok_or_else(|| TranscodeError::invariant("WebP encoder used before init"))
    }
}

impl WebpSession {
    fn drain(&mut self) -> Result<bool> {
        let stream_time_base = self
            .output
            .stream(0)
            .map(|stream| stream.time_base())
            .ok_or_else(|| crate::internal_error!("webp stream missing"))?;

        loop {
            let mut packet = ffmpeg::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_stream(0);
                    packet.rescale_ts(MILLIS, stream_time_base);
                    packet
                        .write_interleaved(&mut self.output)
                        .encoder_err("Writing WebP frame")?;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => return Ok(false),
                Err(ffmpeg::Error::Eof) => return Ok(true),
                Err(e) => return Err(e).encoder_err("Receiving WebP packet"),
            }
        }
    }
}

impl AnimatedImageEncoder for FfmpegWebpEncoder {
    fn init(&mut self, width: u32, height: u32, config: &WebPConfig) -> Result<()> {
        init_ffmpeg()?;

        if self.session.is_some() {
            return Err(TranscodeError::invariant("WebP encoder initialized twice"));
        }

        let codec = ffmpeg::encoder::find_by_name(ENCODER_NAME)
            .ok_or_else(|| TranscodeError::UnsupportedFormat(format!("{} encoder not available", ENCODER_NAME)))?;

        let file = tempfile::Builder::new().prefix("overlay-").suffix(".webp").tempfile()?;
        let mut output = ffmpeg::format::output_as(&file.path(), "webp")
            .encoder_err("Creating WebP container")?;

        let context = ffmpeg::codec::context::Context::new_with_codec(codec);
        let mut video = context.encoder().video().encoder_err("Creating WebP encoder context")?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(ffmpeg::format::Pixel::YUVA420P);
        video.set_time_base(MILLIS);

        let (options, ignored) = libwebp_options(config);
        if !ignored.is_empty() {
            debug!("WebP options without libavcodec equivalent ignored: {:?}", ignored);
        }
        let mut dictionary = ffmpeg::Dictionary::new();
        for (key, value) in &options {
            dictionary.set(key, value);
        }

        let encoder = video.open_as_with(codec, dictionary).encoder_err("Opening WebP encoder")?;

        let mut stream = output.add_stream(codec).encoder_err("Adding WebP stream")?;
        stream.set_parameters(&encoder);
        stream.set_time_base(MILLIS);

        let mut muxer_options = ffmpeg::Dictionary::new();
        muxer_options.set("loop", "0");
        output
            .write_header_with(muxer_options)
            .encoder_err("Writing WebP header")?;

        let converter = ffmpeg::software::scaling::Context::get(
            ffmpeg::format::Pixel::RGBA,
            width,
            height,
            ffmpeg::format::Pixel::YUVA420P,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .encoder_err("Creating YUVA converter")?;

        debug!("WebP encoder ready: {}x{}, options {:?}", width, height, options);
        self.session = Some(WebpSession {
            encoder,
            output,
            converter,
            file,
            width,
            height,
            last_pts: None,
            frames: 0,
        });
        Ok(())
    }

    fn add_frame(&mut self, rgba: &[u8], timestamp_ms: i64) -> Result<()> {
        let session = self.session()?;

        let row_bytes = session.width as usize * 4;
        if rgba.len() != row_bytes * session.height as usize {
            return Err(TranscodeError::InvalidInput(format!(
                "Frame of {} bytes does not match {}x{} RGBA",
                rgba.len(),
                session.width,
                session.height
            )));
        }

        let mut source = ffmpeg::frame::Video::new(ffmpeg::format::Pixel::RGBA, session.width, session.height);
        let stride = source.stride(0);
        let plane = source.data_mut(0);
        for (row, src) in rgba.chunks_exact(row_bytes).enumerate() {
            plane[row * stride..row * stride + row_bytes].copy_from_slice(src);
        }

        let mut converted = ffmpeg::frame::Video::empty();
        session
            .converter
            .run(&source, &mut converted)
            .encoder_err("Converting to YUVA")?;

        // The animation encoder rejects non-increasing timestamps
        let pts = match session.last_pts {
            Some(last) if timestamp_ms <= last => last + 1,
            _ => timestamp_ms,
        };
        session.last_pts = Some(pts);
        converted.set_pts(Some(pts));

        session.encoder.send_frame(&converted).encoder_err("Sending WebP frame")?;
        session.frames += 1;
        session.drain()?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<Vec<u8>> {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| TranscodeError::invariant("WebP encoder finalized before init"))?;

        session.encoder.send_eof().encoder_err("Flushing WebP encoder")?;
        while !session.drain()? {}
        session.output.write_trailer().encoder_err("Writing WebP trailer")?;

        let bytes = std::fs::read(session.file.path())?;
        debug!("WebP finalized: {} frames, {} bytes", session.frames, bytes.len());
        Ok(bytes)
    }
}
