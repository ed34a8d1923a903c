use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use sticker_transcoder::encoder::WebPConfig;
use sticker_transcoder::pipeline::{
    FfmpegBackend, OverlayRequest, PipelineState, ProgressEvent, TranscodeRequest, Transcoder,
};
use sticker_transcoder::utils::Config;

/// Sticker Transcoder - trim/scale clips and build animated overlay stickers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (defaults to the system and user config files)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print progress events as JSON lines on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trim, rotate and scale a clip into an H.264 MP4
    Transcode {
        input: PathBuf,
        output: PathBuf,

        /// Trim start in microseconds
        #[arg(long, value_name = "US")]
        start_us: Option<i64>,

        /// Trim end in microseconds
        #[arg(long, value_name = "US")]
        end_us: Option<i64>,

        /// Output frame-rate cap
        #[arg(long, value_name = "FPS")]
        max_fps: Option<f64>,
    },

    /// Composite an overlay image onto a clip and encode an animated WebP
    Overlay {
        video: PathBuf,
        overlay: PathBuf,
        output: PathBuf,

        /// Output frame-rate cap
        #[arg(long, value_name = "FPS")]
        max_fps: Option<f64>,

        /// JSON file with WebP encoder options
        #[arg(long, value_name = "FILE")]
        webp_config: Option<PathBuf>,

        /// WebP quality (0-100)
        #[arg(long)]
        quality: Option<f32>,

        /// Encode losslessly
        #[arg(long)]
        lossless: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };

    let log_level = if args.debug { "debug" } else { config.general.log_level.as_str() };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting Sticker Transcoder v{}", env!("CARGO_PKG_VERSION"));

    let overlay_default_fps = config.overlay.default_max_fps as f64;
    let backend = Arc::new(FfmpegBackend::new()?);
    let transcoder = Arc::new(Transcoder::new(backend, config));

    let events = transcoder.subscribe();
    let json = args.json;
    let reporter = std::thread::spawn(move || {
        for event in events.iter() {
            report(&event, json);
            if event.state.is_terminal() {
                break;
            }
        }
    });

    let started = match args.command {
        Command::Transcode { input, output, start_us, end_us, max_fps } => {
            let mut request = TranscodeRequest::new(input, output).with_trim(start_us, end_us);
            request.max_fps = max_fps;
            transcoder.start_transcode(request)
        }
        Command::Overlay { video, overlay, output, max_fps, webp_config, quality, lossless } => {
            let mut webp = match webp_config {
                Some(path) => WebPConfig::from_json_file(&path)?,
                None => WebPConfig::default(),
            };
            if quality.is_some() {
                webp.quality = quality;
            }
            if lossless {
                webp.lossless = Some(true);
            }

            transcoder.start_overlay_encode(OverlayRequest {
                video,
                overlay,
                output,
                config: webp,
                max_fps: max_fps.unwrap_or(overlay_default_fps),
            })
        }
    };
    let job_id = started.ok_or_else(|| anyhow!("A job is already running"))?;

    let mut waiter = tokio::task::spawn_blocking({
        let transcoder = Arc::clone(&transcoder);
        move || transcoder.wait()
    });

    let finished = tokio::select! {
        outcome = &mut waiter => Some(outcome?),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match finished {
        Some(outcome) => outcome,
        None => {
            warn!("Interrupted, cancelling {}", job_id);
            transcoder.cancel(job_id);
            waiter.await?
        }
    };

    if reporter.join().is_err() {
        warn!("Progress reporter panicked");
    }

    match outcome.state {
        PipelineState::Succeeded => Ok(()),
        PipelineState::Cancelled => Err(anyhow!("{} was cancelled", job_id)),
        _ => Err(anyhow!(
            "{} failed: {}",
            job_id,
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        )),
    }
}

fn report(event: &ProgressEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialise event: {}", e),
        }
        return;
    }

    match event.state {
        PipelineState::Running => info!(
            "{:5.1}% ({}/{} frames)",
            event.fraction * 100.0,
            event.frames_processed,
            event.frames_estimated
        ),
        PipelineState::Idle => {}
        state => info!("Job {}", state),
    }
}
