//! Integration test utilities for the transcoder
//!
//! Test doubles for every capability a job acquires. Each double registers
//! a handle in a shared [`ResourceLedger`] while it is alive, so tests can
//! assert that nothing leaks and that teardown ran in dependency order.

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use sticker_transcoder::decoder::{
    DecoderOutput, Demuxer, EncodedSample, OutputBuffer, TrackInfo, VideoDecoder,
};
use sticker_transcoder::encoder::{
    AnimatedImageEncoder, EncodedPacket, EncoderOutput, EncoderSurface, Muxer, OutputFormat, RenderedFrame,
    SurfaceInput, VideoEncoder, VideoEncoderSettings, WebPConfig,
};
use sticker_transcoder::pipeline::{MediaBackend, OutputGeometry, ProgressEvent};
use sticker_transcoder::renderer::{Compositor, FrameSurface, OverlayCompositor, OverlayImage, SurfaceImage};
use sticker_transcoder::utils::Config;
use sticker_transcoder::TranscodeError;
use tempfile::TempDir;

type CoreResult<T> = sticker_transcoder::Result<T>;

pub const DEMUXER: &str = "demuxer";
pub const DECODER: &str = "decoder";
pub const ENCODER: &str = "encoder";
pub const IMAGE_ENCODER: &str = "image_encoder";
pub const MUXER: &str = "muxer";
pub const COMPOSITOR: &str = "compositor";
pub const OVERLAY_COMPOSITOR: &str = "overlay_compositor";

#[derive(Debug, Default)]
struct LedgerInner {
    created: HashMap<&'static str, usize>,
    live: HashMap<&'static str, usize>,
    released: Vec<&'static str>,
    drawn_pts: Vec<i64>,
    written_pts: Vec<i64>,
    image_frames_ms: Vec<i64>,
    image_size: Option<(u32, u32)>,
    geometry: Option<(u32, u32)>,
}

/// Shared record of handle lifetimes and of what the doubles observed
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    inner: Arc<Mutex<LedgerInner>>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, kind: &'static str) -> Handle {
        let mut inner = self.inner.lock();
        *inner.created.entry(kind).or_default() += 1;
        *inner.live.entry(kind).or_default() += 1;
        Handle { ledger: self.clone(), kind }
    }

    fn release(&self, kind: &'static str) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.live.get_mut(kind) {
            *count = count.saturating_sub(1);
        }
        inner.released.push(kind);
    }

    pub fn created(&self, kind: &str) -> usize {
        self.inner.lock().created.get(kind).copied().unwrap_or(0)
    }

    pub fn live_handles(&self) -> usize {
        self.inner.lock().live.values().sum()
    }

    pub fn release_order(&self) -> Vec<&'static str> {
        self.inner.lock().released.clone()
    }

    /// Timestamps the compositor drew, after rebasing
    pub fn drawn_pts(&self) -> Vec<i64> {
        self.inner.lock().drawn_pts.clone()
    }

    /// Packet timestamps the muxer wrote
    pub fn written_pts(&self) -> Vec<i64> {
        self.inner.lock().written_pts.clone()
    }

    pub fn image_frames_ms(&self) -> Vec<i64> {
        self.inner.lock().image_frames_ms.clone()
    }

    /// Size the image encoder was initialised with
    pub fn image_encoder_size(&self) -> Option<(u32, u32)> {
        self.inner.lock().image_size
    }

    pub fn compositor_geometry(&self) -> Option<(u32, u32)> {
        self.inner.lock().geometry
    }
}

/// Live-handle guard owned by every double
struct Handle {
    ledger: ResourceLedger,
    kind: &'static str,
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.ledger.release(self.kind);
    }
}

/// Shape of the fake source and the faults to inject
#[derive(Debug, Clone)]
pub struct Scenario {
    pub track: TrackInfo,

    /// Spacing of source frames in microseconds
    pub frame_interval_us: i64,

    /// Every n-th sample is a keyframe
    pub keyframe_every: usize,

    /// Delay per demuxed sample, to give cancellation something to interrupt
    pub sample_delay: Duration,

    /// Frames whose picture never reaches the surface
    pub unpublished_pts: HashSet<i64>,

    /// Encoder emits a packet before announcing its format
    pub packet_before_format: bool,

    /// Encoder announces its format, then never reads its input again
    pub stalled_encoder: bool,

    /// Overlay compositor renders at this size instead of the overlay's
    pub overlay_canvas: Option<u32>,

    /// Image encoder finalizes to zero bytes
    pub empty_image_output: bool,
}

impl Scenario {
    /// Upright 1920x1080 source at `fps` lasting `duration_us`
    pub fn new(duration_us: i64, fps: f64) -> Self {
        Self {
            track: TrackInfo {
                width: 1920,
                height: 1080,
                duration_us,
                rotation_degrees: 0,
                frame_rate: Some(fps),
            },
            frame_interval_us: (1_000_000.0 / fps).round() as i64,
            keyframe_every: 10,
            sample_delay: Duration::ZERO,
            unpublished_pts: HashSet::new(),
            packet_before_format: false,
            stalled_encoder: false,
            overlay_canvas: None,
            empty_image_output: false,
        }
    }

    fn sample_count(&self) -> usize {
        (self.track.duration_us / self.frame_interval_us).max(0) as usize
    }
}

/// Backend handing out doubles that report to one ledger
pub struct FakeBackend {
    scenario: Scenario,
    ledger: ResourceLedger,
}

impl FakeBackend {
    pub fn new(scenario: Scenario) -> (Arc<Self>, ResourceLedger) {
        let ledger = ResourceLedger::new();
        let backend = Arc::new(Self { scenario, ledger: ledger.clone() });
        (backend, ledger)
    }
}

impl MediaBackend for FakeBackend {
    fn open_demuxer(&self, _path: &Path) -> CoreResult<Box<dyn Demuxer>> {
        Ok(Box::new(FakeDemuxer {
            scenario: self.scenario.clone(),
            next: 0,
            ledger: self.ledger.clone(),
            _handle: self.ledger.acquire(DEMUXER),
        }))
    }

    fn create_video_encoder(&self, settings: &VideoEncoderSettings) -> CoreResult<Box<dyn VideoEncoder>> {
        let (surface, input) = EncoderSurface::channel(settings.submit_timeout);
        Ok(Box::new(FakeEncoder {
            surface,
            input,
            settings: settings.clone(),
            format_sent: self.scenario.packet_before_format,
            stalled: self.scenario.stalled_encoder,
            _handle: self.ledger.acquire(ENCODER),
        }))
    }

    fn create_muxer(&self, path: &Path) -> CoreResult<Box<dyn Muxer>> {
        Ok(Box::new(FakeMuxer {
            path: path.to_path_buf(),
            started: false,
            tracks: 0,
            written: 0,
            ledger: self.ledger.clone(),
            _handle: self.ledger.acquire(MUXER),
        }))
    }

    fn create_compositor(
        &self,
        geometry: OutputGeometry,
        _rotation_degrees: u32,
        surface: EncoderSurface,
    ) -> CoreResult<Box<dyn Compositor>> {
        self.ledger.inner.lock().geometry = Some((geometry.width, geometry.height));
        Ok(Box::new(FakeCompositor {
            surface: FrameSurface::new(),
            encoder_surface: surface,
            geometry,
            ledger: self.ledger.clone(),
            _handle: self.ledger.acquire(COMPOSITOR),
        }))
    }

    fn create_overlay_compositor(
        &self,
        overlay: &OverlayImage,
        _rotation_degrees: u32,
    ) -> CoreResult<Box<dyn OverlayCompositor>> {
        Ok(Box::new(FakeOverlayCompositor {
            surface: FrameSurface::new(),
            size: self.scenario.overlay_canvas.unwrap_or_else(|| overlay.size()),
            _handle: self.ledger.acquire(OVERLAY_COMPOSITOR),
        }))
    }

    fn create_image_encoder(&self) -> CoreResult<Box<dyn AnimatedImageEncoder>> {
        Ok(Box::new(FakeImageEncoder {
            size: None,
            frames: 0,
            empty_output: self.scenario.empty_image_output,
            ledger: self.ledger.clone(),
            _handle: self.ledger.acquire(IMAGE_ENCODER),
        }))
    }
}

struct FakeDemuxer {
    scenario: Scenario,
    next: usize,
    ledger: ResourceLedger,
    _handle: Handle,
}

impl Demuxer for FakeDemuxer {
    fn track_info(&self) -> &TrackInfo {
        &self.scenario.track
    }

    fn seek_to_keyframe(&mut self, timestamp_us: i64) -> CoreResult<()> {
        let index = (timestamp_us / self.scenario.frame_interval_us).max(0) as usize;
        self.next = index - index % self.scenario.keyframe_every.max(1);
        Ok(())
    }

    fn read_sample(&mut self) -> CoreResult<Option<EncodedSample>> {
        if self.next >= self.scenario.sample_count() {
            return Ok(None);
        }
        if !self.scenario.sample_delay.is_zero() {
            thread::sleep(self.scenario.sample_delay);
        }

        let index = self.next;
        self.next += 1;
        let pts_us = index as i64 * self.scenario.frame_interval_us;
        Ok(Some(EncodedSample {
            data: vec![0u8; 8],
            pts_us,
            dts_us: pts_us,
            is_key: index % self.scenario.keyframe_every.max(1) == 0,
        }))
    }

    fn open_decoder(&mut self, surface: FrameSurface) -> CoreResult<Box<dyn VideoDecoder>> {
        Ok(Box::new(FakeDecoder {
            surface,
            pending: VecDeque::new(),
            end_of_input: false,
            next_id: 0,
            unpublished_pts: self.scenario.unpublished_pts.clone(),
            _handle: self.ledger.acquire(DECODER),
        }))
    }
}

struct FakeDecoder {
    surface: FrameSurface,
    pending: VecDeque<i64>,
    end_of_input: bool,
    next_id: u64,
    unpublished_pts: HashSet<i64>,
    _handle: Handle,
}

impl VideoDecoder for FakeDecoder {
    fn queue_sample(&mut self, sample: EncodedSample) -> CoreResult<()> {
        if self.end_of_input {
            return Err(TranscodeError::invariant("sample queued after end of input"));
        }
        self.pending.push_back(sample.pts_us);
        Ok(())
    }

    fn signal_end_of_input(&mut self) -> CoreResult<()> {
        self.end_of_input = true;
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> CoreResult<DecoderOutput> {
        match self.pending.pop_front() {
            Some(pts_us) => {
                self.next_id += 1;
                Ok(DecoderOutput::Buffer(OutputBuffer { id: self.next_id, pts_us }))
            }
            None if self.end_of_input => Ok(DecoderOutput::EndOfStream),
            None => Ok(DecoderOutput::TryAgain),
        }
    }

    fn release_output(&mut self, buffer: OutputBuffer, render: bool) -> CoreResult<()> {
        if render && !self.unpublished_pts.contains(&buffer.pts_us) {
            self.surface
                .publish(SurfaceImage::new(2, 2, vec![128u8; 16], buffer.pts_us)?);
        }
        Ok(())
    }
}

struct FakeCompositor {
    surface: FrameSurface,
    encoder_surface: EncoderSurface,
    geometry: OutputGeometry,
    ledger: ResourceLedger,
    _handle: Handle,
}

impl Compositor for FakeCompositor {
    fn decoder_surface(&self) -> FrameSurface {
        self.surface.clone()
    }

    fn await_new_frame(&mut self, timeout: Duration) -> CoreResult<()> {
        self.surface.await_frame(timeout)?;
        self.surface.latch();
        Ok(())
    }

    fn draw_frame(&mut self, pts_us: i64) -> CoreResult<()> {
        let (width, height) = (self.geometry.width, self.geometry.height);
        self.encoder_surface.submit(RenderedFrame {
            width,
            height,
            pixels: vec![0u8; (width * height * 4) as usize],
            pts_us,
        })?;
        self.ledger.inner.lock().drawn_pts.push(pts_us);
        Ok(())
    }
}

struct FakeEncoder {
    surface: EncoderSurface,
    input: Receiver<SurfaceInput>,
    settings: VideoEncoderSettings,
    format_sent: bool,
    stalled: bool,
    _handle: Handle,
}

impl VideoEncoder for FakeEncoder {
    fn input_surface(&self) -> EncoderSurface {
        self.surface.clone()
    }

    fn dequeue_output(&mut self, timeout: Duration) -> CoreResult<EncoderOutput> {
        if !self.format_sent {
            self.format_sent = true;
            return Ok(EncoderOutput::FormatChanged(OutputFormat {
                width: self.settings.width,
                height: self.settings.height,
                frame_rate: self.settings.frame_rate,
                codec_parameters: None,
            }));
        }
        if self.stalled {
            thread::sleep(timeout);
            return Ok(EncoderOutput::TryAgain);
        }

        match self.input.recv_timeout(timeout) {
            Ok(SurfaceInput::Frame(frame)) => Ok(EncoderOutput::Packet(EncodedPacket {
                data: vec![1u8; 4],
                pts_us: frame.pts_us,
                dts_us: frame.pts_us,
                is_key: false,
            })),
            Ok(SurfaceInput::EndOfStream) => Ok(EncoderOutput::EndOfStream),
            Err(RecvTimeoutError::Timeout) => Ok(EncoderOutput::TryAgain),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TranscodeError::Encoder("input surface closed".to_string()))
            }
        }
    }
}

struct FakeMuxer {
    path: PathBuf,
    started: bool,
    tracks: usize,
    written: usize,
    ledger: ResourceLedger,
    _handle: Handle,
}

impl Muxer for FakeMuxer {
    fn add_track(&mut self, _format: &OutputFormat) -> CoreResult<usize> {
        self.tracks += 1;
        Ok(self.tracks - 1)
    }

    fn start(&mut self) -> CoreResult<()> {
        if self.started || self.tracks == 0 {
            return Err(TranscodeError::invariant("bad muxer start"));
        }
        self.started = true;
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn write_sample(&mut self, _track: usize, packet: &EncodedPacket) -> CoreResult<()> {
        if !self.started {
            return Err(TranscodeError::invariant("write before start"));
        }
        self.written += 1;
        self.ledger.inner.lock().written_pts.push(packet.pts_us);
        Ok(())
    }

    fn stop(&mut self) -> CoreResult<()> {
        std::fs::write(&self.path, format!("fake mp4 with {} samples", self.written))?;
        Ok(())
    }
}

struct FakeOverlayCompositor {
    surface: FrameSurface,
    size: u32,
    _handle: Handle,
}

impl OverlayCompositor for FakeOverlayCompositor {
    fn decoder_surface(&self) -> FrameSurface {
        self.surface.clone()
    }

    fn await_new_frame(&mut self, timeout: Duration) -> CoreResult<()> {
        self.surface.await_frame(timeout)?;
        self.surface.latch();
        Ok(())
    }

    fn draw_frame(&mut self) -> CoreResult<Vec<u8>> {
        Ok(vec![255u8; (self.size * self.size * 4) as usize])
    }

    fn output_size(&self) -> u32 {
        self.size
    }
}

struct FakeImageEncoder {
    size: Option<(u32, u32)>,
    frames: usize,
    empty_output: bool,
    ledger: ResourceLedger,
    _handle: Handle,
}

impl AnimatedImageEncoder for FakeImageEncoder {
    fn init(&mut self, width: u32, height: u32, _config: &WebPConfig) -> CoreResult<()> {
        self.size = Some((width, height));
        self.ledger.inner.lock().image_size = Some((width, height));
        Ok(())
    }

    fn add_frame(&mut self, rgba: &[u8], timestamp_ms: i64) -> CoreResult<()> {
        let (width, height) = self
            .size
            .ok_or_else(|| TranscodeError::invariant("frame added before init"))?;
        if rgba.len() != (width * height * 4) as usize {
            return Err(TranscodeError::InvalidInput("bad frame size".to_string()));
        }
        self.frames += 1;
        self.ledger.inner.lock().image_frames_ms.push(timestamp_ms);
        Ok(())
    }

    fn finalize(&mut self) -> CoreResult<Vec<u8>> {
        if self.empty_output {
            return Ok(Vec::new());
        }
        let mut bytes = b"RIFF\0\0\0\0WEBP".to_vec();
        bytes.extend_from_slice(&(self.frames as u32).to_le_bytes());
        Ok(bytes)
    }
}

/// Test fixture: a scratch directory plus pipeline settings tuned for doubles
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub config: Config,
}

impl TestFixture {
    pub fn new() -> Result<Self> {
        let mut config = Config::default();
        config.transcode.frame_wait_timeout_ms = 100;
        config.transcode.dequeue_timeout_ms = 1;
        config.overlay.frame_wait_timeout_ms = 100;
        config.overlay.dequeue_timeout_ms = 1;
        config.overlay.output_size = 8;

        Ok(Self {
            temp_dir: TempDir::new()?,
            config,
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Write a small semi-transparent PNG overlay
    pub fn overlay_png(&self) -> Result<PathBuf> {
        let path = self.path("overlay.png");
        image::RgbaImage::from_pixel(16, 16, image::Rgba([0, 200, 0, 128])).save(&path)?;
        Ok(path)
    }
}

/// Collect events until the first terminal one
pub fn collect_until_terminal(events: &Receiver<ProgressEvent>, timeout: Duration) -> Vec<ProgressEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.recv_timeout(timeout) {
        let terminal = event.state.is_terminal();
        collected.push(event);
        if terminal {
            break;
        }
    }
    collected
}
