//! Integration tests for the transcoder orchestrator
//!
//! These tests drive the real orchestrator, job runners, feed and drain
//! loops against the doubles from the support crate:
//! - Progress and terminal-state contracts
//! - Trim, throttle and rotation handling
//! - Failure classification and cancellation
//! - Ordered release of every handle

use anyhow::Result;
use sticker_transcoder::encoder::{WebPConfig, SURFACE_CAPACITY};
use sticker_transcoder::pipeline::{
    JobId, OverlayRequest, PipelineState, ProgressEvent, TranscodeRequest, Transcoder,
};
use sticker_transcoder_integration_tests::{
    collect_until_terminal, FakeBackend, Scenario, TestFixture, COMPOSITOR, DECODER, DEMUXER, ENCODER,
    IMAGE_ENCODER, MUXER, OVERLAY_COMPOSITOR,
};
use std::time::{Duration, Instant};

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn assert_monotonic(events: &[ProgressEvent]) {
    for pair in events.windows(2) {
        assert!(
            pair[1].fraction >= pair[0].fraction,
            "fraction went backwards: {} -> {}",
            pair[0].fraction,
            pair[1].fraction
        );
    }
}

fn slow_scenario() -> Scenario {
    let mut scenario = Scenario::new(10_000_000, 25.0);
    scenario.sample_delay = Duration::from_millis(5);
    scenario
}

#[test]
fn test_transcode_succeeds_with_full_progress() -> Result<()> {
    let fixture = TestFixture::new()?;
    let (backend, ledger) = FakeBackend::new(Scenario::new(2_000_000, 25.0));
    let transcoder = Transcoder::new(backend, fixture.config.clone());
    let events = transcoder.subscribe();

    let output = fixture.path("out.mp4");
    let request = TranscodeRequest::new(fixture.path("in.mp4"), &output).with_max_fps(12.5);
    transcoder.start_transcode(request).expect("job should start");
    let last = transcoder.wait();

    let events = collect_until_terminal(&events, EVENT_TIMEOUT);
    assert_monotonic(&events);

    assert_eq!(last.state, PipelineState::Succeeded);
    assert_eq!(last.fraction, 1.0);
    assert_eq!(last.frames_estimated, 25);
    assert_eq!(last.frames_processed, 25);
    assert_eq!(events.last().map(|e| e.state), Some(PipelineState::Succeeded));

    // One event per kept frame, spaced at least one target interval apart
    let drawn = ledger.drawn_pts();
    assert_eq!(drawn.len(), 25);
    assert!(drawn.windows(2).all(|w| w[1] - w[0] >= 80_000));
    assert_eq!(ledger.written_pts(), drawn);
    assert!(output.exists());

    assert_eq!(ledger.live_handles(), 0);
    assert_eq!(ledger.release_order(), vec![DEMUXER, DECODER, ENCODER, MUXER, COMPOSITOR]);
    Ok(())
}

#[test]
fn test_frames_estimated_uses_target_rate() -> Result<()> {
    let fixture = TestFixture::new()?;
    let (backend, _ledger) = FakeBackend::new(Scenario::new(5_000_000, 30.0));
    let transcoder = Transcoder::new(backend, fixture.config.clone());
    let events = transcoder.subscribe();

    // Default cap of 24 fps applies
    transcoder
        .start_transcode(TranscodeRequest::new(fixture.path("in.mp4"), fixture.path("out.mp4")))
        .expect("job should start");
    let last = transcoder.wait();

    let events = collect_until_terminal(&events, EVENT_TIMEOUT);
    assert!(events
        .iter()
        .any(|e| e.state == PipelineState::Running && e.frames_estimated == 120));
    assert_eq!(last.state, PipelineState::Succeeded);
    assert_eq!(last.frames_processed, 120);
    Ok(())
}

#[test]
fn test_invalid_trim_fails_before_codecs() -> Result<()> {
    let fixture = TestFixture::new()?;
    let (backend, ledger) = FakeBackend::new(Scenario::new(5_000_000, 30.0));
    let transcoder = Transcoder::new(backend, fixture.config.clone());

    let request = TranscodeRequest::new(fixture.path("in.mp4"), fixture.path("out.mp4"))
        .with_trim(Some(2_000_000), Some(1_000_000));
    transcoder.start_transcode(request).expect("job should start");
    let last = transcoder.wait();

    assert_eq!(last.state, PipelineState::Failed);
    assert_eq!(last.fraction, 1.0);
    assert!(last.error.unwrap_or_default().to_lowercase().contains("trim window"));

    for kind in [DECODER, ENCODER, MUXER, COMPOSITOR] {
        assert_eq!(ledger.created(kind), 0, "{} should not be created", kind);
    }
    assert_eq!(ledger.release_order(), vec![DEMUXER]);
    assert_eq!(ledger.live_handles(), 0);
    Ok(())
}

#[test]
fn test_trimmed_job_rebases_timestamps() -> Result<()> {
    let fixture = TestFixture::new()?;
    let (backend, ledger) = FakeBackend::new(Scenario::new(5_000_000, 25.0));
    let transcoder = Transcoder::new(backend, fixture.config.clone());

    let request = TranscodeRequest::new(fixture.path("in.mp4"), fixture.path("out.mp4"))
        .with_trim(Some(1_000_000), Some(2_000_000))
        .with_max_fps(25.0);
    transcoder.start_transcode(request).expect("job should start");
    let last = transcoder.wait();

    assert_eq!(last.state, PipelineState::Succeeded);
    assert_eq!(last.frames_estimated, 25);

    let drawn = ledger.drawn_pts();
    assert_eq!(drawn.first(), Some(&0));
    assert_eq!(drawn.last(), Some(&1_000_000));
    assert_eq!(drawn.len(), 26);
    assert!(drawn.windows(2).all(|w| w[1] > w[0]));
    Ok(())
}

#[test]
fn test_rotation_swaps_output_geometry() -> Result<()> {
    let fixture = TestFixture::new()?;
    let mut scenario = Scenario::new(1_000_000, 25.0);
    scenario.track.width = 1080;
    scenario.track.height = 1920;
    scenario.track.rotation_degrees = 90;
    let (backend, ledger) = FakeBackend::new(scenario);
    let transcoder = Transcoder::new(backend, fixture.config.clone());

    transcoder
        .start_transcode(TranscodeRequest::new(fixture.path("in.mp4"), fixture.path("out.mp4")))
        .expect("job should start");
    assert_eq!(transcoder.wait().state, PipelineState::Succeeded);
    assert_eq!(ledger.compositor_geometry(), Some((512, 288)));
    Ok(())
}

#[test]
fn test_cancel_mid_job() -> Result<()> {
    let fixture = TestFixture::new()?;
    let (backend, ledger) = FakeBackend::new(slow_scenario());
    let transcoder = Transcoder::new(backend, fixture.config.clone());
    let events = transcoder.subscribe();

    let id = transcoder
        .start_transcode(TranscodeRequest::new(fixture.path("in.mp4"), fixture.path("out.mp4")))
        .expect("job should start");

    // Let a few frames through before cancelling
    while let Ok(event) = events.recv_timeout(EVENT_TIMEOUT) {
        if event.frames_processed >= 3 {
            break;
        }
    }
    transcoder.cancel(id);
    let last = transcoder.wait();

    assert_eq!(last.state, PipelineState::Cancelled);
    assert_eq!(last.error, None);
    assert_eq!(last.fraction, 1.0);
    assert!(ledger.drawn_pts().len() < 250);

    assert_eq!(ledger.live_handles(), 0);
    assert_eq!(ledger.release_order(), vec![DEMUXER, DECODER, ENCODER, MUXER, COMPOSITOR]);
    Ok(())
}

#[test]
fn test_cancel_with_stalled_encoder_unwinds_promptly() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    fixture.config.transcode.frame_wait_timeout_ms = 5_000;
    let mut scenario = Scenario::new(10_000_000, 25.0);
    scenario.stalled_encoder = true;
    let (backend, ledger) = FakeBackend::new(scenario);
    let transcoder = Transcoder::new(backend, fixture.config.clone());
    let events = transcoder.subscribe();

    let id = transcoder
        .start_transcode(TranscodeRequest::new(fixture.path("in.mp4"), fixture.path("out.mp4")))
        .expect("job should start");

    // The encoder input is full once this many frames are drawn
    while let Ok(event) = events.recv_timeout(EVENT_TIMEOUT) {
        if event.frames_processed >= SURFACE_CAPACITY as u64 {
            break;
        }
    }
    let cancelled_at = Instant::now();
    transcoder.cancel(id);
    let last = transcoder.wait();

    assert_eq!(last.state, PipelineState::Cancelled);
    assert_eq!(last.error, None);
    assert!(
        cancelled_at.elapsed() < Duration::from_secs(2),
        "cancel took {:?}",
        cancelled_at.elapsed()
    );
    assert!(ledger.written_pts().is_empty());
    assert_eq!(ledger.live_handles(), 0);
    assert_eq!(ledger.release_order(), vec![DEMUXER, DECODER, ENCODER, MUXER, COMPOSITOR]);
    Ok(())
}

#[test]
fn test_second_start_is_a_no_op() -> Result<()> {
    let fixture = TestFixture::new()?;
    let (backend, ledger) = FakeBackend::new(slow_scenario());
    let transcoder = Transcoder::new(backend, fixture.config.clone());
    let request = TranscodeRequest::new(fixture.path("in.mp4"), fixture.path("out.mp4"));

    let first = transcoder.start_transcode(request.clone()).expect("job should start");
    assert_eq!(transcoder.start_transcode(request.clone()), None);

    let snapshot = transcoder.snapshot();
    assert_eq!(snapshot.state, PipelineState::Running);
    assert_eq!(snapshot.job_id, Some(first));

    // Unknown ids do not touch the running job
    transcoder.cancel(JobId(999));
    assert_eq!(transcoder.snapshot().state, PipelineState::Running);

    transcoder.cancel(first);
    assert_eq!(transcoder.wait().state, PipelineState::Cancelled);
    assert_eq!(ledger.created(DEMUXER), 1);

    // A finished job no longer blocks new ones
    // The rejected start did not consume an id
    let second = transcoder.start_transcode(request).expect("job should start again");
    assert_eq!(second, JobId(first.0 + 1));
    transcoder.cancel(second);
    assert_eq!(transcoder.wait().state, PipelineState::Cancelled);
    assert_eq!(ledger.live_handles(), 0);
    Ok(())
}

#[test]
fn test_frame_timeout_skips_frame_and_continues() -> Result<()> {
    let fixture = TestFixture::new()?;
    let mut scenario = Scenario::new(1_000_000, 25.0);
    scenario.unpublished_pts = [120_000, 280_000].into_iter().collect();
    let (backend, ledger) = FakeBackend::new(scenario);
    let transcoder = Transcoder::new(backend, fixture.config.clone());

    let request =
        TranscodeRequest::new(fixture.path("in.mp4"), fixture.path("out.mp4")).with_max_fps(25.0);
    transcoder.start_transcode(request).expect("job should start");
    let last = transcoder.wait();

    assert_eq!(last.state, PipelineState::Succeeded);
    let drawn = ledger.drawn_pts();
    assert_eq!(drawn.len(), 23);
    assert!(!drawn.contains(&120_000));
    assert!(!drawn.contains(&280_000));
    assert_eq!(ledger.written_pts().len(), 23);
    Ok(())
}

#[test]
fn test_packet_before_muxer_start_fails_job() -> Result<()> {
    let fixture = TestFixture::new()?;
    let mut scenario = Scenario::new(1_000_000, 25.0);
    scenario.packet_before_format = true;
    let (backend, ledger) = FakeBackend::new(scenario);
    let transcoder = Transcoder::new(backend, fixture.config.clone());

    transcoder
        .start_transcode(TranscodeRequest::new(fixture.path("in.mp4"), fixture.path("out.mp4")))
        .expect("job should start");
    let last = transcoder.wait();

    assert_eq!(last.state, PipelineState::Failed);
    assert!(last
        .error
        .unwrap_or_default()
        .contains("before the muxer was started"));
    assert!(ledger.written_pts().is_empty());
    assert_eq!(ledger.live_handles(), 0);
    assert_eq!(ledger.release_order(), vec![DEMUXER, DECODER, ENCODER, MUXER, COMPOSITOR]);
    Ok(())
}

fn overlay_request(fixture: &TestFixture) -> Result<OverlayRequest> {
    Ok(OverlayRequest {
        video: fixture.path("clip.mp4"),
        overlay: fixture.overlay_png()?,
        output: fixture.path("sticker.webp"),
        config: WebPConfig::default(),
        max_fps: 10.0,
    })
}

#[test]
fn test_overlay_encode_writes_output() -> Result<()> {
    let fixture = TestFixture::new()?;
    let (backend, ledger) = FakeBackend::new(Scenario::new(1_000_000, 25.0));
    let transcoder = Transcoder::new(backend, fixture.config.clone());
    let events = transcoder.subscribe();

    let request = overlay_request(&fixture)?;
    let output = request.output.clone();
    transcoder.start_overlay_encode(request).expect("job should start");
    let last = transcoder.wait();

    assert_eq!(last.state, PipelineState::Succeeded);
    assert_eq!(last.fraction, 1.0);
    assert_monotonic(&collect_until_terminal(&events, EVENT_TIMEOUT));

    let bytes = std::fs::read(&output)?;
    assert!(bytes.starts_with(b"RIFF"));

    let frames_ms = ledger.image_frames_ms();
    assert_eq!(frames_ms.first(), Some(&0));
    assert_eq!(frames_ms.len(), 9);
    assert!(frames_ms.windows(2).all(|w| w[1] - w[0] >= 100));

    assert_eq!(ledger.live_handles(), 0);
    assert_eq!(
        ledger.release_order(),
        vec![DEMUXER, DECODER, IMAGE_ENCODER, OVERLAY_COMPOSITOR]
    );
    Ok(())
}

#[test]
fn test_overlay_cancel_mid_job() -> Result<()> {
    let fixture = TestFixture::new()?;
    let (backend, ledger) = FakeBackend::new(slow_scenario());
    let transcoder = Transcoder::new(backend, fixture.config.clone());
    let events = transcoder.subscribe();

    let request = overlay_request(&fixture)?;
    let output = request.output.clone();
    let id = transcoder.start_overlay_encode(request).expect("job should start");

    while let Ok(event) = events.recv_timeout(EVENT_TIMEOUT) {
        if event.frames_processed >= 3 {
            break;
        }
    }
    transcoder.cancel(id);
    let last = transcoder.wait();

    assert_eq!(last.state, PipelineState::Cancelled);
    assert_eq!(last.error, None);
    assert_eq!(last.fraction, 1.0);
    assert!(!output.exists());

    assert_eq!(ledger.live_handles(), 0);
    assert_eq!(
        ledger.release_order(),
        vec![DEMUXER, DECODER, IMAGE_ENCODER, OVERLAY_COMPOSITOR]
    );
    Ok(())
}

#[test]
fn test_overlay_encoder_sized_from_compositor() -> Result<()> {
    let fixture = TestFixture::new()?;
    let mut scenario = Scenario::new(1_000_000, 25.0);
    scenario.overlay_canvas = Some(4);
    let (backend, ledger) = FakeBackend::new(scenario);
    let transcoder = Transcoder::new(backend, fixture.config.clone());

    transcoder
        .start_overlay_encode(overlay_request(&fixture)?)
        .expect("job should start");
    let last = transcoder.wait();

    assert_eq!(last.state, PipelineState::Succeeded);
    assert_eq!(ledger.image_encoder_size(), Some((4, 4)));
    assert_eq!(ledger.image_frames_ms().len(), 9);
    Ok(())
}

#[test]
fn test_overlay_empty_output_fails() -> Result<()> {
    let fixture = TestFixture::new()?;
    let mut scenario = Scenario::new(1_000_000, 25.0);
    scenario.empty_image_output = true;
    let (backend, ledger) = FakeBackend::new(scenario);
    let transcoder = Transcoder::new(backend, fixture.config.clone());

    let request = overlay_request(&fixture)?;
    let output = request.output.clone();
    transcoder.start_overlay_encode(request).expect("job should start");
    let last = transcoder.wait();

    assert_eq!(last.state, PipelineState::Failed);
    assert!(last.error.unwrap_or_default().contains("no data"));
    assert!(!output.exists());
    assert_eq!(ledger.live_handles(), 0);
    Ok(())
}

#[test]
fn test_unreadable_overlay_fails_before_codecs() -> Result<()> {
    let fixture = TestFixture::new()?;
    let (backend, ledger) = FakeBackend::new(Scenario::new(1_000_000, 25.0));
    let transcoder = Transcoder::new(backend, fixture.config.clone());

    let mut request = overlay_request(&fixture)?;
    request.overlay = fixture.path("missing.png");
    transcoder.start_overlay_encode(request).expect("job should start");
    let last = transcoder.wait();

    assert_eq!(last.state, PipelineState::Failed);
    assert_eq!(ledger.created(IMAGE_ENCODER), 0);
    assert_eq!(ledger.created(OVERLAY_COMPOSITOR), 0);
    assert_eq!(ledger.created(DECODER), 0);
    Ok(())
}

#[tokio::test]
async fn test_wait_from_async_host() -> Result<()> {
    let fixture = TestFixture::new()?;
    let (backend, _ledger) = FakeBackend::new(Scenario::new(1_000_000, 25.0));
    let transcoder = std::sync::Arc::new(Transcoder::new(backend, fixture.config.clone()));

    transcoder
        .start_transcode(TranscodeRequest::new(fixture.path("in.mp4"), fixture.path("out.mp4")))
        .expect("job should start");

    let waiter = std::sync::Arc::clone(&transcoder);
    let last = tokio::task::spawn_blocking(move || waiter.wait()).await?;
    assert_eq!(last.state, PipelineState::Succeeded);
    Ok(())
}
