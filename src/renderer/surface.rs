//! Decoder-to-compositor frame hand-off
//!
//! The decoder publishes each rendered output buffer into a [`FrameSurface`];
//! the compositor waits on the surface's [`FrameSignal`] with a bounded timeout
//! before it latches the newest image and draws. One producer, one consumer.

use crate::utils::error::{Result, TranscodeError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counting signal between the frame producer and the renderer
///
/// `release` adds one permit, `acquire` takes one or gives up after the
/// timeout. A timed-out acquire leaves the count untouched.
#[derive(Debug, Default)]
pub struct FrameSignal {
    permits: Mutex<usize>,
    available: Condvar,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one permit and wake a waiter
    pub fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.available.notify_one();
    }

    /// Take one permit, waiting at most `timeout`
    ///
    /// Returns `false` when the timeout elapsed with no permit available.
    pub fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if self.available.wait_until(&mut permits, deadline).timed_out() {
                if *permits == 0 {
                    return false;
                }
                break;
            }
        }
        *permits -= 1;
        true
    }

    /// Current number of unconsumed permits
    pub fn available_permits(&self) -> usize {
        *self.permits.lock()
    }
}

/// A decoded picture as the GPU sees it: tightly packed RGBA8 rows, top row first
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub pts_us: i64,
}

impl SurfaceImage {
    /// Build an image, checking the buffer holds exactly `width * height` RGBA texels
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, pts_us: i64) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(TranscodeError::InvalidInput(format!(
                "RGBA buffer for {}x{} must be {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels, pts_us })
    }
}

#[derive(Debug, Default)]
struct SurfaceInner {
    latest: Mutex<Option<SurfaceImage>>,
    signal: FrameSignal,
}

/// Shared single-slot surface the decoder renders into
///
/// Cloning yields another handle to the same surface.
#[derive(Debug, Clone, Default)]
pub struct FrameSurface {
    inner: Arc<SurfaceInner>,
}

impl FrameSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending image and signal that a new frame is available
    pub fn publish(&self, image: SurfaceImage) {
        *self.inner.latest.lock() = Some(image);
        self.inner.signal.release();
    }

    /// Wait for the next published frame
    ///
    /// Fails with [`TranscodeError::FrameTimeout`] when nothing arrives in time.
    pub fn await_frame(&self, timeout: Duration) -> Result<()> {
        if self.inner.signal.acquire(timeout) {
            Ok(())
        } else {
            Err(TranscodeError::FrameTimeout(timeout))
        }
    }

    /// Take the newest published image, if one is waiting
    pub fn latch(&self) -> Option<SurfaceImage> {
        self.inner.latest.lock().take()
    }
}
