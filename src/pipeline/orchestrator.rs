//! Job orchestrator
//!
//! [`Transcoder`] accepts at most one running job at a time, runs it on its
//! own thread, and turns the job's outcome into exactly one terminal state.

use crate::pipeline::overlay_job::OverlayJob;
use crate::pipeline::transcode_job::TranscodeJob;
use crate::pipeline::{
    JobControl, JobId, MediaBackend, OverlayRequest, PipelineState, PipelineStateManager, ProgressEvent,
    TranscodeRequest,
};
use crate::utils::error::Result;
use crate::utils::Config;
use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Running job bookkeeping
struct ActiveJob {
    id: JobId,
    cancel: Arc<AtomicBool>,
}

/// Pipeline orchestrator exposing the host commands
pub struct Transcoder {
    backend: Arc<dyn MediaBackend>,
    config: Arc<Config>,
    state: Arc<PipelineStateManager>,
    active: Mutex<Option<ActiveJob>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl Transcoder {
    pub fn new(backend: Arc<dyn MediaBackend>, config: Config) -> Self {
        Self {
            backend,
            config: Arc::new(config),
            state: Arc::new(PipelineStateManager::new()),
            active: Mutex::new(None),
            worker: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a trim/crop/scale job
    ///
    /// Returns `None`, leaving the running job untouched, when a job is
    /// already running.
    pub fn start_transcode(&self, request: TranscodeRequest) -> Option<JobId> {
        self.start(|id, control| {
            let job = TranscodeJob {
                id,
                request,
                backend: Arc::clone(&self.backend),
                config: Arc::clone(&self.config),
                state: Arc::clone(&self.state),
                control,
            };
            move || job.run()
        })
    }

    /// Start an overlay-to-animated-image job; `None` when one is already running
    pub fn start_overlay_encode(&self, request: OverlayRequest) -> Option<JobId> {
        self.start(|id, control| {
            let job = OverlayJob {
                id,
                request,
                backend: Arc::clone(&self.backend),
                config: Arc::clone(&self.config),
                state: Arc::clone(&self.state),
                control,
            };
            move || job.run()
        })
    }

    fn start<B, R>(&self, build: B) -> Option<JobId>
    where
        B: FnOnce(JobId, JobControl) -> R,
        R: FnOnce() -> Result<()> + Send + 'static,
    {
        // Starts are serialised by `active`, so the id is only consumed once accepted
        let mut active = self.active.lock();
        let id = JobId(self.next_id.load(Ordering::Relaxed));
        if !self.state.try_begin(id) {
            info!("A job is already running, ignoring start request");
            return None;
        }
        self.next_id.fetch_add(1, Ordering::Relaxed);

        // The previous worker has published its terminal state; reap it
        if let Some(previous) = self.worker.lock().take() {
            let _ = previous.join();
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let job = build(id, JobControl::new(Arc::clone(&cancel)));
        let state = Arc::clone(&self.state);
        let job_cancel = Arc::clone(&cancel);

        let spawned = thread::Builder::new()
            .name(format!("{}", id))
            .spawn(move || {
                let outcome = job();
                let (terminal, cause) = match outcome {
                    Ok(()) => {
                        info!("{} succeeded", id);
                        (PipelineState::Succeeded, None)
                    }
                    Err(e) if job_cancel.load(Ordering::Acquire) => {
                        if !e.is_cancellation() {
                            debug!("{} unwound with {} after cancel", id, e);
                        }
                        info!("{} cancelled", id);
                        (PipelineState::Cancelled, None)
                    }
                    Err(e) => {
                        error!("{} failed: {}", id, e);
                        (PipelineState::Failed, Some(e.to_string()))
                    }
                };
                state.finish(terminal, cause);
            });

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                *active = Some(ActiveJob { id, cancel });
                Some(id)
            }
            Err(e) => {
                error!("Failed to spawn worker for {}: {}", id, e);
                self.state
                    .finish(PipelineState::Failed, Some(format!("Failed to spawn worker: {}", e)));
                None
            }
        }
    }

    /// Ask the running job to stop; other ids are ignored
    pub fn cancel(&self, id: JobId) {
        let active = self.active.lock();
        match active.as_ref() {
            Some(job) if job.id == id && self.state.state() == PipelineState::Running => {
                info!("Cancelling {}", id);
                job.cancel.store(true, Ordering::Release);
            }
            _ => debug!("Ignoring cancel for {}: not the running job", id),
        }
    }

    /// Block until the current job reaches a terminal state
    pub fn wait(&self) -> ProgressEvent {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Job worker panicked");
                if self.state.state() == PipelineState::Running {
                    self.state
                        .finish(PipelineState::Failed, Some("Job worker panicked".to_string()));
                }
            }
        }
        self.state.snapshot()
    }

    pub fn snapshot(&self) -> ProgressEvent {
        self.state.snapshot()
    }

    /// Event stream, starting with the current snapshot
    pub fn subscribe(&self) -> Receiver<ProgressEvent> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Transcoder {
    fn drop(&mut self) {
        if let Some(job) = self.active.lock().as_ref() {
            job.cancel.store(true, Ordering::Release);
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}
