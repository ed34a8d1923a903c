//! Pipeline state and progress publication
//!
//! The orchestrator is the only writer. Observers read immutable
//! [`ProgressEvent`] snapshots or subscribe to the stream of changes.

use crate::pipeline::progress::ProgressState;
use crate::pipeline::JobId;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;

/// Lifecycle of the orchestrator's current job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PipelineState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One entry of the event stream
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ProgressEvent {
    pub job_id: Option<JobId>,
    pub state: PipelineState,
    pub fraction: f64,
    pub frames_processed: u64,
    pub frames_estimated: u64,

    /// Cause of a Failed job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    fn with_progress(&self, progress: ProgressState) -> Self {
        Self {
            fraction: progress.fraction,
            frames_processed: progress.frames_processed,
            frames_estimated: progress.frames_estimated,
            ..self.clone()
        }
    }
}

/// Owner of the current [`ProgressEvent`], publishing on every change
#[derive(Debug, Default)]
pub struct PipelineStateManager {
    current: RwLock<ProgressEvent>,
    subscribers: Mutex<Vec<Sender<ProgressEvent>>>,
}

impl PipelineStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressEvent {
        self.current.read().clone()
    }

    pub fn state(&self) -> PipelineState {
        self.current.read().state
    }

    /// Receive every event from now on, starting with the current snapshot
    pub fn subscribe(&self) -> Receiver<ProgressEvent> {
        let (tx, rx) = unbounded();
        let current = self.current.read();
        let _ = tx.send(current.clone());
        self.subscribers.lock().push(tx);
        rx
    }

    /// Enter Running for `job_id` unless a job is already running
    pub fn try_begin(&self, job_id: JobId) -> bool {
        let mut current = self.current.write();
        if current.state == PipelineState::Running {
            return false;
        }

        *current = ProgressEvent {
            job_id: Some(job_id),
            state: PipelineState::Running,
            ..ProgressEvent::default()
        };
        self.publish(&current);
        true
    }

    /// Publish new progress numbers for the running job
    pub fn update_progress(&self, progress: ProgressState) {
        let mut current = self.current.write();
        if current.state != PipelineState::Running {
            return;
        }

        let next = current.with_progress(progress);
        if next != *current {
            *current = next;
            self.publish(&current);
        }
    }

    /// Enter a terminal state, forcing progress to completion
    pub fn finish(&self, state: PipelineState, error: Option<String>) {
        let mut current = self.current.write();
        let done = ProgressState::finished(current.frames_estimated);
        *current = ProgressEvent {
            state,
            error,
            ..current.with_progress(done)
        };
        debug!("Job {:?} reached {}", current.job_id, state);
        self.publish(&current);
    }

    // Called with the write lock held so subscribers see events in order
    fn publish(&self, event: &ProgressEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
