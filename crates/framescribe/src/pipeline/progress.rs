use std::sync::Mutex;

use tracing::info;

use crate::job::{JobProgress, JobStep};

/// Events emitted while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A step is starting.
    Step { job_id: String, step: JobStep },
    /// Persisted state changed.
    Progress(JobProgress),
    Completed { job_id: String },
    Failed { job_id: String, error: String },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Writes events to the tracing subscriber.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Step { job_id, step } => {
                info!(job_id = %job_id, step = %step, "Entering step");
            }
            ProgressEvent::Progress(p) => {
                info!(
                    job_id = %p.job_id,
                    step = %p.step,
                    percent = p.percent,
                    processed = p.processed_images,
                    total = p.total_images,
                    "Progress"
                );
            }
            ProgressEvent::Completed { job_id } => info!(job_id = %job_id, "Job completed"),
            ProgressEvent::Failed { job_id, error } => {
                info!(job_id = %job_id, error = %error, "Job failed")
            }
        }
    }
}

/// Keeps every event in memory, for inspection in tests and tooling.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
