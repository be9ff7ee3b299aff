use thiserror::Error;

use crate::batch::BatchError;
use crate::db::DatabaseError;
use crate::error::{ProcessError, StorageError};
use crate::job::JobStep;
use crate::reconcile::ReconcileError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The job cannot proceed with the inputs or state it has.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Data that must line up by construction does not.
    #[error("Consistency check failed: {0}")]
    Consistency(String),

    #[error("Batch service error: {0}")]
    Batch(#[from] BatchError),

    #[error("Result reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Processing failed: {0}")]
    Processing(#[from] ProcessError),

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Database failed: {0}")]
    Database(#[from] DatabaseError),

    /// The failure has already been written to the job row.
    #[error("Job {job_id} failed at {step}: {source}")]
    Recorded {
        job_id: String,
        step: JobStep,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn is_recorded(&self) -> bool {
        matches!(self, PipelineError::Recorded { .. })
    }

    /// The underlying failure, looking through [`PipelineError::Recorded`].
    pub fn cause(&self) -> &PipelineError {
        match self {
            PipelineError::Recorded { source, .. } => source.cause(),
            other => other,
        }
    }
}
