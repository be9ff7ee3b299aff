use crate::job::{Job, JobStatus};
use crate::pipeline::PipelineError;

/// What happened to a job handed to the worker pool.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub success: bool,
    /// Status after the run, when the job row could be read back.
    pub status: Option<JobStatus>,
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn from_run(job_id: &str, result: &Result<Job, PipelineError>) -> Self {
        match result {
            Ok(job) => Self {
                job_id: job_id.to_string(),
                success: job.status == JobStatus::Done,
                status: Some(job.status),
                error: None,
            },
            Err(e) => Self {
                job_id: job_id.to_string(),
                success: false,
                status: e.is_recorded().then_some(JobStatus::Error),
                error: Some(e.to_string()),
            },
        }
    }

    /// The run was abandoned because the pool shut down. The job keeps its
    /// last persisted state and resumes on the next start.
    pub fn interrupted(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            success: false,
            status: Some(JobStatus::Processing),
            error: Some("interrupted by shutdown".to_string()),
        }
    }
}
