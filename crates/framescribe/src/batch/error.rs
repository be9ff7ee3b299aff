use thiserror::Error;

/// Errors talking to, or reported by, the batch completion service.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Batch API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected batch API response: {0}")]
    InvalidResponse(String),

    #[error("Batch {batch_id} ended with status '{status}'")]
    Terminal { batch_id: String, status: String },

    #[error("Batch {batch_id} completed without an output file")]
    MissingOutput { batch_id: String },

    #[error("Batch {batch_id} still not complete after {attempts} polls")]
    PollBudgetExhausted { batch_id: String, attempts: u32 },

    #[error("Batch output line for {custom_id} failed: {message}")]
    LineFailed { custom_id: String, message: String },

    #[error("Failed to build manifest: {0}")]
    Manifest(String),
}
