//! Job domain model and progress reporting.

pub mod model;
pub mod progress;

pub use model::{Job, JobKind, JobStatus, JobStep, ParseEnumError};
pub use progress::JobProgress;
