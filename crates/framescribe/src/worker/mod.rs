pub mod job;
pub mod pool;

pub use job::JobOutcome;
pub use pool::WorkerPool;

// Re-export crossbeam_channel for use in main
pub use crossbeam_channel;
