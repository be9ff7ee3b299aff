//! Reading uploaded frame archives and writing the filtered image archive.

pub mod extract;
pub mod filtered;

pub use extract::{for_each_in_batch, plan_batches, scan, PlannedEntry};
pub use filtered::FilteredArchiveWriter;
