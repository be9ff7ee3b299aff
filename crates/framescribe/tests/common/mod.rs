//! Shared test utilities for framescribe integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a pipeline to a temp object store and an in-memory database
//! - `FakeBatchService` standing in for the remote batch API
//! - Fixture builders for frame images and archives

pub mod fakes;
pub mod fixtures;
pub mod harness;

pub use fakes::FakeBatchService;
pub use fixtures::*;
pub use harness::TestHarness;
