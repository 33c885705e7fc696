//! Shared helpers for goesvfi-batch integration tests.
//!
//! - `TestHarness`: temp input/output/state directories and a preconfigured
//!   queue builder
//! - `Gate`: a process function that blocks until the test releases it
//! - `JobBuilder`: jobs with arbitrary lifecycle fields

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
