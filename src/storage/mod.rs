//! Storage management module
//!
//! This module provides cleanup of runtime volumes owned by a test run.

pub mod volume;

pub use volume::{remove_labeled_volumes, VolumeCleanup};
