//! R-tree integration test module.
//!
//! These tests drive the public tree API end to end: files on disk,
//! reopening, random workloads and generated inputs.

mod lifecycle_test;
mod persistence_test;
mod property_test;
