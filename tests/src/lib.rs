//! Runnel end-to-end scenarios.
//!
//! The scenarios live under `integration/`, one test target per area. This
//! library holds the process definitions they deploy.

pub mod fixtures;
