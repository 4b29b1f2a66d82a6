//! Builders for process definitions used in tests.

pub mod messages;
pub mod process;

pub use messages::{catch, correlation, throw};
pub use process::ProcessBuilder;
