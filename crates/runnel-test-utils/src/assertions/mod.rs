//! Assertion utilities for process instances, flow nodes and failures.
//!
//! Assertions return a `Result` so tests can `unwrap` them and get a
//! readable message.

pub mod failures;
pub mod process_state;

pub use failures::*;
pub use process_state::*;
