//! Test implementations (fakes) of the engine's extension traits.
//!
//! Unlike the mocks these keep state across calls, so a test can look at
//! what the engine did once the process ran.

pub mod behaviors;
pub mod connectors;

pub use behaviors::*;
pub use connectors::*;
