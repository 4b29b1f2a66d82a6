//! Testing utilities for the Runnel engine.
//!
//! Process definition builders, flow node behaviors and connectors for
//! tests, mocks of the engine's extension traits, assertion helpers and an
//! engine harness wired on the in-memory backend.

pub mod assertions;
pub mod builders;
pub mod harness;
pub mod implementations;
pub mod mocks;
pub mod util;

/// Re-export commonly used types for convenience
pub use mockall;

pub use builders::ProcessBuilder;
pub use harness::TestEngine;
pub use util::variables;
