//! Mock implementations of the engine's extension traits.

pub mod extensions;

pub use extensions::*;
