//! Adapters implementing the engine's port traits.
//!
//! Production deployments wire real backends here; the in-memory adapters
//! back the test suites and the demo binary.

pub mod memory;
