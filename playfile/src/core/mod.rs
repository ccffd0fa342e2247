//! Deterministic, pure logic shared by the orchestration layer.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod artifacts;
pub mod duration;
pub mod feedback;
pub mod invariants;
pub mod template;
pub mod types;
