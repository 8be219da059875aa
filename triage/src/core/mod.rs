//! Deterministic, pure logic shared by the resolution loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod error;
pub mod parser;
pub mod schema;
pub mod snapshot;
pub mod types;
