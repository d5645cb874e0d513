//! Deterministic, pure logic shared by the agent core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod flags;
pub mod memory;
pub mod output;
pub mod phase;
pub mod prompt_marker;
pub mod task_board;
pub mod tasks;
pub mod types;
