//! Autonomous penetration-test agent loop.
//!
//! The agent drives a remote shell towards capturing flags: each iteration a
//! planner oracle picks one command, the command runs over SSH, and a
//! summarizer oracle folds its output into a running summary. The architecture
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (phases, task board, flags,
//!   budgets, prompt detection). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (SSH, oracles, prompt rendering,
//!   run artifacts). Isolated behind traits to enable scripting in tests.
//! - **[`agents`]**: Planner and summarizer roles built on an oracle.
//!
//! Orchestration modules ([`step`], [`looping`]) coordinate the three to
//! implement `agent run`.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
