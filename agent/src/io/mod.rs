//! Side-effecting helpers: config, oracles, remote shell, prompts, and run files.

pub mod config;
pub mod iteration_log;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod remote;
pub mod report;
pub mod retrieval;
pub mod run_dir;
pub mod run_state;
pub mod task_reference;
