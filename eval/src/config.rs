//! Agent configuration for a case.
//!
//! Applies case-specific overrides to a base agent configuration.

use std::path::Path;

use agent::io::config::AgentConfig;
use anyhow::Result;

use crate::case::CaseFile;

/// Apply the case's target, attacker, and loop overrides to `base`.
///
/// Runs are recorded under `run_dir` so each eval run owns its artifacts.
pub fn apply_case_config(mut base: AgentConfig, case: &CaseFile, run_dir: &Path) -> Result<AgentConfig> {
    base.run_dir = run_dir.to_path_buf();
    base.target = case.target.clone();
    if let Some(attacker) = &case.attacker {
        base.attacker = attacker.clone();
    }
    base.looping.flags_required = case.expect.flags;
    if let Some(max_iterations) = case.config.max_iterations {
        base.looping.max_iterations = max_iterations;
    }
    if let Some(max_failures) = case.config.max_consecutive_failures {
        base.looping.max_consecutive_failures = max_failures;
    }
    if let Some(policy) = case.config.phase_policy {
        base.looping.phase_policy = policy;
    }
    base.validate()?;
    Ok(base)
}
