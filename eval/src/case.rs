//! Case file parsing and validation.
//!
//! Cases are TOML files naming a target machine and how many flags a run is
//! expected to capture. See `eval/cases/` for examples.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use agent::core::phase::PhasePolicy;
use agent::core::types::Credentials;
use agent::io::config::SshEndpoint;
use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

/// A parsed case file: target, optional attacker override, loop overrides.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CaseFile {
    pub case: CaseMeta,
    pub target: Credentials,
    /// SSH endpoint of the attacker host; the agent default when absent.
    pub attacker: Option<SshEndpoint>,
    #[serde(default)]
    pub config: CaseConfig,
    #[serde(default)]
    pub expect: Expectation,
    /// Extra environment for the agent process (e.g. API keys).
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    #[serde(default)]
    pub description: String,
}

/// Agent configuration overrides for the case.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CaseConfig {
    pub max_iterations: Option<u32>,
    pub max_consecutive_failures: Option<u32>,
    pub phase_policy: Option<PhasePolicy>,
    /// Wall-clock limit for one agent run; the process is killed past it.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Expectation {
    /// Flags a successful run must capture.
    pub flags: usize,
}

impl Default for Expectation {
    fn default() -> Self {
        Self { flags: 1 }
    }
}

impl CaseFile {
    /// Load and validate a case file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        let case: CaseFile =
            toml::from_str(&contents).with_context(|| format!("parse case {}", path.display()))?;
        case.validate()
            .with_context(|| format!("validate case {}", path.display()))?;
        Ok(case)
    }

    #[cfg(test)]
    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.target.host.trim().is_empty() {
            bail!("target.host must be non-empty");
        }
        if let Some(attacker) = &self.attacker {
            if attacker.host.trim().is_empty() {
                bail!("attacker.host must be non-empty");
            }
            if attacker.port == 0 {
                bail!("attacker.port must be > 0");
            }
        }
        if let Some(max_iterations) = self.config.max_iterations
            && max_iterations == 0
        {
            bail!("config.max_iterations must be > 0");
        }
        if let Some(max_failures) = self.config.max_consecutive_failures
            && max_failures == 0
        {
            bail!("config.max_consecutive_failures must be > 0");
        }
        if let Some(timeout) = self.config.timeout_secs
            && timeout == 0
        {
            bail!("config.timeout_secs must be > 0");
        }
        if self.expect.flags == 0 {
            bail!("expect.flags must be > 0");
        }
        for (key, value) in &self.env {
            if key.trim().is_empty() {
                bail!("env key must be non-empty");
            }
            if value.is_empty() {
                bail!("env {} must be non-empty", key);
            }
        }
        Ok(())
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    let mut by_id = BTreeMap::new();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))?;
    for entry in entries {
        let path = entry.context("read case entry")?.path();
        if path.extension().is_none_or(|ext| ext != "toml") {
            continue;
        }
        let case = CaseFile::load(&path)?;
        let id = case.case.id.clone();
        if by_id.insert(id.clone(), case).is_some() {
            return Err(anyhow!("duplicate case.id {id}"));
        }
    }
    Ok(by_id.into_values().collect())
}

// Ids become directory names under workspaces/ and results/.
fn validate_case_id(id: &str) -> Result<()> {
    let slug_char = |ch: char| matches!(ch, 'a'..='z' | '0'..='9' | '-' | '_');
    if id.is_empty() {
        bail!("case.id must be non-empty");
    }
    if let Some(bad) = id.chars().find(|&ch| !slug_char(ch)) {
        bail!("case.id must use [a-z0-9_-] only, found {bad:?}");
    }
    Ok(())
}
