//! Workspace creation for eval runs.
//!
//! Each eval run gets its own directory holding the generated `agent.toml`
//! and the agent's run directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};

/// An isolated workspace for running a case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Absolute path to the workspace root.
    pub root: PathBuf,
    /// Workspace directory name (includes case id, timestamp, and random suffix).
    pub name: String,
    pub config_path: PathBuf,
    /// Agent `run_dir`; runs land in `<run_dir>/runs/<run_id>/`.
    pub run_dir: PathBuf,
}

impl Workspace {
    /// The single agent run recorded in this workspace, if any.
    pub fn agent_run(&self) -> Result<Option<(String, PathBuf)>> {
        let runs = self.run_dir.join("runs");
        if !runs.exists() {
            return Ok(None);
        }
        let mut found = Vec::new();
        for entry in fs::read_dir(&runs).with_context(|| format!("read {}", runs.display()))? {
            let entry = entry.context("read entry")?;
            if entry.path().is_dir() {
                found.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
            }
        }
        found.sort();
        Ok(found.pop())
    }
}

/// Create an isolated workspace for running a case.
pub fn create_workspace(base_dir: &Path, case_id: &str) -> Result<Workspace> {
    fs::create_dir_all(base_dir)
        .with_context(|| format!("create workspace dir {}", base_dir.display()))?;

    let timestamp = generate_timestamp();
    let short_id = generate_short_id();
    let name = build_workspace_name(case_id, &timestamp, &short_id);
    let root = base_dir.join(&name);
    fs::create_dir_all(&root)
        .with_context(|| format!("create workspace root {}", root.display()))?;

    let seed = format!("case_id: {case_id}\ncreated_at: {timestamp}\n");
    fs::write(root.join("README.txt"), seed)
        .with_context(|| format!("write seed {}", root.display()))?;

    Ok(Workspace {
        config_path: root.join("agent.toml"),
        run_dir: root.join(".agent"),
        root,
        name,
    })
}

pub fn build_workspace_name(case_id: &str, timestamp: &str, short_id: &str) -> String {
    format!("{case_id}_{timestamp}_{short_id}")
}

fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}
