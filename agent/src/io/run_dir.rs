//! Layout of `<run_dir>/runs/<run_id>/` and the memory log stored there.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::memory::MemoryLog;
use crate::io::config::write_atomic;

const MAX_ID_SUFFIX: u32 = 100;

/// `run-YYYYMMDD_HHMMSS` for the given instant.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    format!("run-{}", now.format("%Y%m%d_%H%M%S"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub memory_path: PathBuf,
    pub state_path: PathBuf,
    pub report_path: PathBuf,
    pub iterations_dir: PathBuf,
}

impl RunPaths {
    pub fn new(run_dir: &Path, run_id: &str) -> Self {
        let dir = run_dir.join("runs").join(run_id);
        Self {
            memory_path: dir.join("memory.json"),
            state_path: dir.join("run_state.json"),
            report_path: dir.join("report.json"),
            iterations_dir: dir.join("iterations"),
            dir,
        }
    }

    pub fn iteration_dir(&self, iteration: u32) -> PathBuf {
        self.iterations_dir.join(iteration.to_string())
    }
}

/// Create a fresh run directory and return its id and paths.
///
/// Two runs started within the same second get `-2`, `-3`, ... suffixes.
pub fn create_run(run_dir: &Path, now: DateTime<Utc>) -> Result<(String, RunPaths)> {
    let runs_root = run_dir.join("runs");
    fs::create_dir_all(&runs_root)
        .with_context(|| format!("create runs dir {}", runs_root.display()))?;

    let base = new_run_id(now);
    for attempt in 1..=MAX_ID_SUFFIX {
        let run_id = if attempt == 1 {
            base.clone()
        } else {
            format!("{base}-{attempt}")
        };
        let paths = RunPaths::new(run_dir, &run_id);
        match fs::create_dir(&paths.dir) {
            Ok(()) => {
                fs::create_dir_all(&paths.iterations_dir).with_context(|| {
                    format!("create iterations dir {}", paths.iterations_dir.display())
                })?;
                debug!(run_id = %run_id, dir = %paths.dir.display(), "created run dir");
                return Ok((run_id, paths));
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("create run dir {}", paths.dir.display()));
            }
        }
    }
    Err(anyhow!("too many runs named {base} in {}", runs_root.display()))
}

/// Load the memory log of a run.
pub fn load_memory(path: &Path) -> Result<MemoryLog> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read memory {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse memory {}", path.display()))
}

/// Rewrite the whole memory log atomically (temp file + rename).
pub fn write_memory(path: &Path, memory: &MemoryLog) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(memory).context("serialize memory")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
