//! Per-iteration audit artifacts under `<run>/iterations/<n>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::phase::Phase;

/// How an iteration ended, as recorded in `meta.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Bootstrap,
    Completed,
    ConnectFailed,
    PlanFailed,
    ExecuteFailed,
    SummarizeFailed,
    NoProgress,
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub iteration: u32,
    pub phase: Phase,
    pub status: IterationStatus,
    pub command: Option<String>,
    pub input_sent: bool,
    pub exit_status: Option<i32>,
    pub timed_out: bool,
    /// Task the planner was nudged towards, when planning fell back.
    pub fallback_task: Option<String>,
    pub new_flags: Vec<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub planner_prompt_path: PathBuf,
    pub summarizer_prompt_path: PathBuf,
    pub output_path: PathBuf,
}

impl IterationPaths {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            meta_path: dir.join("meta.json"),
            planner_prompt_path: dir.join("planner_prompt.md"),
            summarizer_prompt_path: dir.join("summarizer_prompt.md"),
            output_path: dir.join("output.log"),
            dir,
        }
    }
}

pub struct IterationWriteRequest<'a> {
    pub dir: PathBuf,
    pub meta: &'a IterationMeta,
    pub planner_prompt: Option<&'a str>,
    pub summarizer_prompt: Option<&'a str>,
    pub output: Option<&'a str>,
}

pub fn write_iteration(request: IterationWriteRequest<'_>) -> Result<IterationPaths> {
    let paths = IterationPaths::new(request.dir);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    // Write in deterministic order to keep logs stable.
    write_json(&paths.meta_path, request.meta)?;
    if let Some(prompt) = request.planner_prompt {
        write_text(&paths.planner_prompt_path, prompt)?;
    }
    if let Some(prompt) = request.summarizer_prompt {
        write_text(&paths.summarizer_prompt_path, prompt)?;
    }
    if let Some(output) = request.output {
        write_text(&paths.output_path, output)?;
    }

    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
