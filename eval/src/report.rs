use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::outcome::Outcome;
use crate::results::{EvalMeta, read_meta};

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub runs: usize,
    pub success: usize,
    pub fail: usize,
    pub error: usize,
    pub total_flags: usize,
    pub avg_duration_secs: Option<f64>,
    /// Total run time divided by total flags; `None` until a flag is found.
    pub avg_secs_per_flag: Option<f64>,
}

pub fn load_run_dirs(case_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !case_results_dir.exists() {
        return Ok(Vec::new());
    }
    let listing = fs::read_dir(case_results_dir)
        .with_context(|| format!("list {}", case_results_dir.display()))?;
    let mut dirs = listing
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .context("read results entry")?;
    dirs.retain(|path| path.is_dir());
    // Eval run ids embed a timestamp, so name order is run order.
    dirs.sort();
    Ok(dirs)
}

pub fn aggregate(case_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();
    let mut total_secs = 0.0;

    for run_dir in load_run_dirs(case_results_dir)? {
        let meta: EvalMeta = match read_meta(&run_dir.join("meta.json")) {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: meta.json invalid ({err})",
                    run_dir.display()
                ));
                continue;
            }
        };

        summary.runs += 1;
        match meta.outcome {
            Some(Outcome::Success) => summary.success += 1,
            Some(Outcome::Fail) => summary.fail += 1,
            Some(Outcome::Error) | None => summary.error += 1,
        }
        summary.total_flags += meta.flags_found;
        total_secs += meta.duration_secs;
    }

    if summary.runs > 0 {
        summary.avg_duration_secs = Some(total_secs / summary.runs as f64);
    }
    if summary.total_flags > 0 {
        summary.avg_secs_per_flag = Some(total_secs / summary.total_flags as f64);
    }
    Ok((summary, warnings))
}
