//! Building and invoking the `agent` binary.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

pub fn build_agent_binary(repo_root: &Path) -> Result<PathBuf> {
    let output = Command::new("cargo")
        .arg("build")
        .arg("-p")
        .arg("agent")
        .current_dir(repo_root)
        .output()
        .context("build agent binary")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("agent build failed: {}", stderr.trim());
    }
    Ok(agent_binary_path(repo_root))
}

pub fn agent_binary_path(repo_root: &Path) -> PathBuf {
    let binary = format!("agent{}", std::env::consts::EXE_SUFFIX);
    repo_root.join("target").join("debug").join(binary)
}

/// How `agent run` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentExit {
    /// `None` when killed by a signal or the timeout.
    pub code: Option<i32>,
    pub timed_out: bool,
}

/// Run `agent run --config <config>` in `workspace_root`, logging
/// stdout and stderr to `<logs_dir>/agent.run.log`.
pub fn run_agent(
    agent_path: &Path,
    workspace_root: &Path,
    config_path: &Path,
    logs_dir: &Path,
    env_overrides: &BTreeMap<String, String>,
    timeout: Option<Duration>,
) -> Result<AgentExit> {
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("create logs dir {}", logs_dir.display()))?;
    let log_path = logs_dir.join("agent.run.log");
    let log = File::create(&log_path).with_context(|| format!("create {}", log_path.display()))?;
    let log_err = log.try_clone().context("clone log handle")?;

    let mut command = Command::new(agent_path);
    command
        .arg("run")
        .arg("--config")
        .arg(config_path)
        .current_dir(workspace_root)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    for (key, value) in env_overrides {
        command.env(key, value);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("spawn {}", agent_path.display()))?;
    debug!(pid = child.id(), "agent started");

    let status = match timeout {
        Some(limit) => match child.wait_timeout(limit).context("wait for agent")? {
            Some(status) => status,
            None => {
                warn!(secs = limit.as_secs(), "agent run timed out, killing");
                child.kill().ok();
                child.wait().context("wait after kill")?;
                return Ok(AgentExit {
                    code: None,
                    timed_out: true,
                });
            }
        },
        None => child.wait().context("wait for agent")?,
    };
    Ok(exit_of(status))
}

fn exit_of(status: ExitStatus) -> AgentExit {
    AgentExit {
        code: status.code(),
        timed_out: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_binary_path_is_deterministic() {
        let root = Path::new("/repo/root");
        let path = agent_binary_path(root);
        let expected = format!(
            "/repo/root/target/debug/agent{}",
            std::env::consts::EXE_SUFFIX
        );
        assert_eq!(path, PathBuf::from(expected));
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");

        let exit = run_agent(
            Path::new("echo"),
            temp.path(),
            Path::new("agent.toml"),
            &temp.path().join("logs"),
            &BTreeMap::new(),
            Some(Duration::from_secs(10)),
        )
        .expect("run");

        assert_eq!(
            exit,
            AgentExit {
                code: Some(0),
                timed_out: false
            }
        );
        let log = fs::read_to_string(temp.path().join("logs/agent.run.log")).expect("log");
        assert_eq!(log.trim(), "run --config agent.toml");
    }
}
