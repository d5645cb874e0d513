//! Agent configuration stored in `agent.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::LoopLimits;
use crate::core::phase::PhasePolicy;
use crate::core::types::Credentials;

pub const DEFAULT_CONFIG_FILE: &str = "agent.toml";

/// Agent configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to the defaults
/// below; [`AgentConfig::validate`] runs on every load and write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory holding run artifacts (`<run_dir>/runs/<run_id>/`).
    pub run_dir: PathBuf,

    /// SSH endpoint the agent drives commands on.
    pub attacker: SshEndpoint,

    /// Credentials of the machine under assessment, embedded in prompts.
    pub target: Credentials,

    #[serde(rename = "loop")]
    pub looping: LoopConfig,

    pub remote: RemoteConfig,

    pub prompt: PromptConfig,

    pub oracle: OracleSettings,

    pub knowledge: KnowledgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for SshEndpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 22,
            username: "root".to_string(),
            password: String::new(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            host: "192.168.122.12".to_string(),
            username: "root".to_string(),
            password: "ubuntu".to_string(),
        }
    }
}

/// How to answer an interactive prompt detected during a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPolicy {
    /// Only the planner-supplied input is ever sent.
    Planner,
    /// Fall back to the target password when the planner gave no input.
    #[default]
    PlannerOrTargetPassword,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub max_consecutive_failures: u32,
    /// Tries per oracle-backed step before the iteration counts as failed.
    pub step_attempts: u32,
    pub flags_required: usize,
    pub phase_policy: PhasePolicy,
    pub dedup_tasks: bool,
    pub input_policy: InputPolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            max_consecutive_failures: 3,
            step_attempts: 2,
            flags_required: 1,
            phase_policy: PhasePolicy::GoalDriven,
            dedup_tasks: true,
            input_policy: InputPolicy::PlannerOrTargetPassword,
        }
    }
}

impl LoopConfig {
    pub fn limits(&self) -> LoopLimits {
        LoopLimits {
            max_iterations: self.max_iterations,
            max_consecutive_failures: self.max_consecutive_failures,
            flags_required: self.flags_required,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    pub command_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub connect_timeout_secs: u64,
    pub connect_attempts: u32,
    pub connect_retry_delay_ms: u64,
    /// Case-insensitive substrings that mark an interactive prompt.
    pub prompt_markers: Vec<String>,
    /// Bytes kept per stream of one command; the rest is counted and dropped.
    pub output_limit_bytes: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 30,
            poll_interval_ms: 100,
            connect_timeout_secs: 10,
            connect_attempts: 3,
            connect_retry_delay_ms: 2000,
            prompt_markers: vec!["password".to_string(), "[sudo]".to_string()],
            output_limit_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Maximum bytes of a rendered user prompt before dropping sections.
    pub budget_bytes: usize,
    /// Output lines shown to the summarizer.
    pub summary_output_lines: usize,
    /// Output lines of the latest step shown to the planner.
    pub planner_output_lines: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 24_000,
            summary_output_lines: 40,
            planner_output_lines: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleSettings {
    pub planner: OracleConfig,
    pub summarizer: OracleConfig,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            planner: OracleConfig::Http(HttpOracleConfig::default()),
            summarizer: OracleConfig::Http(HttpOracleConfig {
                model: "gpt-4o-mini".to_string(),
                max_tokens: 300,
                ..HttpOracleConfig::default()
            }),
        }
    }
}

/// Oracle backend, selected by the `backend` key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum OracleConfig {
    Http(HttpOracleConfig),
    Command(CommandOracleConfig),
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpOracleConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the bearer key. Empty means no auth header.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for HttpOracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4.1-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            max_tokens: 512,
            timeout_secs: 60,
        }
    }
}

/// External CLI fed the prompt on stdin; stdout is the reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandOracleConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for CommandOracleConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            timeout_secs: 120,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Phase → suggested tasks JSON. The embedded table is used when unset.
    pub task_reference: Option<PathBuf>,
    /// Category → commands JSON used for planner hints. No hints when unset.
    pub command_corpus: Option<PathBuf>,
    pub hints_k: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            task_reference: None,
            command_corpus: None,
            hints_k: 3,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from(".agent"),
            attacker: SshEndpoint::default(),
            target: Credentials::default(),
            looping: LoopConfig::default(),
            remote: RemoteConfig::default(),
            prompt: PromptConfig::default(),
            oracle: OracleSettings::default(),
            knowledge: KnowledgeConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.run_dir.as_os_str().is_empty() {
            return Err(anyhow!("run_dir must be non-empty"));
        }
        if self.attacker.host.trim().is_empty() {
            return Err(anyhow!("attacker.host must be non-empty"));
        }
        if self.attacker.port == 0 {
            return Err(anyhow!("attacker.port must be > 0"));
        }
        if self.attacker.username.trim().is_empty() {
            return Err(anyhow!("attacker.username must be non-empty"));
        }
        if self.target.host.trim().is_empty() {
            return Err(anyhow!("target.host must be non-empty"));
        }
        if self.looping.max_iterations == 0 {
            return Err(anyhow!("loop.max_iterations must be > 0"));
        }
        if self.looping.max_consecutive_failures == 0 {
            return Err(anyhow!("loop.max_consecutive_failures must be > 0"));
        }
        if self.looping.step_attempts == 0 {
            return Err(anyhow!("loop.step_attempts must be > 0"));
        }
        if self.looping.flags_required == 0 {
            return Err(anyhow!("loop.flags_required must be > 0"));
        }
        if self.remote.command_timeout_secs == 0 {
            return Err(anyhow!("remote.command_timeout_secs must be > 0"));
        }
        if self.remote.poll_interval_ms == 0 {
            return Err(anyhow!("remote.poll_interval_ms must be > 0"));
        }
        if self.remote.connect_attempts == 0 {
            return Err(anyhow!("remote.connect_attempts must be > 0"));
        }
        if self.remote.output_limit_bytes == 0 {
            return Err(anyhow!("remote.output_limit_bytes must be > 0"));
        }
        if self.remote.prompt_markers.is_empty() {
            return Err(anyhow!("remote.prompt_markers must not be empty"));
        }
        if self.remote.prompt_markers.iter().any(|m| m.trim().is_empty()) {
            return Err(anyhow!("remote.prompt_markers entries must be non-blank"));
        }
        if self.prompt.budget_bytes == 0 {
            return Err(anyhow!("prompt.budget_bytes must be > 0"));
        }
        if self.prompt.summary_output_lines == 0 || self.prompt.planner_output_lines == 0 {
            return Err(anyhow!("prompt output line bounds must be > 0"));
        }
        validate_oracle("oracle.planner", &self.oracle.planner)?;
        validate_oracle("oracle.summarizer", &self.oracle.summarizer)?;
        Ok(())
    }

    /// Resolve a knowledge path relative to the config file's directory.
    pub fn resolve(&self, config_dir: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            config_dir.join(path)
        }
    }
}

fn validate_oracle(name: &str, oracle: &OracleConfig) -> Result<()> {
    match oracle {
        OracleConfig::Http(http) => {
            if http.base_url.trim().is_empty() {
                return Err(anyhow!("{name}.base_url must be non-empty"));
            }
            if http.model.trim().is_empty() {
                return Err(anyhow!("{name}.model must be non-empty"));
            }
            if http.timeout_secs == 0 {
                return Err(anyhow!("{name}.timeout_secs must be > 0"));
            }
        }
        OracleConfig::Command(cmd) => {
            if cmd.command.is_empty() || cmd.command[0].trim().is_empty() {
                return Err(anyhow!("{name}.command must be a non-empty array"));
            }
            if cmd.timeout_secs == 0 {
                return Err(anyhow!("{name}.timeout_secs must be > 0"));
            }
            if cmd.output_limit_bytes == 0 {
                return Err(anyhow!("{name}.output_limit_bytes must be > 0"));
            }
        }
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
