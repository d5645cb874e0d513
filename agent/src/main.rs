//! Autonomous penetration-test agent.
//!
//! `agent init` writes a starter `agent.toml`; `agent run` opens an SSH
//! session on the attacker host and loops plan → execute → summarize until a
//! flag is captured or a budget runs out. Every run is recorded under
//! `<run_dir>/runs/<run_id>/`.

use std::fs;
use std::path::{Path, PathBuf};

use agent::exit_codes;
use agent::io::config::{AgentConfig, DEFAULT_CONFIG_FILE, load_config, write_config};
use agent::io::oracle::build_oracle;
use agent::io::remote::{ConnectionError, SshSession};
use agent::io::report::load_report;
use agent::io::retrieval::{KeywordIndex, Retriever};
use agent::io::run_dir::{RunPaths, load_memory};
use agent::io::task_reference::{
    DEFAULT_TASK_REFERENCE, DEFAULT_TASK_REFERENCE_FILE, load_task_reference,
};
use agent::logging;
use agent::looping::run_loop;
use agent::step::{Agent, AgentParts, StepOutcome, StepStatus};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

/// Output lines echoed per iteration; the full output is in `iterations/<n>/output.log`.
const OUTPUT_PREVIEW_LINES: usize = 20;

#[derive(Parser)]
#[command(
    name = "agent",
    version,
    about = "Autonomous penetration-test agent loop"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config and task reference if missing.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
    /// Start a new run and loop until a terminal state.
    Run {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Override `loop.max_iterations`.
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Print the memory log of a past run.
    History {
        run_id: String,
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

fn main() {
    logging::init("warn");
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            if let Some(conn) = err.downcast_ref::<ConnectionError>() {
                eprintln!("connection: {conn}");
            }
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force).map(|()| exit_codes::OK),
        Command::Run {
            config,
            max_iterations,
        } => cmd_run(&config, max_iterations),
        Command::History { run_id, config } => {
            cmd_history(&config, &run_id).map(|()| exit_codes::OK)
        }
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    let reference_path = config_dir(config_path).join(DEFAULT_TASK_REFERENCE_FILE);

    if force || !config_path.exists() {
        let mut config = AgentConfig::default();
        config.knowledge.task_reference = Some(PathBuf::from(DEFAULT_TASK_REFERENCE_FILE));
        write_config(config_path, &config)?;
        println!("init: wrote {}", config_path.display());
    }
    if force || !reference_path.exists() {
        fs::write(&reference_path, DEFAULT_TASK_REFERENCE)
            .with_context(|| format!("write {}", reference_path.display()))?;
        println!("init: wrote {}", reference_path.display());
    }
    Ok(())
}

fn cmd_run(config_path: &Path, max_iterations: Option<u32>) -> Result<i32> {
    let mut config = load_config(config_path)?;
    if let Some(max) = max_iterations {
        config.looping.max_iterations = max;
    }
    let dir = config_dir(config_path);

    let reference_path = config
        .knowledge
        .task_reference
        .as_deref()
        .map(|path| config.resolve(&dir, path));
    let reference = load_task_reference(reference_path.as_deref())?;
    let retriever = match config.knowledge.command_corpus.as_deref() {
        Some(path) => {
            let path = config.resolve(&dir, path);
            let index = KeywordIndex::load(&path, config.knowledge.hints_k)?;
            debug!(entries = index.len(), path = %path.display(), "loaded command corpus");
            Some(Box::new(index) as Box<dyn Retriever>)
        }
        None => None,
    };
    let planner = build_oracle(&config.oracle.planner).context("build planner oracle")?;
    let summarizer = build_oracle(&config.oracle.summarizer).context("build summarizer oracle")?;
    let shell = SshSession::new(config.attacker.clone(), &config.remote);

    let mut agent = Agent::start(AgentParts {
        config,
        planner,
        summarizer,
        shell,
        reference,
        retriever,
    })?;
    println!(
        "run: run_id={} dir={}",
        agent.run_id(),
        agent.paths().dir.display()
    );

    let outcome = run_loop(&mut agent, print_step)?;
    println!(
        "result: run_id={} terminal_state={} stop={} iterations={} flags={}",
        outcome.run_id,
        outcome.terminal_state,
        outcome.stop,
        outcome.report.iterations,
        outcome.report.flags.join(",")
    );
    Ok(exit_codes::for_terminal_state(outcome.terminal_state))
}

fn print_step(step: &StepOutcome) {
    let status = match &step.status {
        StepStatus::Bootstrap => "bootstrap".to_string(),
        StepStatus::Completed => "completed".to_string(),
        StepStatus::NoProgress => "no_progress".to_string(),
        StepStatus::Failed { stage, reason } => format!("{stage}_failed ({reason})"),
    };
    println!(
        "iteration {}: phase={} status={}",
        step.iteration, step.phase, status
    );
    if let Some(record) = &step.record {
        println!("  command: {}", record.command);
        for line in record.output.lines().take(OUTPUT_PREVIEW_LINES) {
            println!("  | {line}");
        }
        if let Some(error) = &record.error {
            println!("  error: {error}");
        }
        println!("  summary: {}", record.summary);
    }
    for flag in &step.new_flags {
        println!("iteration {}: flag {}", step.iteration, flag);
    }
    if let Some(next) = step.phase_change {
        println!("iteration {}: phase -> {}", step.iteration, next);
    }
}

fn cmd_history(config_path: &Path, run_id: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let paths = RunPaths::new(&config.run_dir, run_id);
    let memory = load_memory(&paths.memory_path)?;
    for step in memory.steps() {
        println!("#{} [{}] {}", step.iteration, step.phase, step.command);
        if let Some(error) = &step.error {
            println!("  error: {error}");
        }
        println!("  {}", step.summary);
    }
    if paths.report_path.exists() {
        let report = load_report(&paths.report_path)?;
        println!(
            "{}: {} after {} iterations",
            report.run_id, report.terminal_state, report.iterations
        );
    }
    Ok(())
}

fn config_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["agent", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false, .. }));
    }

    #[test]
    fn parse_run_with_override() {
        let cli = Cli::parse_from(["agent", "run", "--max-iterations", "5"]);
        match cli.command {
            Command::Run {
                config,
                max_iterations,
            } => {
                assert_eq!(config, Path::new(DEFAULT_CONFIG_FILE));
                assert_eq!(max_iterations, Some(5));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn init_writes_config_and_reference() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("agent.toml");

        cmd_init(&config_path, false).expect("init");

        let config = load_config(&config_path).expect("load");
        assert_eq!(
            config.knowledge.task_reference.as_deref(),
            Some(Path::new(DEFAULT_TASK_REFERENCE_FILE))
        );
        let reference = config.resolve(temp.path(), Path::new(DEFAULT_TASK_REFERENCE_FILE));
        assert!(load_task_reference(Some(&reference)).is_ok());
    }

    #[test]
    fn config_dir_of_bare_file_is_cwd() {
        assert_eq!(config_dir(Path::new("agent.toml")), PathBuf::from("."));
        assert_eq!(config_dir(Path::new("conf/agent.toml")), PathBuf::from("conf"));
    }
}
