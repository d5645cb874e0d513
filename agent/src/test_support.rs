//! Scripted collaborators for tests: oracles, remote shells, and PTY channels.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;

use crate::core::types::CommandResult;
use crate::io::config::{AgentConfig, SshEndpoint};
use crate::io::oracle::{Oracle, OracleError};
use crate::io::remote::{ConnectionError, ExecutionError, PtyChannel, RemoteShell};

/// Oracle that replays a queue of canned replies and records every prompt.
///
/// Once the queue is empty, the fallback reply (if any) is returned forever;
/// without a fallback the oracle reports an empty reply.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    replies: RefCell<VecDeque<Result<String, OracleError>>>,
    fallback: Option<String>,
    prompts: RefCell<Vec<(String, String)>>,
}

impl ScriptedOracle {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: RefCell::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            fallback: None,
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Reply used after the scripted queue runs out.
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// Queue a transport failure after the replies scripted so far.
    pub fn then_error(self, err: OracleError) -> Self {
        self.replies.borrow_mut().push_back(Err(err));
        self
    }

    /// `(system, user)` prompts in call order.
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }
}

impl Oracle for ScriptedOracle {
    fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        self.prompts
            .borrow_mut()
            .push((system.to_string(), user.to_string()));
        if let Some(reply) = self.replies.borrow_mut().pop_front() {
            return reply;
        }
        self.fallback.clone().ok_or(OracleError::EmptyReply)
    }
}

/// One command seen by a [`ScriptedShell`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCall {
    pub command: String,
    pub input: Option<String>,
}

/// Remote shell that replays canned command results.
#[derive(Debug, Default)]
pub struct ScriptedShell {
    results: VecDeque<Result<CommandResult, ExecutionError>>,
    fallback: CommandResult,
    connect_failures: u32,
    connect_calls: u32,
    connected: bool,
    drop_after: Option<usize>,
    calls: Vec<ShellCall>,
}

impl ScriptedShell {
    pub fn new(results: Vec<Result<CommandResult, ExecutionError>>) -> Self {
        Self {
            results: results.into(),
            ..Self::default()
        }
    }

    /// Shell whose every command prints `output`.
    pub fn with_outputs<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            outputs
                .into_iter()
                .map(|output| Ok(ok_output(output)))
                .collect(),
        )
    }

    /// Result returned once the scripted queue is empty.
    pub fn with_fallback(mut self, result: CommandResult) -> Self {
        self.fallback = result;
        self
    }

    /// Fail the first `n` connect attempts.
    pub fn with_connect_failures(mut self, n: u32) -> Self {
        self.connect_failures = n;
        self
    }

    /// Lose the session after `n` commands and refuse every later connect.
    pub fn with_drop_after(mut self, n: usize) -> Self {
        self.drop_after = Some(n);
        self
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls
    }

    pub fn calls(&self) -> &[ShellCall] {
        &self.calls
    }
}

impl RemoteShell for ScriptedShell {
    fn connect(&mut self) -> Result<(), ConnectionError> {
        self.connect_calls += 1;
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(ConnectionError::Unreachable {
                host: "scripted".to_string(),
                port: 22,
                reason: "connection refused".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    fn execute(
        &mut self,
        command: &str,
        input: Option<&str>,
        _timeout: Duration,
    ) -> Result<CommandResult, ExecutionError> {
        if !self.connected {
            return Err(ExecutionError::NotConnected);
        }
        self.calls.push(ShellCall {
            command: command.to_string(),
            input: input.map(str::to_string),
        });
        if self.drop_after == Some(self.calls.len()) {
            self.connected = false;
            self.connect_failures = u32::MAX;
        }
        self.results
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) {
        self.connected = false;
    }
}

/// Successful command result with `output` on stdout.
pub fn ok_output(output: impl Into<String>) -> CommandResult {
    CommandResult {
        output: output.into(),
        exit_status: Some(0),
        ..CommandResult::default()
    }
}

/// Command result that wrote `error` to the error stream and exited 1.
pub fn err_output(error: impl Into<String>) -> CommandResult {
    CommandResult {
        error: error.into(),
        exit_status: Some(1),
        ..CommandResult::default()
    }
}

/// In-memory PTY channel for exercising the read loop.
///
/// Each queued chunk is returned by one read; an empty queue reads as
/// `WouldBlock`. The channel finishes once both queues are empty and an exit
/// status was set with [`FakePty::finishing`].
#[derive(Debug, Default)]
pub struct FakePty {
    stdout: VecDeque<Vec<u8>>,
    stderr: VecDeque<Vec<u8>>,
    after_input: Vec<Vec<u8>>,
    trailing: Option<Vec<u8>>,
    exit: Option<i32>,
    done: bool,
    broken: bool,
    inputs: Vec<Vec<u8>>,
    shutdowns: Vec<bool>,
}

impl FakePty {
    pub fn new<I, S>(stdout: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            stdout: chunks(stdout).into(),
            ..Self::default()
        }
    }

    pub fn with_stderr<I, S>(mut self, stderr: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stderr = chunks(stderr).into();
        self
    }

    /// Chunks that become readable once input is sent.
    pub fn after_input<I, S>(mut self, output: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.after_input = chunks(output);
        self
    }

    /// Output that only shows up after completion is signalled.
    pub fn trailing(mut self, output: &str) -> Self {
        self.trailing = Some(output.as_bytes().to_vec());
        self
    }

    pub fn finishing(mut self, exit: i32) -> Self {
        self.exit = Some(exit);
        self
    }

    /// Every read fails with a connection reset.
    pub fn failing_reads(mut self) -> Self {
        self.broken = true;
        self
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs
            .iter()
            .map(|input| String::from_utf8_lossy(input).into_owned())
            .collect()
    }

    /// The `wait` flag of every shutdown, in order.
    pub fn shutdowns(&self) -> &[bool] {
        &self.shutdowns
    }

    fn read_queue(&mut self, stderr: bool, buf: &mut [u8]) -> io::Result<usize> {
        if self.broken {
            return Err(io::Error::new(ErrorKind::ConnectionReset, "channel reset"));
        }
        let queue = if stderr {
            &mut self.stderr
        } else {
            &mut self.stdout
        };
        let Some(mut chunk) = queue.pop_front() else {
            if self.done {
                return Ok(0);
            }
            return Err(ErrorKind::WouldBlock.into());
        };
        if chunk.len() > buf.len() {
            let rest = chunk.split_off(buf.len());
            queue.push_front(rest);
        }
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

impl PtyChannel for FakePty {
    fn read_output(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_queue(false, buf)
    }

    fn read_error(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_queue(true, buf)
    }

    fn send_input(&mut self, data: &[u8]) -> io::Result<()> {
        self.inputs.push(data.to_vec());
        self.stdout.extend(self.after_input.drain(..));
        Ok(())
    }

    fn finished(&mut self) -> bool {
        if self.done {
            return true;
        }
        if self.exit.is_none() || !self.stdout.is_empty() || !self.stderr.is_empty() {
            return false;
        }
        self.done = true;
        if let Some(trailing) = self.trailing.take() {
            self.stdout.push_back(trailing);
        }
        true
    }

    fn exit_status(&mut self) -> Option<i32> {
        if self.done { self.exit } else { None }
    }

    fn shutdown(&mut self, wait: bool) {
        self.shutdowns.push(wait);
    }
}

fn chunks<I, S>(items: I) -> Vec<Vec<u8>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|item| item.as_ref().as_bytes().to_vec())
        .collect()
}

/// Config rooted in a fresh temp dir, with fast timings for scripted runs.
pub fn temp_config() -> io::Result<(TempDir, AgentConfig)> {
    let temp = tempfile::tempdir()?;
    let mut config = AgentConfig {
        run_dir: temp.path().join(".agent"),
        attacker: SshEndpoint {
            host: "scripted".to_string(),
            ..SshEndpoint::default()
        },
        ..AgentConfig::default()
    };
    config.remote.connect_retry_delay_ms = 1;
    config.remote.command_timeout_secs = 1;
    Ok((temp, config))
}

/// Read a run artifact relative to `<run_dir>/runs/<run_id>/`.
pub fn read_run_file(run_dir: &Path, run_id: &str, rel: &str) -> io::Result<String> {
    std::fs::read_to_string(run_dir.join("runs").join(run_id).join(rel))
}
