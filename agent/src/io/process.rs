//! Local child processes with timeouts and bounded output.

use std::io::{Read, Write};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes kept from one output stream, plus how many were dropped past the cap.
#[derive(Debug, Default)]
pub struct Capture {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Capture {
    /// Append `data`, keeping at most `cap` bytes in total.
    pub fn push(&mut self, data: &[u8], cap: usize) {
        let room = cap.saturating_sub(self.bytes.len()).min(data.len());
        self.bytes.extend_from_slice(&data[..room]);
        self.dropped += data.len() - room;
    }

    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Capture,
    pub stderr: Capture,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        self.stdout.lossy()
    }

    pub fn stderr_lossy(&self) -> String {
        self.stderr.lossy()
    }
}

/// Run `cmd` to completion or until `timeout`, feeding it `stdin` if given.
///
/// Both pipes are drained on their own threads so a chatty child can never
/// block on a full pipe. At most `cap` bytes per stream are kept.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), cap))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    cap: usize,
) -> Result<CommandOutput> {
    let stdin_mode = if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    };
    cmd.stdin(stdin_mode)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn command")?;
    debug!(pid = child.id(), "child spawned");
    let (out_reader, err_reader) = spawn_readers(&mut child, cap)?;

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        if let Err(err) = pipe.write_all(input) {
            warn!(%err, "child closed stdin before reading all input");
        }
        // Dropping the pipe sends EOF.
    }

    let (status, timed_out) = wait_or_kill(&mut child, timeout)?;
    let stdout = collect(out_reader).context("collect stdout")?;
    let stderr = collect(err_reader).context("collect stderr")?;
    if stdout.dropped + stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "output capped"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

type Reader = JoinHandle<Result<Capture>>;

fn spawn_readers(child: &mut Child, cap: usize) -> Result<(Reader, Reader)> {
    let stdout: ChildStdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr: ChildStderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    Ok((
        thread::spawn(move || drain(stdout, cap)),
        thread::spawn(move || drain(stderr, cap)),
    ))
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for command")? {
        return Ok((status, false));
    }
    warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
    child.kill().context("kill command")?;
    let status = child.wait().context("reap killed command")?;
    Ok((status, true))
}

fn collect(reader: Reader) -> Result<Capture> {
    reader
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

// Keeps reading past the cap so the child never stalls on a full pipe.
fn drain(mut source: impl Read, cap: usize) -> Result<Capture> {
    let mut capture = Capture::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = source.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(capture);
        }
        capture.push(&chunk[..n], cap);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn feeds_stdin_and_splits_streams() {
        let out = run_command_with_timeout(
            sh("cat; echo done >&2"),
            Some(b"hello\n"),
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert!(out.status.success());
        assert_eq!(out.stdout_lossy(), "hello\n");
        assert_eq!(out.stderr_lossy(), "done\n");
        assert!(!out.timed_out);
    }

    #[test]
    fn caps_each_stream() {
        let out = run_command_with_timeout(
            sh("printf 'abcdefghij'; printf 'xy' >&2"),
            None,
            Duration::from_secs(5),
            4,
        )
        .expect("run");
        assert_eq!(out.stdout.bytes, b"abcd");
        assert_eq!(out.stdout.dropped, 6);
        assert_eq!(out.stderr.bytes, b"xy");
        assert_eq!(out.stderr.dropped, 0);
    }

    #[test]
    fn nonzero_exit_is_not_an_error() {
        let out = run_command_with_timeout(sh("exit 3"), None, Duration::from_secs(5), 16)
            .expect("run");
        assert_eq!(out.status.code(), Some(3));
    }

    #[test]
    fn kills_on_timeout() {
        let start = Instant::now();
        let out = run_command_with_timeout(
            sh("exec sleep 10"),
            None,
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
