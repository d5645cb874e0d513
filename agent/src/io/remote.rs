//! Remote shell sessions and the interactive read loop.
//!
//! [`RemoteShell`] decouples orchestration from SSH. [`SshSession`] is the
//! real backend; tests use scripted shells and fake PTY channels.
//!
//! Command failures (non-zero exit, error-stream text) are part of the
//! returned [`CommandResult`]. Only channel-level failures surface as
//! [`ExecutionError`].

use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use ssh2::Session;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::prompt_marker::PromptWatcher;
use crate::core::types::CommandResult;
use crate::io::config::{RemoteConfig, SshEndpoint};
use crate::io::process::Capture;

/// Reads per stream per poll before the loop re-checks its deadline.
const MAX_READS_PER_POLL: usize = 64;
const READ_CHUNK_BYTES: usize = 4096;
/// Session timeout while closing a channel.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// The remote session could not be opened.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("cannot resolve {host}:{port}")]
    Resolve { host: String, port: u16 },
    #[error("connect to {host}:{port}: {reason}")]
    Unreachable {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("ssh handshake with {host} failed: {reason}")]
    Handshake { host: String, reason: String },
    #[error("authentication failed for {username}@{host}")]
    AuthFailed { username: String, host: String },
    #[error("gave up connecting after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<ConnectionError>,
    },
}

/// The channel broke while running a command.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("remote session is not connected")]
    NotConnected,
    #[error("open command channel: {0}")]
    Channel(String),
    #[error("read command output: {0}")]
    Read(String),
    #[error("send command input: {0}")]
    Write(String),
}

/// Authenticated remote shell that runs one command at a time.
pub trait RemoteShell {
    /// Open the session. No internal retry.
    fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Run `command`, answering the first detected prompt with `input`.
    fn execute(
        &mut self,
        command: &str,
        input: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandResult, ExecutionError>;

    fn is_connected(&self) -> bool;

    /// Release the session. Idempotent.
    fn close(&mut self);
}

/// Connect with up to `attempts` tries, sleeping `delay` in between.
pub fn connect_with_retry<S: RemoteShell + ?Sized>(
    shell: &mut S,
    attempts: u32,
    delay: Duration,
) -> Result<(), ConnectionError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match shell.connect() {
            Ok(()) => {
                info!(attempt, "remote session established");
                return Ok(());
            }
            Err(err) if attempt < attempts => {
                warn!(attempt, attempts, err = %err, "connect failed, retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                warn!(attempt, attempts, err = %err, "connect failed");
                return Err(ConnectionError::Exhausted {
                    attempts,
                    last: Box::new(err),
                });
            }
        }
    }
}

/// Byte-level view of an interactive command channel.
///
/// Reads are non-blocking: `ErrorKind::WouldBlock` means "no data yet".
pub trait PtyChannel {
    fn read_output(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn read_error(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn send_input(&mut self, data: &[u8]) -> io::Result<()>;
    /// True once the remote process signalled completion.
    fn finished(&mut self) -> bool;
    fn exit_status(&mut self) -> Option<i32>;
    /// Release the channel. With `wait`, also wait for the remote side to
    /// acknowledge the close.
    fn shutdown(&mut self, wait: bool);
}

/// Parameters of one bounded read loop.
#[derive(Debug, Clone)]
pub struct ReadLoop<'a> {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub markers: &'a [String],
    pub input: Option<&'a str>,
    /// Bytes kept per stream.
    pub output_cap: usize,
}

/// [`drive`] the channel, then shut it down.
///
/// A timed-out or broken channel is closed without waiting for the remote
/// side, so the call stays bounded by the read loop.
pub fn run_channel<C: PtyChannel + ?Sized>(
    channel: &mut C,
    opts: &ReadLoop<'_>,
) -> Result<CommandResult, ExecutionError> {
    let result = drive(channel, opts);
    channel.shutdown(result.as_ref().is_ok_and(|r| !r.timed_out));
    result
}

/// Poll `channel` until it finishes or `timeout` elapses, then drain once.
///
/// On the first prompt marker seen in either stream, `input` plus a newline
/// is written exactly once. Always returns within `timeout` plus one poll
/// interval plus the drain. Prompt detection sees every byte, including
/// bytes past `output_cap`.
pub fn drive<C: PtyChannel + ?Sized>(
    channel: &mut C,
    opts: &ReadLoop<'_>,
) -> Result<CommandResult, ExecutionError> {
    let deadline = Instant::now() + opts.timeout;
    let mut watcher = PromptWatcher::new(opts.markers);
    let mut output = Capture::default();
    let mut error = Capture::default();
    let mut fresh_out = Vec::new();
    let mut fresh_err = Vec::new();
    let mut input_sent = false;
    let mut timed_out = false;

    loop {
        fresh_out.clear();
        fresh_err.clear();
        read_available(&mut fresh_out, |buf| channel.read_output(buf))?;
        read_available(&mut fresh_err, |buf| channel.read_error(buf))?;
        output.push(&fresh_out, opts.output_cap);
        error.push(&fresh_err, opts.output_cap);

        for chunk in [&fresh_out, &fresh_err] {
            if watcher.observe(&String::from_utf8_lossy(chunk))
                && let Some(input) = opts.input
                && !input_sent
            {
                debug!("prompt detected, sending input");
                let mut line = input.as_bytes().to_vec();
                line.push(b'\n');
                channel
                    .send_input(&line)
                    .map_err(|err| ExecutionError::Write(err.to_string()))?;
                input_sent = true;
            }
        }

        if channel.finished() {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            timed_out = true;
            warn!(timeout_ms = opts.timeout.as_millis() as u64, "command timed out");
            break;
        }
        if fresh_out.is_empty() && fresh_err.is_empty() {
            thread::sleep(opts.poll_interval.min(deadline - now));
        }
    }

    fresh_out.clear();
    fresh_err.clear();
    read_available(&mut fresh_out, |buf| channel.read_output(buf))?;
    read_available(&mut fresh_err, |buf| channel.read_error(buf))?;
    output.push(&fresh_out, opts.output_cap);
    error.push(&fresh_err, opts.output_cap);
    if output.dropped + error.dropped > 0 {
        warn!(
            output_dropped = output.dropped,
            error_dropped = error.dropped,
            "command output capped"
        );
    }

    Ok(CommandResult {
        output: with_dropped_note(output),
        error: with_dropped_note(error),
        exit_status: channel.exit_status(),
        timed_out,
        input_sent,
    })
}

fn with_dropped_note(capture: Capture) -> String {
    let mut text = capture.lossy();
    if capture.dropped > 0 {
        text.push_str(&format!("\n[{} more bytes dropped]\n", capture.dropped));
    }
    text
}

fn read_available<F>(sink: &mut Vec<u8>, mut read: F) -> Result<(), ExecutionError>
where
    F: FnMut(&mut [u8]) -> io::Result<usize>,
{
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    for _ in 0..MAX_READS_PER_POLL {
        match read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => sink.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(ExecutionError::Read(err.to_string())),
        }
    }
    Ok(())
}

/// SSH-backed [`RemoteShell`] (password auth, PTY per command).
pub struct SshSession {
    endpoint: SshEndpoint,
    connect_timeout: Duration,
    poll_interval: Duration,
    markers: Vec<String>,
    output_cap: usize,
    session: Option<Session>,
}

impl SshSession {
    pub fn new(endpoint: SshEndpoint, remote: &RemoteConfig) -> Self {
        Self {
            endpoint,
            connect_timeout: Duration::from_secs(remote.connect_timeout_secs),
            poll_interval: Duration::from_millis(remote.poll_interval_ms),
            markers: remote.prompt_markers.clone(),
            output_cap: remote.output_limit_bytes,
            session: None,
        }
    }

    fn open(&self) -> Result<Session, ConnectionError> {
        let host = &self.endpoint.host;
        let port = self.endpoint.port;
        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ConnectionError::Resolve {
                host: host.clone(),
                port,
            })?;
        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout).map_err(|err| {
            ConnectionError::Unreachable {
                host: host.clone(),
                port,
                reason: err.to_string(),
            }
        })?;

        let handshake_err = |err: ssh2::Error| ConnectionError::Handshake {
            host: host.clone(),
            reason: err.to_string(),
        };
        let mut session = Session::new().map_err(handshake_err)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(duration_ms(self.connect_timeout));
        session.handshake().map_err(handshake_err)?;

        let auth_failed = || ConnectionError::AuthFailed {
            username: self.endpoint.username.clone(),
            host: host.clone(),
        };
        session
            .userauth_password(&self.endpoint.username, &self.endpoint.password)
            .map_err(|_| auth_failed())?;
        if !session.authenticated() {
            return Err(auth_failed());
        }
        Ok(session)
    }
}

impl RemoteShell for SshSession {
    #[instrument(skip_all, fields(host = %self.endpoint.host, port = self.endpoint.port))]
    fn connect(&mut self) -> Result<(), ConnectionError> {
        self.close();
        let session = self.open()?;
        self.session = Some(session);
        Ok(())
    }

    #[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), with_input = input.is_some()))]
    fn execute(
        &mut self,
        command: &str,
        input: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandResult, ExecutionError> {
        let session = self.session.clone().ok_or(ExecutionError::NotConnected)?;
        session.set_blocking(true);

        let opened = session.channel_session().and_then(|mut channel| {
            channel.request_pty("xterm", None, None)?;
            channel.exec(command)?;
            Ok(channel)
        });
        let channel = match opened {
            Ok(channel) => channel,
            Err(err) => {
                // A dead transport shows up here first; force a reconnect.
                warn!(err = %err, "channel open failed, dropping session");
                self.close();
                return Err(ExecutionError::Channel(err.to_string()));
            }
        };

        session.set_blocking(false);
        let mut pty = SshChannel {
            channel,
            session: session.clone(),
        };
        let result = run_channel(
            &mut pty,
            &ReadLoop {
                timeout,
                poll_interval: self.poll_interval,
                markers: &self.markers,
                input,
                output_cap: self.output_cap,
            },
        );
        debug!(ok = result.is_ok(), "command channel closed");
        result
    }

    fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(Session::authenticated)
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.set_blocking(true);
            if let Err(err) = session.disconnect(None, "closing", None) {
                debug!(err = %err, "ssh disconnect failed");
            }
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}

struct SshChannel {
    channel: ssh2::Channel,
    session: Session,
}

impl PtyChannel for SshChannel {
    fn read_output(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }

    fn read_error(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.stderr().read(buf)
    }

    fn send_input(&mut self, data: &[u8]) -> io::Result<()> {
        self.session.set_blocking(true);
        let written = self
            .channel
            .write_all(data)
            .and_then(|()| self.channel.flush());
        self.session.set_blocking(false);
        written
    }

    fn finished(&mut self) -> bool {
        self.channel.eof()
    }

    fn exit_status(&mut self) -> Option<i32> {
        if !self.channel.eof() {
            return None;
        }
        self.channel.exit_status().ok()
    }

    fn shutdown(&mut self, wait: bool) {
        let previous = self.session.timeout();
        self.session.set_timeout(duration_ms(SHUTDOWN_TIMEOUT));
        self.session.set_blocking(true);
        match self.channel.close() {
            Err(err) => debug!(err = %err, "channel close failed"),
            Ok(()) if wait => {
                if let Err(err) = self.channel.wait_close() {
                    debug!(err = %err, "channel wait_close failed");
                }
            }
            Ok(()) => debug!("skipping wait_close for abandoned channel"),
        }
        self.session.set_timeout(previous);
    }
}

fn duration_ms(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
