//! Language-model oracle backends.
//!
//! The [`Oracle`] trait is the only way the planner and summarizer reach a
//! model: `complete(system, user) -> text`. Tests use scripted oracles that
//! return canned replies without any network or process.

use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::{CommandOracleConfig, HttpOracleConfig, OracleConfig};
use crate::io::process::run_command_with_timeout;

/// Transport or quota failure talking to an oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("environment variable {env} with the API key is not set")]
    MissingApiKey { env: String },
    #[error("oracle request failed: {0}")]
    Transport(String),
    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("oracle reply had no content")]
    EmptyReply,
    #[error("oracle command timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("oracle command exited with {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        OracleError::Transport(err.to_string())
    }
}

/// Synchronous text-completion oracle.
pub trait Oracle {
    fn complete(&self, system: &str, user: &str) -> Result<String, OracleError>;
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        (**self).complete(system, user)
    }
}

impl<O: Oracle + ?Sized> Oracle for &O {
    fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        (**self).complete(system, user)
    }
}

/// Build the backend named by `config`.
pub fn build_oracle(config: &OracleConfig) -> Result<Box<dyn Oracle>, OracleError> {
    Ok(match config {
        OracleConfig::Http(http) => Box::new(HttpOracle::new(http.clone())?),
        OracleConfig::Command(cmd) => Box::new(CommandOracle::new(cmd.clone())),
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` endpoint over blocking HTTP.
pub struct HttpOracle {
    client: reqwest::blocking::Client,
    config: HttpOracleConfig,
    api_key: Option<String>,
}

impl HttpOracle {
    /// Build the client and read the API key from the configured environment variable.
    pub fn new(config: HttpOracleConfig) -> Result<Self, OracleError> {
        let api_key = if config.api_key_env.trim().is_empty() {
            None
        } else {
            match std::env::var(&config.api_key_env) {
                Ok(key) if !key.trim().is_empty() => Some(key),
                _ => {
                    return Err(OracleError::MissingApiKey {
                        env: config.api_key_env.clone(),
                    });
                }
            }
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

impl Oracle for HttpOracle {
    #[instrument(skip_all, fields(model = %self.config.model))]
    fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(status = status.as_u16(), "oracle request rejected");
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json()?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(OracleError::EmptyReply)?;
        debug!(reply_bytes = content.len(), "oracle replied");
        Ok(content)
    }
}

/// External CLI oracle: prompt on stdin, reply on stdout.
pub struct CommandOracle {
    config: CommandOracleConfig,
}

impl CommandOracle {
    pub fn new(config: CommandOracleConfig) -> Self {
        Self { config }
    }
}

impl Oracle for CommandOracle {
    #[instrument(skip_all, fields(program = ?self.config.command.first()))]
    fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| OracleError::Transport("empty oracle command".to_string()))?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        let prompt = format!("{}\n\n{}\n", system.trim_end(), user.trim_end());
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            Duration::from_secs(self.config.timeout_secs),
            self.config.output_limit_bytes,
        )
        .map_err(|err| OracleError::Transport(format!("{err:#}")))?;

        if output.timed_out {
            return Err(OracleError::Timeout {
                secs: self.config.timeout_secs,
            });
        }
        if !output.status.success() {
            return Err(OracleError::CommandFailed {
                code: output.status.code(),
                stderr: output.stderr_lossy().trim().to_string(),
            });
        }
        let reply = output.stdout_lossy();
        if reply.trim().is_empty() {
            return Err(OracleError::EmptyReply);
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve exactly one HTTP response and hand back the raw request body.
    fn one_shot_server(status_line: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read header");
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                let lower = line.to_ascii_lowercase();
                if let Some(value) = lower.strip_prefix("content-length:") {
                    content_length = value.trim().parse().expect("length");
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).expect("read body");
            let mut stream = stream;
            write!(
                stream,
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .expect("write response");
            String::from_utf8(request_body).expect("utf8")
        });
        (format!("http://{addr}/v1"), handle)
    }

    fn http_config(base_url: String) -> HttpOracleConfig {
        HttpOracleConfig {
            base_url,
            api_key_env: String::new(),
            timeout_secs: 5,
            ..HttpOracleConfig::default()
        }
    }

    #[test]
    fn http_oracle_posts_system_and_user_messages() {
        let (base_url, server) = one_shot_server(
            "HTTP/1.1 200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"{\"command\":\"id\",\"input\":\"\"}"}}]}"#,
        );
        let oracle = HttpOracle::new(http_config(base_url)).expect("oracle");

        let reply = oracle.complete("sys prompt", "user prompt").expect("reply");
        assert_eq!(reply, r#"{"command":"id","input":""}"#);

        let body: serde_json::Value =
            serde_json::from_str(&server.join().expect("server")).expect("json body");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "sys prompt");
        assert_eq!(body["messages"][1]["content"], "user prompt");
    }

    #[test]
    fn http_oracle_maps_error_status() {
        let (base_url, server) =
            one_shot_server("HTTP/1.1 429 Too Many Requests", r#"{"error":"quota"}"#);
        let oracle = HttpOracle::new(http_config(base_url)).expect("oracle");

        let err = oracle.complete("s", "u").expect_err("quota error");
        assert!(matches!(err, OracleError::Status { status: 429, .. }));
        server.join().expect("server");
    }

    #[test]
    fn http_oracle_without_choices_is_empty_reply() {
        let (base_url, server) = one_shot_server("HTTP/1.1 200 OK", r#"{"choices":[]}"#);
        let oracle = HttpOracle::new(http_config(base_url)).expect("oracle");

        let err = oracle.complete("s", "u").expect_err("no choices");
        assert!(matches!(err, OracleError::EmptyReply));
        server.join().expect("server");
    }

    #[test]
    fn missing_api_key_is_reported() {
        let config = HttpOracleConfig {
            api_key_env: "AGENT_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..HttpOracleConfig::default()
        };
        let err = HttpOracle::new(config).err().expect("missing key");
        assert!(matches!(err, OracleError::MissingApiKey { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn command_oracle_feeds_prompt_on_stdin() {
        let oracle = CommandOracle::new(CommandOracleConfig {
            command: vec!["cat".to_string()],
            timeout_secs: 5,
            output_limit_bytes: 1024,
        });
        let reply = oracle.complete("system", "user").expect("reply");
        assert_eq!(reply, "system\n\nuser\n");
    }

    #[cfg(unix)]
    #[test]
    fn command_oracle_maps_failures() {
        let oracle = CommandOracle::new(CommandOracleConfig {
            command: vec!["sh".to_string(), "-c".to_string(), "echo nope >&2; exit 4".to_string()],
            timeout_secs: 5,
            output_limit_bytes: 1024,
        });
        match oracle.complete("s", "u") {
            Err(OracleError::CommandFailed { code, stderr }) => {
                assert_eq!(code, Some(4));
                assert_eq!(stderr, "nope");
            }
            other => panic!("expected command failure, got {other:?}"),
        }

        let oracle = CommandOracle::new(CommandOracleConfig {
            command: vec!["sh".to_string(), "-c".to_string(), "exec sleep 10".to_string()],
            timeout_secs: 1,
            output_limit_bytes: 1024,
        });
        assert!(matches!(
            oracle.complete("s", "u"),
            Err(OracleError::Timeout { secs: 1 })
        ));
    }
}
