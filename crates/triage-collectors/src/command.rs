//! External tool execution with timeout and failure classification.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::debug;
use triage_core::{Result, TriageError};

/// Substrings that mark an authentication or authorization failure.
pub const AUTH_MARKERS: &[&str] = &[
    "HTTP 401",
    "HTTP 403",
    "status code: 401",
    "status code: 403",
    "Unauthorized",
    "Forbidden",
    "Unable to locate credentials",
    "ExpiredToken",
    "AccessDenied",
    "InvalidClientTokenId",
    "Bad credentials",
    "You must be logged in",
];

/// Whether `text` looks like an authentication failure.
pub fn looks_like_auth_failure(text: &str) -> bool {
    AUTH_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Map a failed call's diagnostic text to `SourceAuth` or `SourceUnavailable`.
pub fn classify_failure(collector: &str, detail: &str) -> TriageError {
    let detail = detail.trim();
    if looks_like_auth_failure(detail) {
        TriageError::source_auth(collector, detail)
    } else {
        TriageError::source_unavailable(collector, detail)
    }
}

/// Result of one tool invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
}

/// A single external command run on behalf of a collector.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    collector: String,
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(collector: &str, program: &str) -> Self {
        Self {
            collector: collector.to_string(),
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The command line as typed in a shell, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion and capture output. A non-zero exit is not an error here.
    pub async fn output(&self) -> Result<CommandOutput> {
        let start = Instant::now();
        debug!(command = %self.display(), "running external tool");

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TriageError::source_unavailable(
                    &self.collector,
                    format!("`{}` not found on PATH", self.program),
                )
            } else {
                TriageError::source_unavailable(
                    &self.collector,
                    format!("failed to start `{}`: {}", self.program, e),
                )
            }
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                TriageError::source_unavailable(
                    &self.collector,
                    format!(
                        "`{}` timed out after {} seconds",
                        self.display(),
                        self.timeout.as_secs()
                    ),
                )
            })?
            .map_err(|e| {
                TriageError::source_unavailable(
                    &self.collector,
                    format!("`{}` failed: {}", self.program, e),
                )
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            success: output.status.success(),
        })
    }

    /// Run and return stdout, classifying a non-zero exit as a source failure.
    pub async fn run_checked(&self) -> Result<String> {
        let output = self.output().await?;
        if output.success {
            return Ok(output.stdout);
        }
        let detail = if output.stderr.trim().is_empty() {
            format!("`{}` exited with code {}", self.display(), output.exit_code)
        } else {
            output.stderr
        };
        Err(classify_failure(&self.collector, &detail))
    }
}

/// Whether `program` can be started at all.
pub async fn tool_available(program: &str) -> bool {
    ToolCommand::new(program, program)
        .arg("--version")
        .timeout(Duration::from_secs(10))
        .output()
        .await
        .map(|o| o.success)
        .unwrap_or(false)
}
