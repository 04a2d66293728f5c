// ── Privileged shell execution ──
//
// The single seam through which the core runs commands under
// root-equivalent authority. Callers get an exit code and the combined
// stdout+stderr; they never see process plumbing. Output pipes are
// drained before waiting so a chatty command cannot deadlock on a full
// pipe, and a command overrunning its budget is killed and reported as
// exit code -1.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::CoreConfig;

/// Outcome of one privileged command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Process exit code; -1 on timeout, kill, or spawn failure.
    pub code: i32,
    /// Combined stdout + stderr.
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub(crate) fn failure(message: impl Into<String>) -> Self {
        Self {
            code: -1,
            output: message.into(),
        }
    }
}

/// Executes a shell command under elevated authority.
///
/// Implementations must be infallible at the call boundary: every
/// failure mode is folded into the returned [`ExecOutput`].
#[async_trait]
pub trait PrivilegeExecutor: Send + Sync {
    async fn execute(&self, command: &str) -> ExecOutput;
}

/// Shell-command executor spawning `<argv...> <command>`, e.g.
/// `su -c <command>` on a rooted device or `sh -c <command>` when the
/// assistive daemon already provides an elevated shell.
pub struct ShellExecutor {
    argv: Vec<String>,
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.shell.clone(), config.command_timeout)
    }
}

async fn read_all(reader: Option<impl AsyncRead + Unpin>) -> String {
    let mut buf = String::new();
    if let Some(mut r) = reader {
        // A non-UTF-8 tail is dropped rather than failing the command.
        let _ = r.read_to_string(&mut buf).await;
    }
    buf
}

#[async_trait]
impl PrivilegeExecutor for ShellExecutor {
    async fn execute(&self, command: &str) -> ExecOutput {
        let Some((program, prefix)) = self.argv.split_first() else {
            return ExecOutput::failure("no shell configured");
        };

        let mut child = match Command::new(program)
            .args(prefix)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program, error = %e, "privileged spawn failed");
                return ExecOutput::failure(e.to_string());
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            // Drain both pipes to completion, then reap.
            let (out, err) = tokio::join!(read_all(stdout), read_all(stderr));
            let status = child.wait().await;
            let mut combined = out;
            combined.push_str(&err);
            (combined, status)
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok((output, Ok(status))) => {
                let code = status.code().unwrap_or(-1);
                debug!(command, code, "privileged command finished");
                ExecOutput { code, output }
            }
            Ok((output, Err(e))) => {
                warn!(command, error = %e, "privileged wait failed");
                ExecOutput { code: -1, output }
            }
            Err(_) => {
                warn!(command, timeout_secs = self.timeout.as_secs(), "privileged command timed out");
                let _ = child.kill().await;
                let _ = child.wait().await;
                ExecOutput {
                    code: -1,
                    output: String::new(),
                }
            }
        }
    }
}
