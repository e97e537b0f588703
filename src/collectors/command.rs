//! Remote execution transport
//!
//! Strategies never spawn processes themselves; they go through a
//! [`CommandRunner`] so the transport can be swapped out (tests script it).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::trace;

use super::ProbeError;

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout and stderr, lossily decoded, for log and error messages
    pub fn combined(&self) -> String {
        let stdout = String::from_utf8_lossy(&self.stdout);
        let stderr = String::from_utf8_lossy(&self.stderr);
        if stderr.is_empty() {
            stdout.trim().to_string()
        } else {
            format!("{}\nSTDERR:\n{}", stdout.trim(), stderr.trim())
        }
    }

    pub fn into_result(self) -> Result<Self, ProbeError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProbeError::NonZeroExit {
                code: self.code,
                output: self.combined(),
            })
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and wait at most `timeout` for it to finish
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ProbeError>;
}

/// Runs commands as local child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ProbeError> {
        trace!("running {} {:?}", program, args);

        let output = tokio::time::timeout(
            timeout,
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Transport(format!("failed to run {}: {}", program, e)))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
