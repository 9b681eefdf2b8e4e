//! Git process execution and working-copy synchronisation.
//!
//! Every git operation shells out to the system `git` binary through a
//! [`GitRunner`], one process per step.

pub mod sync;

pub use sync::{embed_credential, sync_repository};

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::GitConfig;

/// Captured result of one git invocation.
#[derive(Debug, Clone, Default)]
pub struct GitOutput {
    pub success: bool,
    /// Human-readable exit status, e.g. `exit status: 128`.
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

/// Runs git subcommands. `Err` means the process could not be run to
/// completion at all (spawn failure, timeout); a non-zero exit is reported
/// through [`GitOutput::success`].
#[async_trait]
pub trait GitRunner: Send + Sync {
    async fn run(&self, args: &[String], cwd: &Path) -> std::io::Result<GitOutput>;
}

/// [`GitRunner`] backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    binary: String,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(config: &GitConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(&GitConfig::default())
    }
}

#[async_trait]
impl GitRunner for CommandRunner {
    async fn run(&self, args: &[String], cwd: &Path) -> std::io::Result<GitOutput> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("timed out after {}s", self.timeout.as_secs()),
                )
            })??;

        debug!(cwd = %cwd.display(), status = %output.status, "git process exited");

        Ok(GitOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
