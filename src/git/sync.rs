//! Converges a local working copy onto the tip of a remote branch.
//!
//! The working copy is a mirror: local commits and modifications are
//! discarded by `reset --hard`, never merged.

use std::path::{Path, PathBuf};
use tracing::{info, warn};
use url::Url;

use super::{GitOutput, GitRunner};
use crate::error::{GitSyncError, Result};

const REDACTED: &str = "***";

/// Embed an installation token into an http(s) remote URL as
/// `x-access-token:<token>@host`. Returns `None` for URLs that cannot carry
/// basic-auth credentials (ssh, scp-style, local paths).
pub fn embed_credential(remote_url: &str, credential: &str) -> Option<String> {
    let mut url = Url::parse(remote_url).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_username("x-access-token").ok()?;
    url.set_password(Some(credential)).ok()?;
    Some(url.to_string())
}

/// The credential as it appears in a URL's userinfo after percent-encoding.
fn encoded_credential(credential: &str) -> Option<String> {
    let mut url = Url::parse("https://localhost").ok()?;
    url.set_password(Some(credential)).ok()?;
    url.password().map(str::to_string)
}

fn redact(text: &str, credential: Option<&str>) -> String {
    let Some(secret) = credential.filter(|s| !s.is_empty()) else {
        return text.to_string();
    };

    let mut redacted = text.to_string();
    if let Some(encoded) = encoded_credential(secret).filter(|e| e != secret) {
        redacted = redacted.replace(&encoded, REDACTED);
    }
    redacted.replace(secret, REDACTED)
}

fn git_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter().map(Into::into).collect()
}

async fn run_step(
    runner: &dyn GitRunner,
    args: Vec<String>,
    cwd: &Path,
    credential: Option<&str>,
) -> Result<GitOutput> {
    let command = redact(&format!("git {}", args.join(" ")), credential);

    let output = runner.run(&args, cwd).await.map_err(|e| GitSyncError::Sync {
        command: command.clone(),
        status: "not run".to_string(),
        stderr: redact(&e.to_string(), credential),
    })?;

    if !output.success {
        return Err(GitSyncError::Sync {
            command,
            status: output.status,
            stderr: redact(&output.stderr, credential),
        });
    }

    Ok(output)
}

fn clone_cwd(directory: &Path) -> PathBuf {
    match directory.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Sync `directory` to `origin/<branch>` of `remote_url`.
///
/// Absent working copy: create the directory and clone into it. Present
/// working copy: repoint `origin` (only when a credential is given, since the
/// embedded token rotates), fetch everything with pruning, then hard reset.
/// Finally the newest commit is logged; failure of that step is ignored.
pub async fn sync_repository(
    runner: &dyn GitRunner,
    directory: &Path,
    remote_url: &str,
    branch: &str,
    credential: Option<&str>,
) -> Result<()> {
    let fetch_url = match credential {
        Some(token) => embed_credential(remote_url, token).unwrap_or_else(|| {
            warn!(
                url = remote_url,
                "Remote URL cannot carry a token, syncing without credential"
            );
            remote_url.to_string()
        }),
        None => remote_url.to_string(),
    };

    // Absolute so the clone target does not depend on the clone's cwd.
    let directory = if directory.is_relative() {
        std::env::current_dir()
            .map_err(|e| GitSyncError::Sync {
                command: format!("resolve {}", directory.display()),
                status: "not run".to_string(),
                stderr: e.to_string(),
            })?
            .join(directory)
    } else {
        directory.to_path_buf()
    };

    if !directory.join(".git").exists() {
        info!(url = remote_url, directory = %directory.display(), "Cloning repository");

        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| GitSyncError::Sync {
                command: format!("create directory {}", directory.display()),
                status: "not run".to_string(),
                stderr: e.to_string(),
            })?;

        let target = directory.to_string_lossy().into_owned();
        run_step(
            runner,
            git_args(["clone", fetch_url.as_str(), target.as_str()]),
            &clone_cwd(&directory),
            credential,
        )
        .await?;
    } else {
        info!(url = remote_url, directory = %directory.display(), branch, "Updating repository");

        if credential.is_some() {
            run_step(
                runner,
                git_args(["remote", "set-url", "origin", fetch_url.as_str()]),
                &directory,
                credential,
            )
            .await?;
        }

        run_step(runner, git_args(["fetch", "--all", "--prune"]), &directory, credential).await?;

        let upstream = format!("origin/{}", branch);
        run_step(
            runner,
            git_args(["reset", "--hard", upstream.as_str()]),
            &directory,
            credential,
        )
        .await?;
    }

    match run_step(runner, git_args(["log", "-1", "--oneline"]), &directory, credential).await {
        Ok(output) => info!(
            directory = %directory.display(),
            commit = %output.stdout.trim(),
            "Repository synced"
        ),
        Err(e) => warn!(directory = %directory.display(), error = %e, "Could not read last commit"),
    }

    Ok(())
}
