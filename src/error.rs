//! Error taxonomy for the credential cache and the sync engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while resolving credentials or syncing a working copy.
#[derive(Error, Debug)]
pub enum GitSyncError {
    /// Required parameters are missing or inconsistent. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The GitHub App private key could not be read or parsed.
    #[error("Failed to load private key {}: {reason}", path.display())]
    Keyfile { path: PathBuf, reason: String },

    /// GitHub refused (or never answered) the installation token request.
    #[error("{}", mint_message(*status, message))]
    CredentialMint { status: Option<u16>, message: String },

    /// A required git step exited unsuccessfully.
    #[error("`{command}` failed ({status}): {stderr}")]
    Sync {
        command: String,
        status: String,
        stderr: String,
    },
}

fn mint_message(status: Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("GitHub API error getting installation token: {} - {}", code, message),
        None => format!("Failed to request installation token: {}", message),
    }
}

impl GitSyncError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn keyfile(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Keyfile {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Upstream status code for mint failures, if GitHub responded at all.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::CredentialMint { status, .. } => *status,
            _ => None,
        }
    }
}

pub type Result<T, E = GitSyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_error_message_includes_status() {
        let err = GitSyncError::CredentialMint {
            status: Some(401),
            message: "Bad credentials".to_string(),
        };
        assert_eq!(err.upstream_status(), Some(401));
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("Bad credentials"));
    }

    #[test]
    fn test_mint_error_without_status() {
        let err = GitSyncError::CredentialMint {
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.upstream_status(), None);
        assert!(err.to_string().starts_with("Failed to request installation token"));
    }

    #[test]
    fn test_sync_error_display() {
        let err = GitSyncError::Sync {
            command: "git fetch --all --prune".to_string(),
            status: "exit status: 128".to_string(),
            stderr: "fatal: could not read from remote".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("git fetch --all --prune"));
        assert!(message.contains("fatal: could not read from remote"));
    }
}
