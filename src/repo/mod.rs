//! Repository descriptors and the registry of managed repositories.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::config::Config;
use crate::error::{GitSyncError, Result};
use crate::git::{sync_repository, CommandRunner, GitRunner};
use crate::github::{GitHubTokenMinter, TokenCache};

/// GitHub App identity used to mint installation tokens for a repository.
///
/// Without a key file the repository is synced unauthenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitHubAppAuth {
    pub app_id: Option<String>,
    pub installation_id: Option<String>,
    pub keyfile: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    Git,
    GitHub(GitHubAppAuth),
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Git => "git",
            Provider::GitHub(_) => "github",
        }
    }
}

/// Fully resolved configuration for one managed repository.
#[derive(Clone)]
pub struct RepoDescriptor {
    pub name: String,
    pub directory: PathBuf,
    pub git_url: String,
    pub branch: String,
    pub webhook_secret: Option<String>,
    pub provider: Provider,
}

impl fmt::Debug for RepoDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoDescriptor")
            .field("name", &self.name)
            .field("directory", &self.directory)
            .field("git_url", &self.git_url)
            .field("branch", &self.branch)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "***"))
            .field("provider", &self.provider)
            .finish()
    }
}

/// Shared collaborators for syncing: one per process.
#[derive(Clone)]
pub struct SyncContext {
    pub tokens: Arc<TokenCache>,
    pub runner: Arc<dyn GitRunner>,
}

impl SyncContext {
    pub fn new(tokens: Arc<TokenCache>, runner: Arc<dyn GitRunner>) -> Self {
        Self { tokens, runner }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let minter = GitHubTokenMinter::new(&config.github)?;
        let margin = config.github.refresh_margin()?;
        let tokens = TokenCache::new(Arc::new(minter)).with_refresh_margin(margin);

        Ok(Self::new(
            Arc::new(tokens),
            Arc::new(CommandRunner::new(&config.git)),
        ))
    }
}

impl RepoDescriptor {
    /// Installation token for GitHub repositories with a key file, `None` otherwise.
    pub async fn resolve_credential(&self, tokens: &TokenCache) -> Result<Option<String>> {
        let auth = match &self.provider {
            Provider::Git => return Ok(None),
            Provider::GitHub(auth) => auth,
        };

        let Some(keyfile) = &auth.keyfile else {
            debug!(repo = %self.name, "No GitHub key file configured, syncing unauthenticated");
            return Ok(None);
        };

        tokens
            .get_token(
                keyfile,
                auth.app_id.as_deref().unwrap_or_default(),
                auth.installation_id.as_deref().unwrap_or_default(),
            )
            .await
            .map(Some)
    }

    /// Sync the working copy. When git fails while using a minted token, the
    /// token is dropped from the cache so the next attempt mints a new one.
    pub async fn sync(&self, ctx: &SyncContext) -> Result<()> {
        let credential = self.resolve_credential(&ctx.tokens).await?;

        let result = sync_repository(
            ctx.runner.as_ref(),
            &self.directory,
            &self.git_url,
            &self.branch,
            credential.as_deref(),
        )
        .await;

        if let (Err(GitSyncError::Sync { .. }), Some(_), Provider::GitHub(auth)) =
            (&result, &credential, &self.provider)
        {
            if let (Some(app_id), Some(installation_id)) = (&auth.app_id, &auth.installation_id) {
                debug!(repo = %self.name, "Dropping cached installation token after failed sync");
                ctx.tokens.invalidate(app_id, installation_id);
            }
        }

        result
    }
}

/// All configured repositories by name, plus a lock per repository so two
/// syncs never run git in the same directory at once.
#[derive(Debug, Default)]
pub struct RepoRegistry {
    repos: BTreeMap<String, RepoDescriptor>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RepoRegistry {
    pub fn new(descriptors: Vec<RepoDescriptor>) -> Self {
        Self {
            repos: descriptors
                .into_iter()
                .map(|repo| (repo.name.clone(), repo))
                .collect(),
            locks: DashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RepoDescriptor> {
        self.repos.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RepoDescriptor> {
        self.repos.values()
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    /// Wait for exclusive use of the named repository's working copy.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(name.to_string()).or_default().clone();
        lock.lock_owned().await
    }

    /// Sync `repo` while holding its lock.
    pub async fn sync(&self, repo: &RepoDescriptor, ctx: &SyncContext) -> Result<()> {
        let _guard = self.lock(&repo.name).await;
        repo.sync(ctx).await
    }
}
