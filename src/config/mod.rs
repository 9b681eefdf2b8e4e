use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::GitSyncError;
use crate::github::token_manager::{DEFAULT_REFRESH_MARGIN_SECS, INSTALLATION_TOKEN_LIFETIME_SECS};
use crate::repo::{GitHubAppAuth, Provider, RepoDescriptor};

pub const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub repos: BTreeMap<String, RawRepoConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitConfig {
    /// git executable, looked up on PATH unless absolute
    #[serde(default = "default_git_binary")]
    pub binary: String,
    /// Upper bound for any single git process (default: 300)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_command_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Timeout for installation token requests in seconds (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Cached tokens are replaced once they are this close to expiry (default: 3000)
    #[serde(default = "default_refresh_margin")]
    pub token_refresh_margin_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout(),
            token_refresh_margin_secs: default_refresh_margin(),
        }
    }
}

impl GitHubConfig {
    /// Refresh margin as a duration. Must be shorter than the installation
    /// token lifetime.
    pub fn refresh_margin(&self) -> Result<chrono::Duration, GitSyncError> {
        let secs = self.token_refresh_margin_secs;
        if secs >= INSTALLATION_TOKEN_LIFETIME_SECS {
            return Err(GitSyncError::configuration(format!(
                "github.token_refresh_margin_secs must be below {} (installation token lifetime), got {}",
                INSTALLATION_TOKEN_LIFETIME_SECS, secs
            )));
        }
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                GitSyncError::configuration(format!(
                    "github.token_refresh_margin_secs out of range: {}",
                    secs
                ))
            })
    }
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_refresh_margin() -> u64 {
    DEFAULT_REFRESH_MARGIN_SECS
}

/// Defaults inherited by every repository that leaves the field unset.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub github_app_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub github_installation_id: Option<String>,
    #[serde(default)]
    pub github_keyfile: Option<PathBuf>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Sync every repository once when the server starts (default: true)
    #[serde(default = "default_sync_on_startup")]
    pub sync_on_startup: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            github_app_id: None,
            github_installation_id: None,
            github_keyfile: None,
            webhook_secret: None,
            sync_on_startup: default_sync_on_startup(),
        }
    }
}

fn default_sync_on_startup() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Git,
    Github,
}

impl std::str::FromStr for ProviderKind {
    type Err = GitSyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "git" => Ok(ProviderKind::Git),
            "github" => Ok(ProviderKind::Github),
            other => Err(GitSyncError::configuration(format!(
                "unknown provider '{}', expected 'git' or 'github'",
                other
            ))),
        }
    }
}

/// A repository entry as written in the config file, before defaults apply.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRepoConfig {
    /// Defaults to the key under `repos`
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub git_url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub github_app_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub github_installation_id: Option<String>,
    #[serde(default)]
    pub github_keyfile: Option<PathBuf>,
}

/// GitHub ids are numeric, but people quote them as often as not.
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    }))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(path, &content)?
        } else {
            info!("No config file found at {}, using defaults", path.display());
            Config::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.github.refresh_margin()?;
        Ok(config)
    }

    /// Parse YAML for `.yaml`/`.yml` files and TOML for anything else.
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        if is_yaml {
            if content.trim().is_empty() {
                return Ok(Config::default());
            }
            serde_yaml::from_str(content).with_context(|| "Failed to parse configuration file")
        } else {
            toml::from_str(content).with_context(|| "Failed to parse configuration file")
        }
    }

    /// Overlay `GITSYNC_*` variables. A repository is added from the
    /// environment only when both its directory and git url are given.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| non_empty(lookup(key));

        if let Some(app_id) = var("GITSYNC_GITHUB_APP_ID") {
            self.global.github_app_id = Some(app_id);
        }
        if let Some(installation_id) = var("GITSYNC_GITHUB_INSTALLATION_ID") {
            self.global.github_installation_id = Some(installation_id);
        }
        if let Some(keyfile) = var("GITSYNC_GITHUB_KEYFILE") {
            self.global.github_keyfile = Some(PathBuf::from(keyfile));
        }
        if let Some(secret) = var("GITSYNC_WEBHOOK_SECRET") {
            self.global.webhook_secret = Some(secret);
        }
        if let Some(flag) = var("GITSYNC_SYNC_ON_STARTUP") {
            self.global.sync_on_startup = parse_bool(&flag).with_context(|| {
                format!("GITSYNC_SYNC_ON_STARTUP must be a boolean, got '{}'", flag)
            })?;
        }

        if let (Some(directory), Some(git_url)) =
            (var("GITSYNC_REPO_DIRECTORY"), var("GITSYNC_REPO_GIT_URL"))
        {
            let name = var("GITSYNC_REPO_NAME").unwrap_or_else(|| "default".to_string());
            let provider = var("GITSYNC_REPO_PROVIDER")
                .map(|p| p.parse::<ProviderKind>())
                .transpose()?;

            self.repos.insert(
                name.clone(),
                RawRepoConfig {
                    name: Some(name),
                    directory: Some(PathBuf::from(directory)),
                    git_url: Some(git_url),
                    branch: var("GITSYNC_REPO_BRANCH"),
                    provider,
                    ..RawRepoConfig::default()
                },
            );
        }

        Ok(())
    }

    /// Resolve every configured repository into a descriptor.
    pub fn descriptors(&self) -> Result<Vec<RepoDescriptor>, GitSyncError> {
        resolve_repos(&self.global, &self.repos)
    }
}

/// Merge global defaults into the raw repository entries.
///
/// Pure: the same inputs always give the same descriptors, and nothing is
/// read from disk or the environment.
pub fn resolve_repos(
    global: &GlobalConfig,
    raw: &BTreeMap<String, RawRepoConfig>,
) -> Result<Vec<RepoDescriptor>, GitSyncError> {
    let mut descriptors = Vec::with_capacity(raw.len());
    let mut names = HashMap::new();
    let mut keyfiles: HashMap<(String, String), (String, PathBuf)> = HashMap::new();

    for (key, repo) in raw {
        let name = non_empty(repo.name.clone()).unwrap_or_else(|| key.clone());

        if let Some(previous) = names.insert(name.clone(), key.clone()) {
            return Err(GitSyncError::configuration(format!(
                "repository name '{}' is used by both '{}' and '{}'",
                name, previous, key
            )));
        }

        let directory = repo
            .directory
            .clone()
            .filter(|d| !d.as_os_str().is_empty())
            .ok_or_else(|| {
                GitSyncError::configuration(format!("repository '{}' has no directory", name))
            })?;

        let git_url = non_empty(repo.git_url.clone()).ok_or_else(|| {
            GitSyncError::configuration(format!("repository '{}' has no git_url", name))
        })?;

        let provider = match repo.provider.unwrap_or_default() {
            ProviderKind::Git => Provider::Git,
            ProviderKind::Github => Provider::GitHub(GitHubAppAuth {
                app_id: non_empty(repo.github_app_id.clone())
                    .or_else(|| non_empty(global.github_app_id.clone())),
                installation_id: non_empty(repo.github_installation_id.clone())
                    .or_else(|| non_empty(global.github_installation_id.clone())),
                keyfile: repo
                    .github_keyfile
                    .clone()
                    .or_else(|| global.github_keyfile.clone())
                    .filter(|k| !k.as_os_str().is_empty()),
            }),
        };

        if let Provider::GitHub(GitHubAppAuth {
            app_id: Some(app_id),
            installation_id: Some(installation_id),
            keyfile: Some(keyfile),
        }) = &provider
        {
            let pair = (app_id.clone(), installation_id.clone());
            // `/keys/./a.pem` and `/keys//a.pem` name the same file as `/keys/a.pem`
            let normalized: PathBuf = keyfile.components().collect();
            match keyfiles.get(&pair) {
                Some((other, other_keyfile)) if *other_keyfile != normalized => {
                    return Err(GitSyncError::configuration(format!(
                        "repositories '{}' and '{}' share GitHub app {} installation {} but use different key files ({} vs {})",
                        other,
                        name,
                        app_id,
                        installation_id,
                        other_keyfile.display(),
                        keyfile.display()
                    )));
                }
                Some(_) => {}
                None => {
                    keyfiles.insert(pair, (name.clone(), normalized));
                }
            }
        }

        descriptors.push(RepoDescriptor {
            name,
            directory,
            git_url,
            branch: non_empty(repo.branch.clone()).unwrap_or_else(|| "master".to_string()),
            webhook_secret: non_empty(repo.webhook_secret.clone())
                .or_else(|| non_empty(global.webhook_secret.clone())),
            provider,
        });
    }

    Ok(descriptors)
}
