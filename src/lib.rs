pub mod api;
pub mod config;
pub mod error;
pub mod git;
pub mod github;
pub mod repo;
pub mod startup;

pub use error::{GitSyncError, Result};

use config::Config;
use repo::{RepoRegistry, SyncContext};

pub struct AppState {
    pub config: Config,
    pub registry: RepoRegistry,
    pub sync: SyncContext,
}

impl AppState {
    pub fn new(config: Config, registry: RepoRegistry, sync: SyncContext) -> Self {
        Self {
            config,
            registry,
            sync,
        }
    }

    /// Resolve descriptors and build the real token cache and git runner.
    pub fn from_config(config: Config) -> Result<Self> {
        let registry = RepoRegistry::new(config.descriptors()?);
        let sync = SyncContext::from_config(&config)?;
        Ok(Self::new(config, registry, sync))
    }
}
