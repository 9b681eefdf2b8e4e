//! Startup sync
//!
//! Brings every configured repository up to date before the server starts
//! accepting webhooks. A repository that fails to sync is logged and
//! skipped; it does not stop the others or the server.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::AppState;

/// Result of syncing a single repository at startup
#[derive(Debug, Clone, Serialize)]
pub struct RepoSyncResult {
    pub repo: String,
    pub synced: bool,
    /// Error message when the sync failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated startup sync results
#[derive(Debug, Clone, Serialize)]
pub struct StartupSyncReport {
    pub results: Vec<RepoSyncResult>,
    pub all_synced: bool,
    pub summary: String,
}

impl StartupSyncReport {
    pub fn new(results: Vec<RepoSyncResult>) -> Self {
        let all_synced = results.iter().all(|r| r.synced);
        let total = results.len();
        let synced = results.iter().filter(|r| r.synced).count();

        let summary = if all_synced {
            format!("All {} repositories synced", total)
        } else {
            format!("{}/{} repositories synced ({} failed)", synced, total, total - synced)
        };

        Self {
            results,
            all_synced,
            summary,
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &RepoSyncResult> {
        self.results.iter().filter(|r| !r.synced)
    }
}

/// Sync every repository once, one after another.
pub async fn run_startup_sync(state: &AppState) -> StartupSyncReport {
    let mut results = Vec::with_capacity(state.registry.len());

    for repo in state.registry.iter() {
        info!(repo = %repo.name, "Syncing repository on startup");

        match state.registry.sync(repo, &state.sync).await {
            Ok(()) => {
                info!(repo = %repo.name, "Successfully synced repository");
                results.push(RepoSyncResult {
                    repo: repo.name.clone(),
                    synced: true,
                    error: None,
                });
            }
            Err(e) => {
                error!(repo = %repo.name, error = %e, "Failed to sync repository on startup");
                results.push(RepoSyncResult {
                    repo: repo.name.clone(),
                    synced: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let report = StartupSyncReport::new(results);
    if report.all_synced {
        info!("{}", report.summary);
    } else {
        warn!("{}", report.summary);
    }
    report
}
