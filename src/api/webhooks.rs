use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::error::ApiError;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Shared-secret header sent by simple webhook callers (curl, CI jobs).
pub const SYNC_TOKEN_HEADER: &str = "X-Sync-Token";
/// Signature header sent by GitHub webhooks.
pub const GITHUB_SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Verify GitHub webhook signature (X-Hub-Signature-256 header)
fn verify_github_signature(secret: &str, signature_header: &str, payload: &[u8]) -> bool {
    // Signature format: sha256=<hex>
    let signature = match signature_header.strip_prefix("sha256=") {
        Some(sig) => sig,
        None => return false,
    };

    let expected = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    // Use constant-time comparison
    mac.verify_slice(&expected).is_ok()
}

fn verify_sync_token(secret: &str, token: &str) -> bool {
    secret.as_bytes().ct_eq(token.as_bytes()).into()
}

/// Accept either the plain shared secret or a GitHub HMAC signature of the body.
fn is_authorized(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(token) = header(SYNC_TOKEN_HEADER) {
        if verify_sync_token(secret, token) {
            return true;
        }
    }

    header(GITHUB_SIGNATURE_HEADER)
        .map(|signature| verify_github_signature(secret, signature, body))
        .unwrap_or(false)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub status: String,
    pub repo: String,
}

/// `POST /sync/:name` - bring the named repository up to date.
pub async fn sync_repo(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SyncResponse>, ApiError> {
    let repo = state.registry.get(&name).ok_or_else(|| {
        tracing::warn!(repo = %name, "Sync requested for unknown repository");
        ApiError::not_found(format!("Repository '{}' not found", name))
    })?;

    if let Some(ref secret) = repo.webhook_secret {
        if !is_authorized(secret, &headers, &body) {
            tracing::warn!(repo = %name, "Sync webhook secret verification failed");
            return Err(ApiError::unauthorized("Bad secret"));
        }
        tracing::debug!(repo = %name, "Sync webhook secret verified");
    }

    tracing::info!(repo = %name, provider = repo.provider.as_str(), "Sync requested");

    state.registry.sync(repo, &state.sync).await?;

    Ok(Json(SyncResponse {
        status: "ok".to_string(),
        repo: name,
    }))
}
