pub mod error;
mod webhooks;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub use webhooks::{SyncResponse, GITHUB_SIGNATURE_HEADER, SYNC_TOKEN_HEADER};

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/sync/:name", post(webhooks::sync_repo))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "repos": state.registry.len(),
    }))
}
