//! HTTP surface: health check and the deploy hook

pub mod webhook;

use axum::{
    Json, Router,
    extract::{Query, State as AxumState},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use std::collections::HashMap;

use crate::SharedState;
pub use webhook::handle_webhook;

/// Builds the router. The hook is mounted at the configured `hook_path`.
pub fn create_router(state: SharedState) -> Router {
    let hook_path = state.config.hook_path.clone();
    Router::new()
        .route("/", get(root))
        .route(&hook_path, post(handle_webhook))
        .with_state(state)
}

/// Root health check endpoint
/// Supports ?format=json for detailed JSON response
pub async fn root(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if params.get("format").map(String::as_str) == Some("json") {
        Json(json!({
            "name": "simple_git_deploy",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": state.start_time.elapsed().as_secs(),
            "status": "healthy"
        }))
        .into_response()
    } else {
        "simple_git_deploy - healthy".into_response()
    }
}
