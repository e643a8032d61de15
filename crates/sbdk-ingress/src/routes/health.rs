//! Health check endpoint

use super::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let build = state.coordinator.state();
    Json(json!({
        "status": "healthy",
        "service": "sbdk",
        "build_state": build.name(),
        "running": build.running().map(|t| t.id.to_string()),
        "queued": build.queued().map(|t| t.id.to_string()),
        "builds_started": state.coordinator.builds_started(),
    }))
}
