use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

use super::app_state::AppState;
use super::ws_handler;

/// Build the axum router: the WebSocket endpoint, a health probe, and the
/// static page with an index.html fallback.
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.server.static_dir.clone();
    let index = Path::new(&static_dir).join("index.html");

    Router::new()
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade))
        .route("/api/health", axum::routing::get(health))
        .fallback_service(ServeDir::new(&static_dir).fallback(ServeFile::new(index)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check with live table sizes.
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.engine.session_count(),
        "rooms": state.engine.room_count(),
    }))
}
