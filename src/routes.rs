use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::peer::websocket_handler;
use crate::shared::AppState;

/// Builds the service router
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws/:room_id", get(websocket_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// GET /health
pub async fn health_handler(State(app_state): State<AppState>) -> Json<Value> {
    let status = if app_state.watcher.is_shutting_down() {
        "shuttingDown"
    } else {
        "ok"
    };
    let rooms = app_state.watcher.len().await;

    Json(json!({
        "status": status,
        "rooms": rooms,
    }))
}
