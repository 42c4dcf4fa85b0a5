use crate::metrics::MetricsSnapshot;
use crate::state::AppState;
use axum::{Json, extract::State};
use serde_json::{Value, json};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn stats(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.hub.stats())
}
