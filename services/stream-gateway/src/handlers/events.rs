use crate::error::AppError;
use crate::events::EventBatch;
use crate::state::AppState;
use axum::{
    Json,
    extract::{FromRequestParts, State, rejection::JsonRejection},
    http::{StatusCode, request::Parts},
};
use serde_json::{Value, json};

pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// A request from a trusted event producer.
///
/// Passes unconditionally when no `internal_token` is configured; the
/// internal listener's bind address is then the only guard.
pub struct InternalCaller;

impl FromRequestParts<AppState> for InternalCaller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.hub.config.internal_token.as_deref() else {
            return Ok(InternalCaller);
        };

        let presented = parts
            .headers
            .get(INTERNAL_TOKEN_HEADER)
            .ok_or_else(|| AppError::Unauthorized("Missing internal token".into()))?
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid internal token header".into()))?;

        if presented != expected {
            tracing::warn!("Rejected event ingest with wrong internal token");
            return Err(AppError::Unauthorized("Invalid internal token".into()));
        }
        Ok(InternalCaller)
    }
}

/// Accept domain events from internal producers and queue them for fan-out.
pub async fn ingest(
    _caller: InternalCaller,
    State(state): State<AppState>,
    payload: Result<Json<EventBatch>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let Json(batch) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let events = batch.into_vec();
    let accepted = events.len();

    for event in events {
        state.events.send(event).await.map_err(|_| {
            AppError::ServiceUnavailable("event fan-out is not running".to_string())
        })?;
    }

    tracing::debug!(accepted, "Events ingested");
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": accepted }))))
}
