use crate::handlers::{events, system, ws};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Client-facing routes, served on `bind_addr`.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/stats", get(system::stats))
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .route("/health", get(system::health))
        .nest("/v1", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Event-ingest routes for trusted producers, served on `internal_bind_addr`.
/// No CORS layer: browsers must never be able to reach these.
pub fn create_internal_router(state: AppState) -> Router {
    let internal_routes = Router::new().route("/events", post(events::ingest));

    Router::new()
        .route("/health", get(system::health))
        .nest("/internal", internal_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAccountOracle;
    use crate::config::HubConfig;
    use crate::events::DomainEvent;
    use crate::handlers::events::INTERNAL_TOKEN_HEADER;
    use crate::hub::Hub;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use types::ids::AccountId;

    fn state_with(config: HubConfig) -> (AppState, mpsc::Receiver<DomainEvent>) {
        let hub = Hub::new(&config, Arc::new(StaticAccountOracle::default())).unwrap();
        let (tx, rx) = mpsc::channel(16);
        (AppState::new(hub, tx), rx)
    }

    fn app() -> (Router, mpsc::Receiver<DomainEvent>) {
        let (state, rx) = state_with(HubConfig::default());
        (create_router(state), rx)
    }

    fn internal_app(token: Option<&str>) -> (Router, mpsc::Receiver<DomainEvent>) {
        let (state, rx) = state_with(HubConfig {
            internal_token: token.map(str::to_string),
            ..HubConfig::default()
        });
        (create_internal_router(state), rx)
    }

    fn forged_withdrawal() -> String {
        json!({
            "pair": "BTC_USD_PERP",
            "category": "withdrawal_completed",
            "account_id": AccountId::new(),
            "payload": {"amount": "1000000"}
        })
        .to_string()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _rx) = app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_stats() {
        let (app, _rx) = app();
        let response = app
            .oneshot(Request::get("/v1/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stats = body_json(response).await;
        assert_eq!(stats["live_connections"], 0);
    }

    #[tokio::test]
    async fn test_public_router_does_not_serve_event_ingest() {
        let (app, mut rx) = app();
        let response = app
            .oneshot(
                Request::post("/internal/events")
                    .header(header::ORIGIN, "https://evil.example")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(forged_withdrawal()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ingest_events() {
        let (app, mut rx) = internal_app(None);
        let body = json!([
            {"pair": "BTC_USD_PERP", "category": "ticker", "payload": {"last": "1"}},
            {"pair": "ETH_USD_PERP", "category": "depth", "payload": {}}
        ]);
        let response = app
            .clone()
            .oneshot(
                Request::post("/internal/events")
                    .header(header::ORIGIN, "https://evil.example")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
        assert_eq!(body_json(response).await, json!({"accepted": 2}));
        assert_eq!(rx.recv().await.unwrap().pair.as_str(), "BTC_USD_PERP");
        assert_eq!(rx.recv().await.unwrap().pair.as_str(), "ETH_USD_PERP");

        let response = app
            .oneshot(
                Request::post("/internal/events")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"pair":"btc","category":"ticker"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ingest_requires_configured_token() {
        let (app, mut rx) = internal_app(Some("s3cret"));

        for token in [None, Some("guess")] {
            let mut request = Request::post("/internal/events")
                .header(header::CONTENT_TYPE, "application/json");
            if let Some(token) = token {
                request = request.header(INTERNAL_TOKEN_HEADER, token);
            }
            let response = app
                .clone()
                .oneshot(request.body(Body::from(forged_withdrawal())).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_json(response).await["error"], "UNAUTHORIZED");
        }
        assert!(rx.try_recv().is_err());

        let response = app
            .oneshot(
                Request::post("/internal/events")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(INTERNAL_TOKEN_HEADER, "s3cret")
                    .body(Body::from(forged_withdrawal()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await.unwrap().category.as_str(), "withdrawal_completed");
    }
}
