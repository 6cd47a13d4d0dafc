// =============================================================================
// HTTP surface — Axum 0.7
// =============================================================================
//
//   GET /             live stream (WebSocket upgrade)
//   GET /ws           same, explicit path
//   GET /api/klines   history passthrough
//   GET /health       relay status
//
// CORS admits only the configured dashboard origin, GET/OPTIONS, and the
// Content-Type header.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::{header, HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::api::{history, ws};
use crate::app_state::AppState;

// =============================================================================
// Router construction
// =============================================================================

/// Build the relay router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.relay.allowed_origin);

    Router::new()
        .route("/", get(ws::ws_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/api/klines", get(history::klines))
        .route("/health", get(health))
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    match HeaderValue::from_str(origin) {
        Ok(value) => base.allow_origin(AllowOrigin::exact(value)),
        Err(e) => {
            warn!(origin, error = %e, "invalid CORS origin — cross-origin requests disabled");
            base
        }
    }
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Query;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tokio::sync::watch;
    use tower::ServiceExt;

    use crate::runtime_config::RuntimeConfig;
    use crate::types::UpstreamState;

    /// Stand-in for the exchange REST API on an ephemeral local port.
    async fn fake_exchange() -> String {
        async fn klines(Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
            let bad_limit = q.get("limit").is_some_and(|l| l.parse::<u32>().is_err());
            if bad_limit || q.get("symbol").map(String::as_str) == Some("FAILUSDT") {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"code": -1121, "msg": "Invalid symbol."})),
                );
            }
            (
                StatusCode::OK,
                Json(json!([[
                    1700000000000i64,
                    "1.0",
                    "1.0",
                    "1.0",
                    "2.5",
                    "10",
                    1700000059999i64,
                    q.get("interval").cloned().unwrap_or_default(),
                    q.get("limit").cloned().unwrap_or_default()
                ]])),
            )
        }

        let app = Router::new().route("/api/v3/klines", axum::routing::get(klines));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn app(rest_base_url: String) -> Router {
        let mut config = RuntimeConfig::default();
        config.relay.rest_base_url = rest_base_url;
        let (_tx, rx) = watch::channel(UpstreamState::Disconnected);
        router(Arc::new(AppState::new(config, rx).unwrap()))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn klines_rejects_bad_symbol_with_400() {
        let (status, body) = get_json(app("http://127.0.0.1:1".into()), "/api/klines?symbol=ETHBTC").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Invalid symbol format"}));

        let (status, _) = get_json(app("http://127.0.0.1:1".into()), "/api/klines").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn klines_forwards_verbatim_with_defaults() {
        let base = fake_exchange().await;
        let (status, body) = get_json(app(base), "/api/klines?symbol=btcusdt").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0][4], json!("2.5"));
        assert_eq!(body[0][7], json!("1h"));
        assert_eq!(body[0][8], json!("24"));
    }

    #[tokio::test]
    async fn klines_passes_interval_and_limit() {
        let base = fake_exchange().await;
        let (_, body) = get_json(app(base), "/api/klines?symbol=SOLUSDT&interval=1m&limit=60").await;
        assert_eq!(body[0][7], json!("1m"));
        assert_eq!(body[0][8], json!("60"));
    }

    #[tokio::test]
    async fn non_numeric_limit_keeps_json_error_contract() {
        let base = fake_exchange().await;
        let (status, body) = get_json(app(base), "/api/klines?symbol=BTCUSDT&limit=abc").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Failed to fetch Binance data"}));
    }

    #[tokio::test]
    async fn upstream_failure_maps_to_500() {
        let base = fake_exchange().await;
        let (status, body) = get_json(app(base), "/api/klines?symbol=FAILUSDT").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Failed to fetch Binance data"}));

        let (status, _) = get_json(app("http://127.0.0.1:1".into()), "/api/klines?symbol=BTCUSDT").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn health_lists_instruments() {
        let (status, body) = get_json(app("http://127.0.0.1:1".into()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));
        assert_eq!(body["upstream"], json!("disconnected"));
        assert_eq!(body["instruments"], json!(10));
    }
}
