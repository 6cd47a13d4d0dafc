// =============================================================================
// History Passthrough — validated forward of candle requests
// =============================================================================
//
// `GET /api/klines?symbol=BTCUSDT&interval=1h&limit=24`
//
// Stateless: no caching, no retry. The upstream body is relayed verbatim.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::app_state::AppState;
use crate::universe::QUOTE_SUFFIX;

pub const DEFAULT_INTERVAL: &str = "1h";
pub const DEFAULT_LIMIT: &str = "24";

#[derive(Debug, Deserialize)]
pub struct KlinesQuery {
    pub symbol: Option<String>,
    pub interval: Option<String>,
    /// Forwarded as-is; the exchange validates it.
    pub limit: Option<String>,
}

/// Validated candle request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub symbol: String,
    pub interval: String,
    pub limit: String,
}

impl TryFrom<KlinesQuery> for HistoryRequest {
    type Error = HistoryError;

    fn try_from(query: KlinesQuery) -> Result<Self, Self::Error> {
        let symbol = query
            .symbol
            .map(|s| s.trim().to_uppercase())
            .filter(|s| s.ends_with(QUOTE_SUFFIX))
            .ok_or(HistoryError::InvalidSymbol)?;

        Ok(Self {
            symbol,
            interval: query
                .interval
                .filter(|i| !i.is_empty())
                .unwrap_or_else(|| DEFAULT_INTERVAL.to_string()),
            limit: query
                .limit
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| DEFAULT_LIMIT.to_string()),
        })
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Invalid symbol format")]
    InvalidSymbol,

    #[error("Failed to fetch Binance data")]
    Upstream(#[source] anyhow::Error),
}

impl IntoResponse for HistoryError {
    fn into_response(self) -> Response {
        let status = match &self {
            HistoryError::InvalidSymbol => StatusCode::BAD_REQUEST,
            HistoryError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub async fn klines(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KlinesQuery>,
) -> Result<Json<serde_json::Value>, HistoryError> {
    let request = HistoryRequest::try_from(query).inspect_err(|_| {
        warn!("klines request rejected: invalid symbol");
    })?;

    state
        .binance
        .get_klines_raw(&request.symbol, &request.interval, &request.limit)
        .await
        .map(Json)
        .map_err(|e| {
            error!(symbol = %request.symbol, error = %e, "Binance API error");
            HistoryError::Upstream(e)
        })
}
