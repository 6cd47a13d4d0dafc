// =============================================================================
// Binance REST API Client — public market-data endpoints
// =============================================================================
//
// Only unsigned endpoints are used: the relay forwards candle requests and
// never trades, so no API key or secret is configured.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

/// Slot of the open time (ms) in a kline tuple.
pub const KLINE_OPEN_TIME: usize = 0;
/// Slot of the close price in a kline tuple.
pub const KLINE_CLOSE: usize = 4;

/// Binance REST API client for public market data.
#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `BinanceClient` against `base_url`
    /// (e.g. `https://api.binance.com`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, "BinanceClient initialised");

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/klines (public — no signature required).
    ///
    /// The response body is returned untouched so it can be relayed verbatim.
    #[instrument(skip(self), name = "binance::get_klines_raw")]
    pub async fn get_klines_raw(
        &self,
        symbol: &str,
        interval: &str,
        limit: &str,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/api/v3/klines", self.base_url);

        let resp = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("interval", interval), ("limit", limit)])
            .send()
            .await
            .context("GET /api/v3/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /api/v3/klines returned {}: {}", status, body);
        }

        debug!(
            symbol,
            interval,
            count = body.as_array().map_or(0, Vec::len),
            "klines fetched"
        );
        Ok(body)
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// -------------------------------------------------------------------------
// Kline decoding
// -------------------------------------------------------------------------

/// Open time and close price of one candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KlineClose {
    pub open_time_ms: i64,
    pub close: f64,
}

/// Decode Binance's array-of-arrays kline response, keeping only the open
/// time and close price of each entry.
///
/// Array indices:
///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume, ...
pub fn decode_kline_closes(body: &serde_json::Value) -> Result<Vec<KlineClose>> {
    let raw = body.as_array().context("klines response is not an array")?;

    let mut out = Vec::with_capacity(raw.len());
    for entry in raw {
        let arr = entry.as_array().context("kline entry is not an array")?;

        if arr.len() <= KLINE_CLOSE {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let open_time_ms = arr[KLINE_OPEN_TIME]
            .as_i64()
            .context("kline open time is not an integer")?;
        let close = parse_str_f64(&arr[KLINE_CLOSE])?;
        out.push(KlineClose { open_time_ms, close });
    }
    Ok(out)
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_open_time_and_close() {
        let body = json!([
            [1700000000000i64, "37000.0", "37050.0", "36990.0", "37020.5", "12.3", 1700000059999i64],
            [1700000060000i64, "37020.5", "37030.0", "37000.0", 37010.25, "8.0", 1700000119999i64]
        ]);
        let closes = decode_kline_closes(&body).unwrap();
        assert_eq!(
            closes,
            vec![
                KlineClose { open_time_ms: 1_700_000_000_000, close: 37_020.5 },
                KlineClose { open_time_ms: 1_700_000_060_000, close: 37_010.25 },
            ]
        );
    }

    #[test]
    fn short_entries_are_skipped() {
        let body = json!([[1700000000000i64, "1.0"], [1700000060000i64, "1", "1", "1", "2.5"]]);
        let closes = decode_kline_closes(&body).unwrap();
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].close, 2.5);
    }

    #[test]
    fn non_array_body_is_an_error() {
        assert!(decode_kline_closes(&json!({"code": -1121, "msg": "Invalid symbol."})).is_err());
        assert!(decode_kline_closes(&json!([[1, "x", "x", "x", "abc"]])).is_err());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = BinanceClient::new("http://127.0.0.1:1/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:1");
    }
}
