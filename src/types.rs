// =============================================================================
// Shared types used across the relay and the viewer
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One record of the upstream `!ticker@arr` feed.
///
/// Binance sends dozens of fields per record; only the symbol (`s`), last
/// price (`c`) and 24h percent change (`P`) are read. Everything else is
/// ignored by serde.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTicker {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub last_price: String,
    #[serde(rename = "P")]
    pub change_pct: String,
}

/// Latest known state of one instrument, as held by the live state store.
///
/// Replaced wholesale on every update; never merged field by field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LiveTick {
    pub price: f64,
    pub change_24h_pct: f64,
    /// Relay receipt time. Exchange-side event times are not trusted.
    pub received_at: DateTime<Utc>,
}

impl LiveTick {
    pub fn new(price: f64, change_24h_pct: f64) -> Self {
        Self {
            price,
            change_24h_pct,
            received_at: Utc::now(),
        }
    }

    /// Placeholder written for instruments that have not ticked yet.
    pub fn sentinel() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn is_sentinel(&self) -> bool {
        self.price == 0.0 && self.change_24h_pct == 0.0
    }
}

/// Record shape pushed to subscribers, both in snapshots and live batches.
///
/// Numbers travel as strings, matching the upstream convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTicker {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub price: String,
    #[serde(rename = "P")]
    pub change_pct: String,
}

impl WireTicker {
    pub fn from_tick(symbol: impl Into<String>, tick: &LiveTick) -> Self {
        Self {
            symbol: symbol.into(),
            price: tick.price.to_string(),
            change_pct: tick.change_24h_pct.to_string(),
        }
    }
}

/// Connection state of the single upstream feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for UpstreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}
