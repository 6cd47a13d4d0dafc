// =============================================================================
// Runtime Configuration — JSON file + environment overrides
// =============================================================================
//
// Shared by the relay and the viewer. All fields carry `#[serde(default)]` so
// that a partial (or missing) config file still yields a usable setup.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::universe::Universe;

/// Config file read when `PULSE_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "pulse_config.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    [
        "BTCUSDT", "ETHUSDT", "BNBUSDT", "SOLUSDT", "XRPUSDT", "ADAUSDT", "DOGEUSDT", "AVAXUSDT",
        "DOTUSDT", "LINKUSDT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_upstream_ws_url() -> String {
    "wss://stream.binance.com:9443/ws/!ticker@arr".to_string()
}

fn default_rest_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_allowed_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_subscriber_queue_capacity() -> usize {
    64
}

fn default_send_timeout_ms() -> u64 {
    2000
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_relay_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_history_interval() -> String {
    "1m".to_string()
}

fn default_history_limit() -> u32 {
    60
}

fn default_refresh_interval_secs() -> u64 {
    5
}

fn default_favorites_path() -> String {
    "favorites.json".to_string()
}

// =============================================================================
// ReseedPolicy
// =============================================================================

/// What the ingestor writes into the live state store on each (re)connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReseedPolicy {
    /// Sentinel only for instruments that have no entry yet.
    #[default]
    MissingOnly,
    /// Overwrite every instrument with the sentinel.
    ResetAll,
}

// =============================================================================
// RelaySettings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Listen address for the HTTP + WebSocket server.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Full-market ticker stream.
    #[serde(default = "default_upstream_ws_url")]
    pub upstream_ws_url: String,

    /// Base URL of the exchange REST API (candles).
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    /// Fixed wait between upstream reconnect attempts.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Frames buffered per subscriber before it is considered too slow.
    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,

    /// Upper bound on a single WebSocket write to a subscriber.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Forward batches that contain no tracked instruments.
    #[serde(default = "default_true")]
    pub forward_empty_batches: bool,

    #[serde(default)]
    pub reseed_policy: ReseedPolicy,

    /// CORS origin allowed to call the REST endpoints.
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,

    /// Timeout for upstream REST calls.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            upstream_ws_url: default_upstream_ws_url(),
            rest_base_url: default_rest_base_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
            send_timeout_ms: default_send_timeout_ms(),
            forward_empty_batches: true,
            reseed_policy: ReseedPolicy::default(),
            allowed_origin: default_allowed_origin(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl RelaySettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

// =============================================================================
// ViewerSettings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerSettings {
    /// Relay base URL; the WebSocket URL is derived from it.
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Candle interval requested for each history buffer.
    #[serde(default = "default_history_interval")]
    pub history_interval: String,

    /// History window size (points per instrument).
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,

    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_favorites_path")]
    pub favorites_path: String,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            history_interval: default_history_interval(),
            history_limit: default_history_limit(),
            refresh_interval_secs: default_refresh_interval_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            favorites_path: default_favorites_path(),
        }
    }
}

impl ViewerSettings {
    /// `http://host` → `ws://host/`, `https://host` → `wss://host/`.
    pub fn relay_ws_url(&self) -> String {
        let base = self.relay_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}/")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}/")
        } else {
            format!("{base}/")
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Tracked instruments, in display order.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub viewer: ViewerSettings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            relay: RelaySettings::default(),
            viewer: ViewerSettings::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Load from `PULSE_CONFIG` (or the default path), falling back to
    /// defaults, then apply environment overrides.
    pub fn from_env() -> Self {
        let path =
            std::env::var("PULSE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = Self::load(&path).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            Self::default()
        });
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `PULSE_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(syms) = lookup("PULSE_SYMBOLS") {
            let parsed: Vec<String> = syms
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.symbols = parsed;
            }
        }
        if let Some(addr) = lookup("PULSE_BIND_ADDR") {
            self.relay.bind_addr = addr;
        }
        if let Some(url) = lookup("PULSE_RELAY_URL") {
            self.viewer.relay_url = url;
        }
        if let Some(path) = lookup("PULSE_FAVORITES_PATH") {
            self.viewer.favorites_path = path;
        }
    }

    /// Validate and build the instrument universe.
    pub fn universe(&self) -> Result<Universe> {
        Universe::new(&self.symbols).context("invalid symbols in runtime config")
    }
}
