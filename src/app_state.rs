// =============================================================================
// Relay Application State
// =============================================================================
//
// Owned service objects shared by the HTTP handlers, WebSocket connections
// and the ingestor via `Arc<AppState>`. Lifetime is process start to
// shutdown; nothing here is a module-level global.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::watch;

use crate::binance::BinanceClient;
use crate::broadcast::SubscriberHub;
use crate::market_data::LiveStateStore;
use crate::runtime_config::RuntimeConfig;
use crate::types::UpstreamState;
use crate::universe::Universe;

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub upstream: UpstreamState,
    pub subscribers: usize,
    pub instruments: usize,
    pub server_time: i64,
}

pub struct AppState {
    pub config: RuntimeConfig,
    pub universe: Arc<Universe>,
    pub live_state: Arc<LiveStateStore>,
    pub hub: Arc<SubscriberHub>,
    pub binance: BinanceClient,
    /// Per-write timeout applied by each subscriber connection.
    pub send_timeout: Duration,
    upstream: watch::Receiver<UpstreamState>,
}

impl AppState {
    /// Build the relay's service objects from `config`.
    ///
    /// `upstream` is the ingestor's state channel; pass a fresh
    /// `watch::channel` receiver where no ingestor runs.
    pub fn new(config: RuntimeConfig, upstream: watch::Receiver<UpstreamState>) -> Result<Self> {
        let universe = Arc::new(config.universe()?);
        let live_state = Arc::new(LiveStateStore::new(universe.clone()));
        let hub = Arc::new(SubscriberHub::new(
            live_state.clone(),
            config.relay.subscriber_queue_capacity,
        ));
        let binance = BinanceClient::new(&config.relay.rest_base_url, config.relay.http_timeout())?;
        let send_timeout = config.relay.send_timeout();

        Ok(Self {
            config,
            universe,
            live_state,
            hub,
            binance,
            send_timeout,
            upstream,
        })
    }

    /// Attach the ingestor's state channel once it has been built.
    pub fn set_upstream(&mut self, upstream: watch::Receiver<UpstreamState>) {
        self.upstream = upstream;
    }

    pub fn upstream_state(&self) -> UpstreamState {
        *self.upstream.borrow()
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: "ok",
            upstream: self.upstream_state(),
            subscribers: self.hub.subscriber_count(),
            instruments: self.universe.len(),
            server_time: chrono::Utc::now().timestamp_millis(),
        }
    }
}
