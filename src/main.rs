// =============================================================================
// Pulse Relay — Main Entry Point
// =============================================================================
//
// One upstream ticker subscription, fanned out to every connected viewer.
// The candle passthrough shares the same HTTP listener.
// =============================================================================

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pulse_relay::api;
use pulse_relay::app_state::AppState;
use pulse_relay::market_data::{BinanceTickerFeed, Ingestor};
use pulse_relay::runtime_config::RuntimeConfig;
use pulse_relay::types::UpstreamState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Pulse Relay — Starting Up                        ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = RuntimeConfig::from_env();
    info!(symbols = ?config.symbols, "Configured instruments");

    // ── 2. Build shared state ────────────────────────────────────────────
    let (_placeholder_tx, placeholder_rx) = watch::channel(UpstreamState::Disconnected);
    let mut state = AppState::new(config, placeholder_rx)?;

    // ── 3. Upstream ingestor ─────────────────────────────────────────────
    let relay = &state.config.relay;
    let ingestor = Ingestor::new(
        BinanceTickerFeed::new(&relay.upstream_ws_url),
        state.live_state.clone(),
        state.hub.clone(),
    )
    .with_reconnect_delay(relay.reconnect_delay())
    .with_reseed_policy(relay.reseed_policy)
    .with_forward_empty_batches(relay.forward_empty_batches);

    state.set_upstream(ingestor.state());
    let state = Arc::new(state);

    tokio::spawn(ingestor.run());
    info!(instruments = state.universe.len(), "Ticker ingestor launched");

    // ── 4. API server ────────────────────────────────────────────────────
    let bind_addr = state.config.relay.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(state.clone());

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            warn!("Shutdown signal received — stopping gracefully");
        })
        .await?;

    info!("Pulse Relay shut down complete.");
    Ok(())
}
