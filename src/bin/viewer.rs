// =============================================================================
// Pulse Viewer — terminal dashboard client
// =============================================================================
//
// Commands (stdin): `fav <SYMBOL>`, `chart <SYMBOL>`, `q`.
// =============================================================================

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use pulse_relay::runtime_config::RuntimeConfig;
use pulse_relay::viewer::session::spawn_stdin_commands;
use pulse_relay::viewer::{FavoriteStore, HistoryClient, ReconciliationEngine, ViewerSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    // Logs go to stderr so they don't interleave with the dashboard.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = RuntimeConfig::from_env();
    let universe = Arc::new(config.universe()?);
    let settings = config.viewer.clone();

    let favorites = FavoriteStore::new(&settings.favorites_path);
    let engine = ReconciliationEngine::new(
        universe,
        favorites.load(),
        settings.history_limit as usize,
    );
    let history = HistoryClient::new(&settings, config.relay.http_timeout())?;

    info!(relay = %settings.relay_url, "Pulse Viewer starting");
    ViewerSession::new(settings, engine, history, favorites)
        .run(spawn_stdin_commands())
        .await?;
    Ok(())
}
