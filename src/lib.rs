// =============================================================================
// Pulse — live market-ticker relay and terminal viewer
// =============================================================================

pub mod api;
pub mod app_state;
pub mod binance;
pub mod broadcast;
pub mod market_data;
pub mod runtime_config;
pub mod types;
pub mod universe;
pub mod viewer;
