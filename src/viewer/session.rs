// =============================================================================
// Viewer Session — relay connection, history fetches and user commands
// =============================================================================
//
// One loop owns the reconciliation engine. It multiplexes:
//   - frames from the relay WebSocket,
//   - completed history fetches (spawned as tasks),
//   - the periodic chart refresh,
//   - commands typed on stdin.
//
// When the relay connection drops, the dashboard shows "disconnected" and the
// session redials after a fixed delay. Rows and history survive reconnects.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::binance::{decode_kline_closes, KlineClose};
use crate::runtime_config::ViewerSettings;
use crate::viewer::engine::{HistoryFetch, ReconciliationEngine};
use crate::viewer::favorites::FavoriteStore;
use crate::viewer::render::render_dashboard;

// ---------------------------------------------------------------------------
// History client
// ---------------------------------------------------------------------------

/// Fetches candle history through the relay's `/api/klines` passthrough.
#[derive(Debug, Clone)]
pub struct HistoryClient {
    base_url: String,
    interval: String,
    limit: u32,
    client: reqwest::Client,
}

impl HistoryClient {
    pub fn new(settings: &ViewerSettings, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            base_url: settings.relay_url.trim_end_matches('/').to_string(),
            interval: settings.history_interval.clone(),
            limit: settings.history_limit,
            client,
        })
    }

    pub async fn fetch(&self, symbol: &str) -> Result<Vec<KlineClose>> {
        let url = format!("{}/api/klines", self.base_url);
        let limit = self.limit.to_string();

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", self.interval.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .context("GET /api/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse /api/klines response")?;

        if !status.is_success() {
            anyhow::bail!("relay /api/klines returned {}: {}", status, body);
        }
        decode_kline_closes(&body)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ToggleFavorite(String),
    Chart(String),
    Quit,
}

/// Parse one input line: `fav <SYMBOL>`, `chart <SYMBOL>` or `q`.
pub fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?.to_lowercase();
    let arg = parts.next().map(str::to_uppercase);
    if parts.next().is_some() {
        return None;
    }
    match (verb.as_str(), arg) {
        ("fav" | "f", Some(symbol)) => Some(Command::ToggleFavorite(symbol)),
        ("chart" | "c", Some(symbol)) => Some(Command::Chart(symbol)),
        ("q" | "quit" | "exit", None) => Some(Command::Quit),
        _ => None,
    }
}

/// Read commands from stdin on a background task.
pub fn spawn_stdin_commands() -> mpsc::Receiver<Command> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_command(&line) {
                        Some(cmd) => {
                            if tx.send(cmd).await.is_err() {
                                break;
                            }
                        }
                        None => warn!(input = %line.trim(), "unknown command (fav <SYM> | chart <SYM> | q)"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });
    rx
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

type FetchResult = (HistoryFetch, Result<Vec<KlineClose>>);

enum StreamExit {
    Closed,
    Quit,
}

pub struct ViewerSession {
    settings: ViewerSettings,
    engine: ReconciliationEngine,
    history: HistoryClient,
    favorites: FavoriteStore,
    selected: Option<String>,
    fetch_tx: mpsc::UnboundedSender<FetchResult>,
    fetch_rx: mpsc::UnboundedReceiver<FetchResult>,
    connected_tx: watch::Sender<bool>,
    commands_open: bool,
}

impl ViewerSession {
    pub fn new(
        settings: ViewerSettings,
        engine: ReconciliationEngine,
        history: HistoryClient,
        favorites: FavoriteStore,
    ) -> Self {
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let (connected_tx, _) = watch::channel(false);
        Self {
            settings,
            engine,
            history,
            favorites,
            selected: None,
            fetch_tx,
            fetch_rx,
            connected_tx,
            commands_open: true,
        }
    }

    /// Observe the relay connection indicator.
    pub fn connection(&self) -> watch::Receiver<bool> {
        self.connected_tx.subscribe()
    }

    fn set_connected(&mut self, connected: bool) {
        self.engine.set_connected(connected);
        self.connected_tx.send_replace(connected);
        self.redraw();
    }

    /// Run until a quit command is received, then hand back the engine.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<ReconciliationEngine> {
        let url = self.settings.relay_ws_url();
        loop {
            info!(url = %url, "connecting to relay");
            match connect_async(&url).await {
                Ok((ws, _response)) => {
                    info!("relay connected");
                    self.set_connected(true);

                    match self.stream(ws, &mut commands).await {
                        Ok(StreamExit::Quit) => return Ok(self.engine),
                        Ok(StreamExit::Closed) => warn!("relay stream ended"),
                        Err(e) => error!(error = %e, "relay stream error"),
                    }
                }
                Err(e) => error!(error = %e, "relay connect failed"),
            }

            self.set_connected(false);

            warn!(delay = ?self.settings.reconnect_delay(), "reconnecting to relay after delay");
            if self.wait_for_redial(&mut commands).await {
                return Ok(self.engine);
            }
        }
    }

    async fn stream<S>(&mut self, mut ws: S, commands: &mut mpsc::Receiver<Command>) -> Result<StreamExit>
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let mut refresh = tokio::time::interval(self.settings.refresh_interval());
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        refresh.tick().await;

        loop {
            tokio::select! {
                msg = ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match self.engine.apply_frame(&text, Local::now()) {
                                Ok(applied) => {
                                    debug!(applied, "relay frame applied");
                                    self.request_pending_history();
                                    self.redraw();
                                }
                                Err(e) => warn!(error = %e, "dropping malformed relay frame"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(StreamExit::Closed),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(anyhow::Error::new(e).context("relay read error")),
                    }
                }

                Some((fetch, result)) = self.fetch_rx.recv() => {
                    self.on_history(fetch, result);
                }

                _ = refresh.tick() => {
                    if self.engine.refresh(Local::now()) > 0 {
                        self.redraw();
                    }
                }

                cmd = commands.recv(), if self.commands_open => {
                    if self.on_command(cmd) {
                        return Ok(StreamExit::Quit);
                    }
                }
            }
        }
    }

    /// Sleep out the reconnect delay while still serving commands and
    /// in-flight history results. Returns `true` on quit.
    async fn wait_for_redial(&mut self, commands: &mut mpsc::Receiver<Command>) -> bool {
        let sleep = tokio::time::sleep(self.settings.reconnect_delay());
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                Some((fetch, result)) = self.fetch_rx.recv() => self.on_history(fetch, result),
                cmd = commands.recv(), if self.commands_open => {
                    if self.on_command(cmd) {
                        return true;
                    }
                }
            }
        }
    }

    /// Returns `true` when the session should stop.
    fn on_command(&mut self, cmd: Option<Command>) -> bool {
        match cmd {
            Some(Command::ToggleFavorite(symbol)) => {
                let now_favorite = self.engine.toggle_favorite(&symbol);
                info!(symbol = %symbol, favorite = now_favorite, "favorite toggled");
                if let Err(e) = self.favorites.save(self.engine.favorites()) {
                    error!(error = %e, "failed to save favorites");
                }
                self.redraw();
                false
            }
            Some(Command::Chart(symbol)) => {
                let fetch = self.engine.select(&symbol);
                self.selected = Some(fetch.symbol.clone());
                self.spawn_fetch(fetch);
                self.redraw();
                false
            }
            Some(Command::Quit) => {
                info!("quit requested");
                true
            }
            None => {
                debug!("command input closed");
                self.commands_open = false;
                false
            }
        }
    }

    fn on_history(&mut self, fetch: HistoryFetch, result: Result<Vec<KlineClose>>) {
        match result {
            Ok(closes) => {
                if self.engine.apply_history(&fetch, &closes) {
                    debug!(symbol = %fetch.symbol, points = closes.len(), "history loaded");
                }
            }
            Err(e) => {
                warn!(symbol = %fetch.symbol, error = %e, "history fetch failed");
                self.engine.history_failed(&fetch);
            }
        }
        if self.selected.as_deref() == Some(fetch.symbol.as_str()) {
            self.redraw();
        }
    }

    fn request_pending_history(&mut self) {
        for fetch in self.engine.pending_history() {
            if self.selected.is_none() {
                self.selected = Some(fetch.symbol.clone());
            }
            self.spawn_fetch(fetch);
        }
    }

    fn spawn_fetch(&self, fetch: HistoryFetch) {
        let client = self.history.clone();
        let tx = self.fetch_tx.clone();
        tokio::spawn(async move {
            let result = client.fetch(&fetch.symbol).await;
            let _ = tx.send((fetch, result));
        });
    }

    fn redraw(&self) {
        print!("\x1B[2J\x1B[H{}", render_dashboard(&self.engine, self.selected.as_deref()));
    }
}
