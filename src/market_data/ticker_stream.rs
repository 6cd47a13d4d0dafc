// =============================================================================
// Ticker Stream Ingestor — single upstream subscription to `!ticker@arr`
// =============================================================================
//
// Owns the one upstream connection. Each inbound frame is parsed, filtered to
// the instrument universe, normalised into `LiveTick`s, written into the live
// state store and handed to the subscriber hub.
//
// Reconnection is unconditional: after a close or error the ingestor waits a
// fixed delay and dials again, forever. Dialling happens in a single loop, so
// there is never more than one upstream connection alive.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::broadcast::SubscriberHub;
use crate::market_data::LiveStateStore;
use crate::runtime_config::ReseedPolicy;
use crate::types::{LiveTick, RawTicker, UpstreamState, WireTicker};
use crate::universe::Universe;

// ---------------------------------------------------------------------------
// Feed abstraction
// ---------------------------------------------------------------------------

/// Text frames from one upstream session; ends when the session closes.
pub type FrameStream = BoxStream<'static, Result<String>>;

/// Something the ingestor can dial to obtain a stream of ticker frames.
pub trait TickerFeed: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<FrameStream>>;
}

/// The Binance WebSocket feed.
pub struct BinanceTickerFeed {
    url: String,
}

impl BinanceTickerFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl TickerFeed for BinanceTickerFeed {
    fn connect(&self) -> BoxFuture<'_, Result<FrameStream>> {
        async move {
            info!(url = %self.url, "connecting to ticker WebSocket");
            let (ws_stream, _response) = connect_async(&self.url)
                .await
                .context("failed to connect to ticker WebSocket")?;

            let (_write, read) = ws_stream.split();
            // Ping / Pong / Binary / Close frames are skipped; tungstenite
            // answers pings itself and ends the stream after a close.
            let frames = read.filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(e) => Some(Err(anyhow::Error::new(e).context("ticker WebSocket read error"))),
                }
            });
            Ok(frames.boxed())
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Reconnect state machine
// ---------------------------------------------------------------------------

/// Events that move the upstream connection between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Start a connection attempt (initial start or delay elapsed).
    Dial,
    Opened,
    Closed,
    Failed,
}

impl UpstreamState {
    /// Transition table. Pairs not listed leave the state unchanged.
    pub fn on(self, event: UpstreamEvent) -> Self {
        use UpstreamEvent::*;
        use UpstreamState::*;
        match (self, event) {
            (Disconnected, Dial) => Connecting,
            (Connecting, Opened) => Connected,
            (Connecting, Failed) => Disconnected,
            (Connected, Closed | Failed) => Disconnected,
            (state, _) => state,
        }
    }
}

// ---------------------------------------------------------------------------
// Batch processing
// ---------------------------------------------------------------------------

/// Parse one upstream frame into filtered, normalised ticks.
///
/// Returns `Err` only when the frame is not a JSON array of ticker records;
/// individual records with unparseable numbers are skipped.
pub fn normalize_batch(text: &str, universe: &Universe) -> Result<Vec<(WireTicker, LiveTick)>> {
    let records: Vec<RawTicker> =
        serde_json::from_str(text).context("failed to parse ticker batch")?;

    let mut out = Vec::new();
    for raw in records {
        if !universe.admits(&raw.symbol) {
            continue;
        }
        let price = match raw.last_price.parse::<f64>() {
            Ok(p) => p,
            Err(e) => {
                warn!(symbol = %raw.symbol, value = %raw.last_price, error = %e, "bad last price — record skipped");
                continue;
            }
        };
        let change = match raw.change_pct.parse::<f64>() {
            Ok(c) => c,
            Err(e) => {
                warn!(symbol = %raw.symbol, value = %raw.change_pct, error = %e, "bad percent change — record skipped");
                continue;
            }
        };
        let tick = LiveTick::new(price, change);
        let wire = WireTicker {
            symbol: raw.symbol,
            price: raw.last_price,
            change_pct: raw.change_pct,
        };
        out.push((wire, tick));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

pub struct Ingestor<F> {
    feed: F,
    store: Arc<LiveStateStore>,
    hub: Arc<SubscriberHub>,
    reconnect_delay: Duration,
    reseed_policy: ReseedPolicy,
    forward_empty_batches: bool,
    state_tx: watch::Sender<UpstreamState>,
}

impl<F: TickerFeed> Ingestor<F> {
    /// Builds the ingestor and seeds sentinels for every instrument, so a
    /// subscriber arriving before the first upstream connect still gets a
    /// full snapshot.
    pub fn new(feed: F, store: Arc<LiveStateStore>, hub: Arc<SubscriberHub>) -> Self {
        let (state_tx, _) = watch::channel(UpstreamState::Disconnected);
        store.seed_sentinels(ReseedPolicy::MissingOnly);
        Self {
            feed,
            store,
            hub,
            reconnect_delay: Duration::from_secs(5),
            reseed_policy: ReseedPolicy::default(),
            forward_empty_batches: true,
            state_tx,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_reseed_policy(mut self, policy: ReseedPolicy) -> Self {
        self.reseed_policy = policy;
        self
    }

    pub fn with_forward_empty_batches(mut self, forward: bool) -> Self {
        self.forward_empty_batches = forward;
        self
    }

    /// Observe the upstream connection state.
    pub fn state(&self) -> watch::Receiver<UpstreamState> {
        self.state_tx.subscribe()
    }

    fn transition(&self, event: UpstreamEvent) {
        self.state_tx.send_modify(|state| {
            let next = state.on(event);
            if next != *state {
                debug!(from = %state, to = %next, ?event, "upstream state change");
            }
            *state = next;
        });
    }

    /// Run forever: dial, consume until the session ends, wait, repeat.
    pub async fn run(self) {
        loop {
            self.transition(UpstreamEvent::Dial);
            match self.feed.connect().await {
                Ok(frames) => {
                    self.transition(UpstreamEvent::Opened);
                    info!("ticker WebSocket connected");
                    self.store.seed_sentinels(self.reseed_policy);

                    match self.consume(frames).await {
                        Ok(()) => {
                            warn!("ticker WebSocket stream ended");
                            self.transition(UpstreamEvent::Closed);
                        }
                        Err(e) => {
                            error!(error = %e, "ticker WebSocket error");
                            self.transition(UpstreamEvent::Failed);
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "ticker WebSocket connect failed");
                    self.transition(UpstreamEvent::Failed);
                }
            }

            warn!(delay = ?self.reconnect_delay, "reconnecting to ticker stream after delay");
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn consume(&self, mut frames: FrameStream) -> Result<()> {
        while let Some(frame) = frames.next().await {
            let text = frame?;
            self.handle_frame(&text);
        }
        Ok(())
    }

    /// Process one upstream frame. A malformed frame is logged and dropped.
    pub fn handle_frame(&self, text: &str) {
        let batch = match normalize_batch(text, self.store.universe()) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "dropping malformed ticker batch");
                return;
            }
        };

        let mut wire = Vec::with_capacity(batch.len());
        for (record, tick) in batch {
            self.store.set(&record.symbol, tick);
            wire.push(record);
        }

        if wire.is_empty() && !self.forward_empty_batches {
            return;
        }
        self.hub.publish(&wire);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::stream;
    use parking_lot::Mutex;

    fn universe() -> Arc<Universe> {
        Arc::new(Universe::new(["BTCUSDT", "ETHUSDT", "SOLUSDT"]).unwrap())
    }

    fn relay(capacity: usize) -> (Arc<LiveStateStore>, Arc<SubscriberHub>) {
        let store = Arc::new(LiveStateStore::new(universe()));
        let hub = Arc::new(SubscriberHub::new(store.clone(), capacity));
        (store, hub)
    }

    /// Feed that replays scripted sessions, then never connects again.
    struct ScriptedFeed {
        sessions: Mutex<Vec<Vec<String>>>,
        dials: Arc<AtomicUsize>,
        dialed_at: Arc<Mutex<Vec<tokio::time::Instant>>>,
    }

    impl TickerFeed for ScriptedFeed {
        fn connect(&self) -> BoxFuture<'_, Result<FrameStream>> {
            async move {
                self.dials.fetch_add(1, Ordering::SeqCst);
                self.dialed_at.lock().push(tokio::time::Instant::now());
                let next = {
                    let mut sessions = self.sessions.lock();
                    if sessions.is_empty() {
                        None
                    } else {
                        Some(sessions.remove(0))
                    }
                };
                match next {
                    Some(frames) => Ok(stream::iter(frames.into_iter().map(Ok)).boxed()),
                    None => futures_util::future::pending().await,
                }
            }
            .boxed()
        }
    }

    const BATCH: &str = r#"[
        {"s":"BTCUSDT","c":"43250.10","P":"1.25"},
        {"s":"BTCUPUSDT","c":"9.1","P":"3.0"},
        {"s":"ETHBTC","c":"0.053","P":"-0.2"},
        {"s":"SOLUSDT","c":"101.5","P":"-2.10"}
    ]"#;

    #[test]
    fn filters_to_universe_spot_pairs() {
        let batch = normalize_batch(BATCH, &universe()).unwrap();
        let symbols: Vec<&str> = batch.iter().map(|(w, _)| w.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "SOLUSDT"]);
        assert_eq!(batch[0].1.price, 43_250.10);
        assert_eq!(batch[1].1.change_24h_pct, -2.10);
        assert_eq!(batch[1].0.price, "101.5");
    }

    #[test]
    fn unparseable_record_is_skipped() {
        let text = r#"[{"s":"BTCUSDT","c":"n/a","P":"1"},{"s":"ETHUSDT","c":"2300","P":"0.5"}]"#;
        let batch = normalize_batch(text, &universe()).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].0.symbol, "ETHUSDT");
    }

    #[test]
    fn malformed_frame_is_dropped_without_publishing() {
        let (store, hub) = relay(8);
        let ingestor = Ingestor::new(BinanceTickerFeed::new("wss://unused"), store.clone(), hub.clone());
        let mut sub = hub.register();
        let _snapshot = sub.frames.try_recv().unwrap();

        ingestor.handle_frame("{not json");
        assert!(sub.frames.try_recv().is_err());
        assert!(store.get_all().iter().all(|(_, tick)| tick.is_sentinel()));
    }

    #[test]
    fn subscriber_before_first_connect_gets_full_snapshot() {
        let (store, hub) = relay(8);
        let _ingestor = Ingestor::new(BinanceTickerFeed::new("wss://unused"), store, hub.clone());

        let mut sub = hub.register();
        assert_eq!(sub.snapshot_len, 3);
        let snapshot: Vec<WireTicker> =
            serde_json::from_str(&sub.frames.try_recv().unwrap()).unwrap();
        let symbols: Vec<&str> = snapshot.iter().map(|w| w.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
        assert!(snapshot.iter().all(|w| w.price == "0" && w.change_pct == "0"));
    }

    #[test]
    fn batch_updates_only_present_instruments() {
        let (store, hub) = relay(8);
        store.seed_sentinels(ReseedPolicy::MissingOnly);
        store.set("ETHUSDT", LiveTick::new(2300.0, 0.7));
        let ingestor = Ingestor::new(BinanceTickerFeed::new("wss://unused"), store.clone(), hub);

        ingestor.handle_frame(BATCH);
        assert_eq!(store.get("BTCUSDT").price, 43_250.10);
        assert_eq!(store.get("SOLUSDT").price, 101.5);
        assert_eq!(store.get("ETHUSDT").price, 2300.0);
    }

    #[test]
    fn empty_batches_follow_forwarding_flag() {
        let (store, hub) = relay(8);
        let mut sub = hub.register();
        let _snapshot = sub.frames.try_recv().unwrap();

        let forwarding = Ingestor::new(BinanceTickerFeed::new("wss://unused"), store.clone(), hub.clone());
        forwarding.handle_frame(r#"[{"s":"ETHBTC","c":"0.05","P":"0"}]"#);
        assert_eq!(&*sub.frames.try_recv().unwrap(), "[]");

        let silent = Ingestor::new(BinanceTickerFeed::new("wss://unused"), store, hub)
            .with_forward_empty_batches(false);
        silent.handle_frame("[]");
        assert!(sub.frames.try_recv().is_err());
    }

    #[test]
    fn state_machine_transitions() {
        use UpstreamEvent::*;
        let s = UpstreamState::Disconnected;
        assert_eq!(s.on(Dial), UpstreamState::Connecting);
        assert_eq!(s.on(Opened), UpstreamState::Disconnected);
        assert_eq!(s.on(Dial).on(Opened), UpstreamState::Connected);
        assert_eq!(s.on(Dial).on(Failed), UpstreamState::Disconnected);
        assert_eq!(s.on(Dial).on(Opened).on(Closed), UpstreamState::Disconnected);
        assert_eq!(s.on(Dial).on(Opened).on(Dial), UpstreamState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_once_after_fixed_delay_and_keeps_prices() {
        let (store, hub) = relay(8);
        let dials = Arc::new(AtomicUsize::new(0));
        let dialed_at = Arc::new(Mutex::new(Vec::new()));
        let feed = ScriptedFeed {
            // First session delivers one batch then closes; the second stays
            // open without frames.
            sessions: Mutex::new(vec![vec![BATCH.to_string()]]),
            dials: dials.clone(),
            dialed_at: dialed_at.clone(),
        };

        let ingestor = Ingestor::new(feed, store.clone(), hub)
            .with_reconnect_delay(Duration::from_secs(5))
            .with_reseed_policy(ReseedPolicy::MissingOnly);
        let mut state = ingestor.state();
        let task = tokio::spawn(ingestor.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(dials.load(Ordering::SeqCst), 1);
        assert_eq!(*state.borrow_and_update(), UpstreamState::Disconnected);
        assert_eq!(store.get("BTCUSDT").price, 43_250.10);
        assert!(store.get("ETHUSDT").is_sentinel());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(dials.load(Ordering::SeqCst), 2);
        assert_eq!(*state.borrow(), UpstreamState::Connecting);

        let times = dialed_at.lock().clone();
        let gap = times[1] - times[0];
        assert!(gap >= Duration::from_secs(5) && gap < Duration::from_secs(6));
        assert_eq!(store.get("BTCUSDT").price, 43_250.10);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn reset_all_policy_reseeds_on_reconnect() {
        let (store, hub) = relay(8);
        let feed = ScriptedFeed {
            sessions: Mutex::new(vec![vec![BATCH.to_string()], vec![]]),
            dials: Arc::new(AtomicUsize::new(0)),
            dialed_at: Arc::new(Mutex::new(Vec::new())),
        };

        let ingestor = Ingestor::new(feed, store.clone(), hub)
            .with_reconnect_delay(Duration::from_secs(5))
            .with_reseed_policy(ReseedPolicy::ResetAll);
        let task = tokio::spawn(ingestor.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.get("BTCUSDT").price, 43_250.10);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(store.get("BTCUSDT").is_sentinel());
        task.abort();
    }
}
