// =============================================================================
// Reconciliation Engine — per-viewer dashboard state
// =============================================================================
//
// Consumes the relay's snapshot + batch stream and keeps:
//   - the latest derived display row per instrument,
//   - a favorite-first ordering, recomputed on every batch,
//   - a bounded history buffer per instrument, fed by history fetches and
//     rewritten in place by live ticks.
//
// The engine does no I/O. The session feeds it frames, fetch results and
// timer ticks from one loop, so a buffer is never mutated from two places at
// once.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, warn};

use crate::binance::KlineClose;
use crate::types::WireTicker;
use crate::universe::Universe;
use crate::viewer::favorites::FavoriteSet;
use crate::viewer::format::{format_change, format_price, time_label, ChangeDirection};
use crate::viewer::history::HistoryBuffer;

/// Derived presentation record for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayRow {
    pub symbol: String,
    pub price: f64,
    pub price_text: String,
    pub change_pct: f64,
    pub change_text: String,
    pub direction: ChangeDirection,
    pub favorite: bool,
}

/// A history fetch the session should perform. Results for a superseded
/// generation are discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFetch {
    pub symbol: String,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Loading,
    Ready,
    Failed,
}

#[derive(Debug)]
struct InstrumentHistory {
    generation: u64,
    status: HistoryStatus,
    buffer: Option<HistoryBuffer>,
}

pub struct ReconciliationEngine {
    universe: Arc<Universe>,
    favorites: FavoriteSet,
    window: usize,
    rows: HashMap<String, DisplayRow>,
    order: Vec<String>,
    histories: HashMap<String, InstrumentHistory>,
    next_generation: u64,
    connected: bool,
    last_update: Option<DateTime<Local>>,
}

impl ReconciliationEngine {
    pub fn new(universe: Arc<Universe>, favorites: FavoriteSet, window: usize) -> Self {
        Self {
            universe,
            favorites,
            window: window.max(1),
            rows: HashMap::new(),
            order: Vec::new(),
            histories: HashMap::new(),
            next_generation: 1,
            connected: false,
            last_update: None,
        }
    }

    // ── Stream input ────────────────────────────────────────────────────

    /// Parse and apply one relay frame (snapshot or batch).
    pub fn apply_frame(&mut self, text: &str, now: DateTime<Local>) -> Result<usize> {
        let records: Vec<WireTicker> =
            serde_json::from_str(text).context("failed to parse relay frame")?;
        Ok(self.apply_batch(&records, now))
    }

    /// Apply a batch. Instruments in the batch get a freshly derived row;
    /// absent ones keep theirs. Returns the number of rows written.
    pub fn apply_batch(&mut self, records: &[WireTicker], now: DateTime<Local>) -> usize {
        let label = time_label(&now);
        let mut applied = 0;

        for record in records {
            let symbol = record.symbol.to_uppercase();
            let price = match record.price.parse::<f64>() {
                Ok(p) => p,
                Err(_) => {
                    warn!(symbol = %symbol, value = %record.price, "unparseable price — record skipped");
                    continue;
                }
            };
            let change_pct = match record.change_pct.parse::<f64>() {
                Ok(c) => c,
                Err(_) => {
                    warn!(symbol = %symbol, value = %record.change_pct, "unparseable change — record skipped");
                    continue;
                }
            };

            // A relay sentinel (0/0) is a placeholder, never a chart price.
            let sentinel = price == 0.0 && change_pct == 0.0;
            if let Some(buffer) = self
                .histories
                .get_mut(&symbol)
                .and_then(|h| h.buffer.as_mut())
                .filter(|_| !sentinel)
            {
                buffer.apply_live(price, &label);
            }

            let row = self.derive_row(symbol.clone(), price, change_pct);
            self.rows.insert(symbol, row);
            applied += 1;
        }

        self.resort();
        self.last_update = Some(now);
        debug!(applied, rows = self.rows.len(), "batch reconciled");
        applied
    }

    fn derive_row(&self, symbol: String, price: f64, change_pct: f64) -> DisplayRow {
        DisplayRow {
            favorite: self.favorites.contains(&symbol),
            symbol,
            price,
            price_text: format_price(price),
            change_pct,
            change_text: format_change(change_pct),
            direction: ChangeDirection::of(change_pct),
        }
    }

    /// Favorites first, then universe order; unknown instruments last.
    fn resort(&mut self) {
        let favorites = &self.favorites;
        let universe = &self.universe;
        let mut order: Vec<String> = self.rows.keys().cloned().collect();
        order.sort_by(|a, b| {
            let key = |s: &String| {
                (
                    !favorites.contains(s),
                    universe.position(s).unwrap_or(usize::MAX),
                )
            };
            key(a).cmp(&key(b)).then_with(|| a.cmp(b))
        });
        self.order = order;
    }

    // ── Presentation output ─────────────────────────────────────────────

    pub fn ordered(&self) -> Vec<&DisplayRow> {
        self.order.iter().filter_map(|s| self.rows.get(s)).collect()
    }

    pub fn row(&self, symbol: &str) -> Option<&DisplayRow> {
        self.rows.get(symbol)
    }

    pub fn history(&self, symbol: &str) -> Option<&HistoryBuffer> {
        self.histories.get(symbol).and_then(|h| h.buffer.as_ref())
    }

    pub fn history_status(&self, symbol: &str) -> Option<HistoryStatus> {
        self.histories.get(symbol).map(|h| h.status)
    }

    pub fn last_update(&self) -> Option<DateTime<Local>> {
        self.last_update
    }

    // ── Favorites ───────────────────────────────────────────────────────

    pub fn favorites(&self) -> &FavoriteSet {
        &self.favorites
    }

    /// Returns `true` if `symbol` is now a favorite.
    pub fn toggle_favorite(&mut self, symbol: &str) -> bool {
        let now_favorite = self.favorites.toggle(&symbol.to_uppercase());
        self.sync_favorite_flags();
        now_favorite
    }

    pub fn set_favorites(&mut self, favorites: FavoriteSet) {
        self.favorites = favorites;
        self.sync_favorite_flags();
    }

    fn sync_favorite_flags(&mut self) {
        for row in self.rows.values_mut() {
            row.favorite = self.favorites.contains(&row.symbol);
        }
        self.resort();
    }

    // ── History ─────────────────────────────────────────────────────────

    /// Explicit selection: always starts a fresh fetch. Any buffer already
    /// present stays visible until the new one lands.
    pub fn select(&mut self, symbol: &str) -> HistoryFetch {
        let symbol = symbol.to_uppercase();
        let generation = self.bump_generation();
        let entry = self
            .histories
            .entry(symbol.clone())
            .or_insert(InstrumentHistory {
                generation,
                status: HistoryStatus::Loading,
                buffer: None,
            });
        entry.generation = generation;
        entry.status = HistoryStatus::Loading;
        HistoryFetch { symbol, generation }
    }

    /// Fetches for displayed instruments that have never requested history.
    pub fn pending_history(&mut self) -> Vec<HistoryFetch> {
        let missing: Vec<String> = self
            .order
            .iter()
            .filter(|s| !self.histories.contains_key(*s))
            .cloned()
            .collect();
        missing.iter().map(|s| self.select(s)).collect()
    }

    /// Install a fetched series. Returns `false` for stale results.
    pub fn apply_history(&mut self, fetch: &HistoryFetch, closes: &[KlineClose]) -> bool {
        let live = self
            .rows
            .get(&fetch.symbol)
            .map(|r| r.price)
            .filter(|p| *p != 0.0);
        let window = self.window;

        let Some(entry) = self.current_entry(fetch) else {
            debug!(symbol = %fetch.symbol, generation = fetch.generation, "stale history result discarded");
            return false;
        };

        let mut buffer = HistoryBuffer::from_closes(closes, window);
        if let Some(price) = live {
            buffer.remember_live(price);
        }
        entry.buffer = Some(buffer);
        entry.status = HistoryStatus::Ready;
        true
    }

    /// Mark a fetch as failed. Only that instrument is affected, and its
    /// previous buffer (if any) is kept.
    pub fn history_failed(&mut self, fetch: &HistoryFetch) -> bool {
        match self.current_entry(fetch) {
            Some(entry) => {
                entry.status = HistoryStatus::Failed;
                true
            }
            None => false,
        }
    }

    fn current_entry(&mut self, fetch: &HistoryFetch) -> Option<&mut InstrumentHistory> {
        self.histories
            .get_mut(&fetch.symbol)
            .filter(|h| h.generation == fetch.generation)
    }

    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Periodic refresh: re-stamp every buffer's final point with the last
    /// known live price. Returns how many buffers changed.
    pub fn refresh(&mut self, now: DateTime<Local>) -> usize {
        let label = time_label(&now);
        self.histories
            .values_mut()
            .filter_map(|h| h.buffer.as_mut())
            .map(|b| b.refresh(&label))
            .filter(|changed| *changed)
            .count()
    }

    // ── Connection indicator ────────────────────────────────────────────

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}
