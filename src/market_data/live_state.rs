// =============================================================================
// Live State Store — latest tick per tracked instrument
// =============================================================================
//
// Single writer (the ingestor), many readers (snapshot builder, health).
// Each tick is replaced as one unit under a write lock, so readers never see a
// half-updated entry.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::runtime_config::ReseedPolicy;
use crate::types::{LiveTick, WireTicker};
use crate::universe::Universe;

pub struct LiveStateStore {
    universe: Arc<Universe>,
    ticks: RwLock<HashMap<String, LiveTick>>,
}

impl LiveStateStore {
    pub fn new(universe: Arc<Universe>) -> Self {
        let capacity = universe.len();
        Self {
            universe,
            ticks: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    /// Write sentinels according to `policy`. Returns how many entries were
    /// written. Safe to call on every reconnect.
    pub fn seed_sentinels(&self, policy: ReseedPolicy) -> usize {
        let mut ticks = self.ticks.write();
        let mut written = 0;
        for symbol in self.universe.symbols() {
            let write = match policy {
                ReseedPolicy::ResetAll => true,
                ReseedPolicy::MissingOnly => !ticks.contains_key(symbol),
            };
            if write {
                ticks.insert(symbol.clone(), LiveTick::sentinel());
                written += 1;
            }
        }
        debug!(written, ?policy, "live state sentinels seeded");
        written
    }

    /// Replace the entry for `symbol`. Symbols outside the universe are
    /// ignored and `false` is returned.
    pub fn set(&self, symbol: &str, tick: LiveTick) -> bool {
        if !self.universe.contains(symbol) {
            return false;
        }
        self.ticks.write().insert(symbol.to_string(), tick);
        true
    }

    /// Latest tick, or the sentinel when nothing is stored yet.
    pub fn get(&self, symbol: &str) -> LiveTick {
        self.ticks
            .read()
            .get(symbol)
            .copied()
            .unwrap_or_else(LiveTick::sentinel)
    }

    /// All stored entries in universe order.
    pub fn get_all(&self) -> Vec<(String, LiveTick)> {
        let ticks = self.ticks.read();
        self.universe
            .symbols()
            .iter()
            .filter_map(|s| ticks.get(s).map(|t| (s.clone(), *t)))
            .collect()
    }

    /// Snapshot in wire form, as sent to a newly registered subscriber.
    pub fn snapshot(&self) -> Vec<WireTicker> {
        self.get_all()
            .iter()
            .map(|(symbol, tick)| WireTicker::from_tick(symbol.as_str(), tick))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ticks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.read().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> LiveStateStore {
        let universe = Universe::new(["BTCUSDT", "ETHUSDT", "SOLUSDT"]).unwrap();
        LiveStateStore::new(Arc::new(universe))
    }

    #[test]
    fn get_all_has_one_entry_per_universe_instrument() {
        let store = store();
        store.seed_sentinels(ReseedPolicy::MissingOnly);
        assert!(store.set("ETHUSDT", LiveTick::new(2300.0, 1.5)));
        assert!(store.set("ETHUSDT", LiveTick::new(2301.0, 1.6)));
        assert!(!store.set("DOGEUSDT", LiveTick::new(0.08, 2.0)));

        let all = store.get_all();
        let symbols: Vec<&str> = all.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
        assert_eq!(all[1].1.price, 2301.0);
    }

    #[test]
    fn absent_instrument_reads_as_sentinel() {
        let store = store();
        assert!(store.get("SOLUSDT").is_sentinel());
        assert!(store.is_empty());
    }

    #[test]
    fn missing_only_reseed_keeps_known_prices() {
        let store = store();
        store.seed_sentinels(ReseedPolicy::MissingOnly);
        store.set("BTCUSDT", LiveTick::new(43_000.0, -0.4));

        assert_eq!(store.seed_sentinels(ReseedPolicy::MissingOnly), 0);
        assert_eq!(store.get("BTCUSDT").price, 43_000.0);
    }

    #[test]
    fn reset_all_reseed_overwrites_everything() {
        let store = store();
        store.set("BTCUSDT", LiveTick::new(43_000.0, -0.4));

        assert_eq!(store.seed_sentinels(ReseedPolicy::ResetAll), 3);
        assert!(store.get("BTCUSDT").is_sentinel());
    }

    #[test]
    fn snapshot_includes_sentinels() {
        let store = store();
        store.seed_sentinels(ReseedPolicy::MissingOnly);
        store.set("SOLUSDT", LiveTick::new(101.25, 3.0));

        let snap = store.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].price, "0");
        assert_eq!(snap[2].price, "101.25");
        assert_eq!(snap[2].change_pct, "3");
    }
}
