// =============================================================================
// Instrument Universe — the fixed, ordered set of tracked pairs
// =============================================================================

use std::collections::HashMap;

use anyhow::{bail, Result};

/// Every tracked instrument is quoted in this currency.
pub const QUOTE_SUFFIX: &str = "USDT";

/// Binance leveraged-token markers (e.g. `BTCUPUSDT`, `ETHDOWNUSDT`).
pub const LEVERAGE_MARKERS: &[&str] = &["UP", "DOWN"];

/// `true` when `symbol` is a plain spot pair against the quote currency.
pub fn is_spot_quote_pair(symbol: &str) -> bool {
    symbol.ends_with(QUOTE_SUFFIX) && !LEVERAGE_MARKERS.iter().any(|m| symbol.contains(m))
}

/// Ordered list of tracked instruments plus an index for O(1) lookups.
#[derive(Debug, Clone)]
pub struct Universe {
    symbols: Vec<String>,
    index: HashMap<String, usize>,
}

impl Universe {
    /// Build a universe from configured symbols.
    ///
    /// Symbols are upper-cased; duplicates keep their first position. Any
    /// symbol failing the quote-suffix or leverage-marker rule is rejected.
    pub fn new<I, S>(symbols: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ordered = Vec::new();
        let mut index = HashMap::new();

        for raw in symbols {
            let symbol = raw.as_ref().trim().to_uppercase();
            if symbol.is_empty() {
                continue;
            }
            if !is_spot_quote_pair(&symbol) {
                bail!("symbol {symbol} is not a {QUOTE_SUFFIX} spot pair");
            }
            if index.contains_key(&symbol) {
                continue;
            }
            index.insert(symbol.clone(), ordered.len());
            ordered.push(symbol);
        }

        if ordered.is_empty() {
            bail!("instrument universe is empty");
        }

        Ok(Self {
            symbols: ordered,
            index,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.index.contains_key(symbol)
    }

    /// Position in display order, `None` for symbols outside the universe.
    pub fn position(&self, symbol: &str) -> Option<usize> {
        self.index.get(symbol).copied()
    }

    /// Ingest filter: member of the universe and a plain spot quote pair.
    pub fn admits(&self, symbol: &str) -> bool {
        self.contains(symbol) && is_spot_quote_pair(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe() -> Universe {
        Universe::new(["BTCUSDT", "ETHUSDT", "SOLUSDT"]).unwrap()
    }

    #[test]
    fn only_plain_universe_pairs_are_admitted() {
        let u = universe();
        assert!(u.admits("BTCUSDT"));
        assert!(!u.admits("BTCUPUSDT"));
        assert!(!u.admits("ETHBTC"));
        assert!(!u.admits("DOGEUSDT"));
    }

    #[test]
    fn rejects_leveraged_and_foreign_quotes() {
        assert!(Universe::new(["BTCDOWNUSDT"]).is_err());
        assert!(Universe::new(["ETHBTC"]).is_err());
        assert!(Universe::new(Vec::<String>::new()).is_err());
    }

    #[test]
    fn normalises_case_and_dedups() {
        let u = Universe::new(["btcusdt", " ETHUSDT ", "BTCUSDT"]).unwrap();
        assert_eq!(u.symbols(), &["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        assert_eq!(u.position("ETHUSDT"), Some(1));
        assert_eq!(u.position("XRPUSDT"), None);
    }
}
