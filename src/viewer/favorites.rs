// =============================================================================
// Favorites — client-local set of starred instruments
// =============================================================================
//
// Persisted as a JSON array of instrument codes. Saves use an atomic
// tmp + rename so a crash mid-write never leaves a truncated file. Last
// write wins.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Ordered set of favorite instruments (insertion order is preserved).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FavoriteSet {
    symbols: Vec<String>,
}

impl FavoriteSet {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for s in symbols {
            let s = s.as_ref().trim().to_uppercase();
            if !s.is_empty() && !set.contains(&s) {
                set.symbols.push(s);
            }
        }
        set
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    /// Add or remove `symbol`. Returns `true` if it is now a favorite.
    pub fn toggle(&mut self, symbol: &str) -> bool {
        if let Some(pos) = self.symbols.iter().position(|s| s == symbol) {
            self.symbols.remove(pos);
            false
        } else {
            self.symbols.push(symbol.to_string());
            true
        }
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
}

/// File-backed favorites store.
#[derive(Debug, Clone)]
pub struct FavoriteStore {
    path: PathBuf,
}

impl FavoriteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored set. A missing or unreadable file yields an empty set.
    pub fn load(&self) -> FavoriteSet {
        match self.try_load() {
            Ok(set) => set,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "favorites unavailable — starting empty");
                FavoriteSet::default()
            }
        }
    }

    fn try_load(&self) -> Result<FavoriteSet> {
        if !self.path.exists() {
            return Ok(FavoriteSet::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read favorites from {}", self.path.display()))?;
        let symbols: Vec<String> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse favorites from {}", self.path.display()))?;
        Ok(FavoriteSet::new(symbols))
    }

    /// Persist `set` (write to a `.tmp` sibling, then rename).
    pub fn save(&self, set: &FavoriteSet) -> Result<()> {
        let content =
            serde_json::to_string(set.symbols()).context("failed to serialise favorites")?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename {} into place", tmp_path.display()))?;

        debug!(path = %self.path.display(), count = set.len(), "favorites saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pulse-{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn toggle_adds_then_removes() {
        let mut set = FavoriteSet::default();
        assert!(set.toggle("SOLUSDT"));
        assert!(set.contains("SOLUSDT"));
        assert!(!set.toggle("SOLUSDT"));
        assert!(set.is_empty());
    }

    #[test]
    fn save_then_load_preserves_order() {
        let store = FavoriteStore::new(temp_path("roundtrip"));
        let set = FavoriteSet::new(["SOLUSDT", "btcusdt", "SOLUSDT"]);
        store.save(&set).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.symbols(), &["SOLUSDT".to_string(), "BTCUSDT".to_string()]);
        std::fs::remove_file(store.path()).unwrap();
    }

    #[test]
    fn missing_or_corrupt_file_loads_empty() {
        let store = FavoriteStore::new(temp_path("missing"));
        assert!(store.load().is_empty());

        std::fs::write(store.path(), "{not a list").unwrap();
        assert!(store.load().is_empty());
        std::fs::remove_file(store.path()).unwrap();
    }
}
