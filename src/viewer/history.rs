// =============================================================================
// History Buffer — bounded price series per instrument
// =============================================================================
//
// Filled once per history fetch. Live ticks only ever rewrite the final
// point, so the buffer never grows past the fetched window.
// =============================================================================

use serde::Serialize;

use crate::binance::KlineClose;
use crate::viewer::format::candle_label;

/// One chart sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricePoint {
    pub time: String,
    pub price: f64,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryBuffer {
    points: Vec<PricePoint>,
    /// Percent move from the first to the last fetched close.
    change_from_open: Option<f64>,
    /// Most recent live price seen for this instrument.
    last_live: Option<f64>,
}

impl HistoryBuffer {
    /// Build a buffer from fetched candles, keeping at most `window` of the
    /// most recent ones.
    pub fn from_closes(closes: &[KlineClose], window: usize) -> Self {
        let start = closes.len().saturating_sub(window);
        let points: Vec<PricePoint> = closes[start..]
            .iter()
            .map(|c| PricePoint {
                time: candle_label(c.open_time_ms),
                price: c.close,
            })
            .collect();

        let change_from_open = match (points.first(), points.last()) {
            (Some(first), Some(last)) if first.price != 0.0 => {
                Some((last.price - first.price) / first.price * 100.0)
            }
            _ => None,
        };

        Self {
            points,
            change_from_open,
            last_live: None,
        }
    }

    /// Seed the last known live price without touching the points.
    pub fn remember_live(&mut self, price: f64) {
        self.last_live = Some(price);
    }

    /// Apply a live tick. The final point is rewritten only when the price
    /// differs from it. Returns whether the buffer changed.
    pub fn apply_live(&mut self, price: f64, label: &str) -> bool {
        self.last_live = Some(price);
        match self.points.last_mut() {
            Some(last) if last.price != price => {
                last.price = price;
                last.time = label.to_string();
                true
            }
            _ => false,
        }
    }

    /// Timer-driven refresh: stamp the final point with `label` and the last
    /// known live price. Does nothing until a live price has been seen.
    pub fn refresh(&mut self, label: &str) -> bool {
        let Some(price) = self.last_live else {
            return false;
        };
        match self.points.last_mut() {
            Some(last) => {
                last.price = price;
                last.time = label.to_string();
                true
            }
            None => false,
        }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Fixed at fetch time; live ticks do not move it.
    pub fn change_from_open(&self) -> Option<f64> {
        self.change_from_open
    }

    /// Reference line for the change annotation.
    pub fn open_price(&self) -> Option<f64> {
        self.points.first().map(|p| p.price)
    }

    pub fn last_price(&self) -> Option<f64> {
        self.points.last().map(|p| p.price)
    }
}
