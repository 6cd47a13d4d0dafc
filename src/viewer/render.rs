// =============================================================================
// Text dashboard
// =============================================================================

use std::fmt::Write as _;

use crate::viewer::engine::{HistoryStatus, ReconciliationEngine};
use crate::viewer::format::{format_change, format_price, ChangeDirection};
use crate::viewer::history::PricePoint;

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// One-line bar chart of a history buffer.
pub fn sparkline(points: &[PricePoint]) -> String {
    let (min, max) = points.iter().fold((f64::MAX, f64::MIN), |(lo, hi), p| {
        (lo.min(p.price), hi.max(p.price))
    });
    let span = max - min;
    points
        .iter()
        .map(|p| {
            if span <= 0.0 {
                SPARK_LEVELS[0]
            } else {
                let level = ((p.price - min) / span * (SPARK_LEVELS.len() - 1) as f64).round();
                SPARK_LEVELS[level as usize]
            }
        })
        .collect()
}

/// Render the full dashboard. `selected` is the instrument whose chart is shown.
pub fn render_dashboard(engine: &ReconciliationEngine, selected: Option<&str>) -> String {
    let mut out = String::new();

    let indicator = if engine.is_connected() {
        "● live"
    } else {
        "○ disconnected"
    };
    let updated = engine
        .last_update()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    let _ = writeln!(out, "PULSE  {indicator}  last update {updated}");
    let _ = writeln!(out, "{}", "─".repeat(44));

    for row in engine.ordered() {
        let star = if row.favorite { '★' } else { ' ' };
        let arrow = match row.direction {
            ChangeDirection::Up => '▲',
            ChangeDirection::Down => '▼',
        };
        let _ = writeln!(
            out,
            "{star} {:<10} {:>16} {:>9} {arrow}",
            row.symbol, row.price_text, row.change_text
        );
    }

    if let Some(symbol) = selected {
        let _ = writeln!(out, "{}", "─".repeat(44));
        match (engine.history(symbol), engine.history_status(symbol)) {
            (Some(buffer), status) if !buffer.is_empty() => {
                let change = buffer
                    .change_from_open()
                    .map(format_change)
                    .unwrap_or_else(|| "n/a".to_string());
                let open = buffer.open_price().map(format_price).unwrap_or_default();
                let _ = writeln!(out, "{symbol}  open {open}  change from open {change}");
                let _ = writeln!(out, "{}", sparkline(buffer.points()));
                if let (Some(first), Some(last)) = (buffer.points().first(), buffer.points().last()) {
                    let _ = writeln!(out, "{}  →  {}", first.time, last.time);
                }
                if status == Some(HistoryStatus::Failed) {
                    let _ = writeln!(out, "(refresh failed, showing previous history)");
                }
            }
            (_, Some(HistoryStatus::Failed)) => {
                let _ = writeln!(out, "{symbol}  history unavailable");
            }
            (_, Some(HistoryStatus::Loading)) => {
                let _ = writeln!(out, "{symbol}  loading history…");
            }
            _ => {
                let _ = writeln!(out, "{symbol}  no history");
            }
        }
    }

    out
}
