// =============================================================================
// Display formatting for dashboard rows
// =============================================================================

use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;

/// Sign of the 24h change, used to colour a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeDirection {
    Up,
    Down,
}

impl ChangeDirection {
    /// Zero counts as up.
    pub fn of(change_pct: f64) -> Self {
        if change_pct >= 0.0 {
            Self::Up
        } else {
            Self::Down
        }
    }
}

/// US-dollar currency string with thousands separators.
///
/// Sub-dollar prices get four fractional digits, everything else two:
/// `0.0821` → `$0.0821`, `43250.1` → `$43,250.10`.
pub fn format_price(price: f64) -> String {
    if !price.is_finite() {
        return price.to_string();
    }
    let decimals = if price.abs() < 1.0 { 4 } else { 2 };
    let fixed = format!("{:.*}", decimals, price.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if price < 0.0 && fixed.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
        "-"
    } else {
        ""
    };
    format!("{sign}${grouped}.{frac_part}")
}

/// `1.2345` → `1.23%`.
pub fn format_change(change_pct: f64) -> String {
    format!("{change_pct:.2}%")
}

/// `HH:MM` label for a chart point.
pub fn time_label<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%H:%M").to_string()
}

/// Label for a candle open time given in epoch milliseconds (local time).
pub fn candle_label(open_time_ms: i64) -> String {
    Local
        .timestamp_millis_opt(open_time_ms)
        .single()
        .map(|at| time_label(&at))
        .unwrap_or_else(|| "--:--".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn price_uses_two_or_four_decimals() {
        assert_eq!(format_price(43_250.1), "$43,250.10");
        assert_eq!(format_price(1.0), "$1.00");
        assert_eq!(format_price(0.08213), "$0.0821");
        assert_eq!(format_price(0.0), "$0.0000");
        assert_eq!(format_price(1_234_567.891), "$1,234,567.89");
        assert_eq!(format_price(999.999), "$1,000.00");
    }

    #[test]
    fn negative_prices_keep_sign_outside_symbol() {
        assert_eq!(format_price(-1500.0), "-$1,500.00");
        assert_eq!(format_price(-0.25), "-$0.2500");
    }

    #[test]
    fn change_and_direction() {
        assert_eq!(format_change(1.2345), "1.23%");
        assert_eq!(format_change(-0.5), "-0.50%");
        assert_eq!(ChangeDirection::of(0.0), ChangeDirection::Up);
        assert_eq!(ChangeDirection::of(-0.01), ChangeDirection::Down);
    }

    #[test]
    fn time_label_is_hours_and_minutes() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 42).unwrap();
        assert_eq!(time_label(&at), "07:05");
    }
}
