//! Rate-of-change and rolling-volatility series derived from the
//! composite's daily history, generalized from the teacher's
//! `risk.rs` drawdown-monitor rolling-window approach (equity curve →
//! behavior index).

use std::collections::BTreeMap;

use chrono::NaiveDate;
use statrs::statistics::Statistics;

use super::DailyIndex;

#[derive(Debug, Clone, Copy, Default)]
pub struct DerivedMetrics {
    pub delta_7d: Option<f64>,
    pub delta_30d: Option<f64>,
    pub delta_90d: Option<f64>,
    pub volatility_30d: Option<f64>,
}

const VOLATILITY_WINDOW: usize = 30;

/// `history` must be sorted ascending by date (the order `IndexComputer`
/// already produces). Returns the derived metrics as of the last date in
/// the history.
pub fn latest_derived_metrics(history: &[DailyIndex]) -> DerivedMetrics {
    if history.is_empty() {
        return DerivedMetrics::default();
    }
    let by_date: BTreeMap<NaiveDate, f64> = history.iter().map(|d| (d.date, d.composite)).collect();
    let latest_date = *by_date.keys().last().unwrap();
    let latest_value = by_date[&latest_date];

    DerivedMetrics {
        delta_7d: delta_over(&by_date, latest_date, latest_value, 7),
        delta_30d: delta_over(&by_date, latest_date, latest_value, 30),
        delta_90d: delta_over(&by_date, latest_date, latest_value, 90),
        volatility_30d: rolling_volatility(history),
    }
}

fn delta_over(by_date: &BTreeMap<NaiveDate, f64>, latest_date: NaiveDate, latest_value: f64, lookback_days: i64) -> Option<f64> {
    let target = latest_date - chrono::Duration::days(lookback_days);
    by_date
        .range(..=target)
        .next_back()
        .map(|(_, past_value)| latest_value - past_value)
}

fn rolling_volatility(history: &[DailyIndex]) -> Option<f64> {
    if history.len() < 2 {
        return None;
    }
    let window: Vec<f64> = history
        .iter()
        .rev()
        .take(VOLATILITY_WINDOW)
        .map(|d| d.composite)
        .collect();
    if window.len() < 2 {
        return None;
    }
    Some(window.std_dev())
}
