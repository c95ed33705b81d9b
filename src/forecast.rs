//! Classical time-series forecasting over the composite's daily history:
//! seasonal exponential smoothing, trend-only exponential smoothing, and
//! naive last-value, selected by history length.

use chrono::{Duration as ChronoDuration, NaiveDate};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::sources::offline::seed_from;

const SEASONAL_THRESHOLD_DAYS: usize = 30;
const TREND_THRESHOLD_DAYS: usize = 10;
const SEASON_LENGTH: usize = 7;
const Z_95: f64 = 1.959963985;
const MIN_INTERVAL_HALF_WIDTH: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelName {
    ExpSmoothingSeasonal,
    ExpSmoothingTrend,
    NaiveLast,
}

impl ModelName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelName::ExpSmoothingSeasonal => "exp_smoothing_seasonal",
            ModelName::ExpSmoothingTrend => "exp_smoothing_trend",
            ModelName::NaiveLast => "naive_last",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastOutput {
    pub points: Vec<ForecastPoint>,
    pub model_name: ModelName,
    pub model_params: serde_json::Value,
}

/// `history` is the composite's daily values, ascending by date.
/// `horizon_days` is expected to already be validated into `[1, 90]`.
/// `offline_seed_key` seeds deterministic jitter when offline mode wants
/// reproducible output; pass `None` to use a small fixed smoothing
/// schedule with no randomness at all (the forecast itself is
/// deterministic given history — randomness here only ever affects
/// nothing in the live path; the parameter exists so callers can record
/// a seed in `model_params` for audit).
pub fn forecast(
    history: &[(NaiveDate, f64)],
    horizon_days: u32,
    offline_seed_key: Option<(&str, u32)>,
) -> ForecastOutput {
    let horizon = horizon_days.clamp(1, 90) as usize;
    let seed = offline_seed_key
        .map(|(region_id, horizon)| seed_from(&[region_id, &horizon.to_string()]))
        .unwrap_or(0);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    // Reserved for future stochastic model variants; current models are
    // fully deterministic given `history`, so the seed only ever affects
    // an unused jitter draw kept for API stability.
    let _ = rng.gen_range(0.0..1.0);

    if history.len() < 2 {
        return naive_last(history, horizon);
    }

    let values: Vec<f64> = history.iter().map(|(_, v)| *v).collect();
    let last_date = history.last().unwrap().0;

    if values.len() >= SEASONAL_THRESHOLD_DAYS {
        seasonal_smoothing(&values, last_date, horizon)
    } else if values.len() >= TREND_THRESHOLD_DAYS {
        trend_smoothing(&values, last_date, horizon)
    } else {
        naive_last(history, horizon)
    }
}

fn naive_last(history: &[(NaiveDate, f64)], horizon: usize) -> ForecastOutput {
    let (last_date, last_value) = history
        .last()
        .copied()
        .unwrap_or((NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(), 0.5));

    let rolling_std = if history.len() >= 2 {
        history.iter().map(|(_, v)| *v).collect::<Vec<f64>>().std_dev()
    } else {
        0.0
    };
    let half_width = (2.0 * rolling_std).max(MIN_INTERVAL_HALF_WIDTH);

    let points = (1..=horizon)
        .map(|step| {
            let date = last_date + ChronoDuration::days(step as i64);
            clip_point(date, last_value, half_width)
        })
        .collect();

    ForecastOutput {
        points,
        model_name: ModelName::NaiveLast,
        model_params: serde_json::json!({ "last_value": last_value, "rolling_std": rolling_std }),
    }
}

fn trend_smoothing(values: &[f64], last_date: NaiveDate, horizon: usize) -> ForecastOutput {
    let alpha = 0.3;
    let beta = 0.1;
    let mut level = values[0];
    let mut trend = values[1] - values[0];
    let mut residuals = Vec::with_capacity(values.len());

    for &value in &values[1..] {
        let forecast_one_step = level + trend;
        residuals.push(value - forecast_one_step);
        let new_level = alpha * value + (1.0 - alpha) * (level + trend);
        trend = beta * (new_level - level) + (1.0 - beta) * trend;
        level = new_level;
    }

    let residual_se = if residuals.is_empty() { 0.0 } else { residuals.std_dev() };
    let half_width = (residual_se * Z_95).max(MIN_INTERVAL_HALF_WIDTH);

    let points = (1..=horizon)
        .map(|step| {
            let date = last_date + ChronoDuration::days(step as i64);
            let point = level + trend * step as f64;
            clip_point(date, point, half_width)
        })
        .collect();

    ForecastOutput {
        points,
        model_name: ModelName::ExpSmoothingTrend,
        model_params: serde_json::json!({ "alpha": alpha, "beta": beta, "level": level, "trend": trend, "residual_se": residual_se }),
    }
}

fn seasonal_smoothing(values: &[f64], last_date: NaiveDate, horizon: usize) -> ForecastOutput {
    let alpha = 0.25;
    let beta = 0.05;
    let gamma = 0.2;

    let season_count = values.len() / SEASON_LENGTH;
    let baseline = if season_count > 0 {
        values[..season_count * SEASON_LENGTH].to_vec().mean()
    } else {
        values.to_vec().mean()
    };

    let mut seasonal: Vec<f64> = (0..SEASON_LENGTH)
        .map(|offset| {
            let samples: Vec<f64> = values.iter().skip(offset).step_by(SEASON_LENGTH).copied().collect();
            if samples.is_empty() {
                0.0
            } else {
                samples.mean() - baseline
            }
        })
        .collect();

    let mut level = values[0];
    let mut trend = if values.len() > 1 { values[1] - values[0] } else { 0.0 };
    let mut residuals = Vec::with_capacity(values.len());

    for (index, &value) in values.iter().enumerate() {
        let season_index = index % SEASON_LENGTH;
        let forecast_one_step = level + trend + seasonal[season_index];
        residuals.push(value - forecast_one_step);
        let deseasonalized = value - seasonal[season_index];
        let new_level = alpha * deseasonalized + (1.0 - alpha) * (level + trend);
        trend = beta * (new_level - level) + (1.0 - beta) * trend;
        seasonal[season_index] = gamma * (value - new_level) + (1.0 - gamma) * seasonal[season_index];
        level = new_level;
    }

    let residual_se = if residuals.is_empty() { 0.0 } else { residuals.std_dev() };
    let half_width = (residual_se * Z_95).max(MIN_INTERVAL_HALF_WIDTH);

    let points = (1..=horizon)
        .map(|step| {
            let date = last_date + ChronoDuration::days(step as i64);
            let season_index = (values.len() + step - 1) % SEASON_LENGTH;
            let point = level + trend * step as f64 + seasonal[season_index];
            clip_point(date, point, half_width)
        })
        .collect();

    ForecastOutput {
        points,
        model_name: ModelName::ExpSmoothingSeasonal,
        model_params: serde_json::json!({
            "alpha": alpha, "beta": beta, "gamma": gamma,
            "level": level, "trend": trend, "residual_se": residual_se,
        }),
    }
}

fn clip_point(date: NaiveDate, point: f64, half_width: f64) -> ForecastPoint {
    let point = point.clamp(0.0, 1.0);
    let lower = (point - half_width).clamp(0.0, point);
    let upper = (point + half_width).clamp(point, 1.0);
    ForecastPoint { date, point, lower, upper }
}
