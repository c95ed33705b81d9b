//! Aligns heterogeneous source series onto a common daily range, fills
//! short gaps, and normalizes every feature column into `[0, 1]`.
//!
//! Grounded on the teacher's `risk.rs` rolling-window statistics (reused
//! here via `statrs` for interquartile-range scaling) generalized from a
//! single equity curve to N independently-sourced feature columns.

use std::collections::BTreeMap;

use chrono::{Duration as ChronoDuration, NaiveDate};
use statrs::statistics::{Data, OrderStatistics};

use crate::series::SourceFetch;
use crate::sources::{FillPolicy, MobilityKind, NormalizationSpec, SourceDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarmonizationStatus {
    Included,
    InsufficientOverlap,
}

#[derive(Debug, Clone)]
pub enum NormalizationRecord {
    FixedRange { min: f64, max: f64 },
    RobustIqr { q1: f64, q3: f64 },
}

/// One normalized `[0,1]` feature column, ready for the index computer.
#[derive(Debug, Clone)]
pub struct HarmonizedFeature {
    pub source_id: String,
    pub feature: String,
    pub child: String,
    pub values: BTreeMap<NaiveDate, f64>,
    pub coverage_ratio: f64,
    pub status: HarmonizationStatus,
    pub normalization: NormalizationRecord,
    pub mobility_kind: Option<MobilityKind>,
}

const MIN_OVERLAP_RATIO: f64 = 0.30;
const MAX_INTERPOLATION_GAP_DAYS: i64 = 7;

pub struct Harmonizer;

impl Harmonizer {
    /// `target_range` is inclusive `(start, end)`. `fetches` pairs each
    /// connector's raw fetch result with its registry definition so
    /// fill policy and normalization can be looked up per-feature.
    pub fn harmonize(
        fetches: &[(SourceFetch, &SourceDefinition)],
        target_range: (NaiveDate, NaiveDate),
    ) -> Vec<HarmonizedFeature> {
        let (range_start, range_end) = target_range;
        let total_days = (range_end - range_start).num_days().max(0) + 1;
        let mut out = Vec::new();

        for (fetch, definition) in fetches {
            let Some(series) = &fetch.series else { continue };
            if series.is_empty() {
                continue;
            }

            for (feature, child) in definition.features {
                let raw = series.feature_series(feature);
                if raw.is_empty() {
                    continue;
                }

                let aligned = align_and_fill(&raw, range_start, range_end, definition.fill_policy);
                let present_days = aligned.len() as i64;
                let coverage_ratio = if total_days > 0 {
                    present_days as f64 / total_days as f64
                } else {
                    0.0
                };

                if coverage_ratio < MIN_OVERLAP_RATIO {
                    out.push(HarmonizedFeature {
                        source_id: definition.id.to_string(),
                        feature: feature.to_string(),
                        child: child.to_string(),
                        values: BTreeMap::new(),
                        coverage_ratio,
                        status: HarmonizationStatus::InsufficientOverlap,
                        normalization: NormalizationRecord::FixedRange { min: 0.0, max: 1.0 },
                        mobility_kind: definition.mobility_kind,
                    });
                    continue;
                }

                let (normalized, record) = normalize(&aligned, definition.normalization);
                out.push(HarmonizedFeature {
                    source_id: definition.id.to_string(),
                    feature: feature.to_string(),
                    child: child.to_string(),
                    values: normalized,
                    coverage_ratio,
                    status: HarmonizationStatus::Included,
                    normalization: record,
                    mobility_kind: definition.mobility_kind,
                });
            }
        }
        out
    }
}

/// Produces a dense series over `[range_start, range_end]`: forward-fills
/// gaps up to the source's fill budget, then linearly interpolates
/// remaining interior gaps up to `MAX_INTERPOLATION_GAP_DAYS`. Dates with
/// no observed or fillable value are simply absent from the result.
fn align_and_fill(
    raw: &BTreeMap<NaiveDate, f64>,
    range_start: NaiveDate,
    range_end: NaiveDate,
    fill_policy: FillPolicy,
) -> BTreeMap<NaiveDate, f64> {
    let forward_fill_days = match fill_policy {
        FillPolicy::ForwardFill { days } => days as i64,
        FillPolicy::InterpolateOnly => 0,
    };

    let mut filled: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    let mut last_value: Option<(NaiveDate, f64)> = None;

    let mut date = range_start;
    while date <= range_end {
        if let Some(value) = raw.get(&date) {
            filled.insert(date, *value);
            last_value = Some((date, *value));
        } else if let Some((last_date, value)) = last_value {
            if (date - last_date).num_days() <= forward_fill_days {
                filled.insert(date, value);
            }
        }
        date += ChronoDuration::days(1);
    }

    interpolate_interior_gaps(&mut filled, raw, range_start, range_end);
    filled
}

fn interpolate_interior_gaps(
    filled: &mut BTreeMap<NaiveDate, f64>,
    raw: &BTreeMap<NaiveDate, f64>,
    range_start: NaiveDate,
    range_end: NaiveDate,
) {
    let known_dates: Vec<NaiveDate> = raw.keys().copied().filter(|d| *d >= range_start && *d <= range_end).collect();
    for window in known_dates.windows(2) {
        let (left, right) = (window[0], window[1]);
        let gap = (right - left).num_days();
        if gap <= 1 || gap - 1 > MAX_INTERPOLATION_GAP_DAYS {
            continue;
        }
        let left_value = raw[&left];
        let right_value = raw[&right];
        let mut date = left + ChronoDuration::days(1);
        let mut step = 1i64;
        while date < right {
            if !filled.contains_key(&date) {
                let fraction = step as f64 / gap as f64;
                let value = left_value + (right_value - left_value) * fraction;
                filled.insert(date, value);
            }
            date += ChronoDuration::days(1);
            step += 1;
        }
    }
}

fn normalize(
    values: &BTreeMap<NaiveDate, f64>,
    spec: NormalizationSpec,
) -> (BTreeMap<NaiveDate, f64>, NormalizationRecord) {
    match spec {
        NormalizationSpec::FixedRange { min, max } => {
            let span = (max - min).max(f64::EPSILON);
            let normalized = values
                .iter()
                .map(|(date, value)| (*date, ((*value - min) / span).clamp(0.0, 1.0)))
                .collect();
            (normalized, NormalizationRecord::FixedRange { min, max })
        }
        NormalizationSpec::RobustIqr => {
            let mut sorted: Vec<f64> = values.values().copied().collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mut data = Data::new(sorted);
            let q1 = data.percentile(25);
            let q3 = data.percentile(75);
            let iqr = (q3 - q1).max(f64::EPSILON);
            let normalized = values
                .iter()
                .map(|(date, value)| (*date, ((*value - q1) / iqr).clamp(0.0, 1.0)))
                .collect();
            (normalized, NormalizationRecord::RobustIqr { q1, q3 })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{DailySeries, Fingerprint, FetchStatus};
    use crate::sources::Classification;
    use std::time::Duration;

    fn make_fetch(dates_values: &[(NaiveDate, f64)], feature: &str) -> SourceFetch {
        let mut series = DailySeries::empty();
        for (date, value) in dates_values {
            series.set(*date, feature, *value);
        }
        SourceFetch {
            source_id: "test".into(),
            region_id: "us_il".into(),
            window_days: 30,
            fingerprint: Fingerprint::compute("test", &[], 30, &[]),
            fetched_at: chrono::Utc::now(),
            status: FetchStatus::Ok,
            series: Some(series),
            error_kind: None,
            attempt_count: 1,
            latency_ms: 0,
        }
    }

    fn definition() -> SourceDefinition {
        SourceDefinition {
            id: "test",
            name: "Test",
            category: "test",
            classification: Classification::Regional,
            requires_key: false,
            can_run_without_key: true,
            geo_inputs_used: &["lat", "lon"],
            cache_key_fields: &[],
            description: "test",
            features: &[("x", "child_x")],
            ttl: Duration::from_secs(300),
            fill_policy: FillPolicy::ForwardFill { days: 2 },
            normalization: NormalizationSpec::FixedRange { min: 0.0, max: 10.0 },
            mobility_kind: None,
        }
    }

    #[test]
    fn forward_fills_short_gaps_and_normalizes() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let mid = start + ChronoDuration::days(3);
        let end = start + ChronoDuration::days(5);
        let fetch = make_fetch(&[(start, 0.0), (mid, 10.0)], "x");
        let def = definition();
        let harmonized = Harmonizer::harmonize(&[(fetch, &def)], (start, end));
        assert_eq!(harmonized.len(), 1);
        let feature = &harmonized[0];
        assert_eq!(feature.status, HarmonizationStatus::Included);
        assert!(feature.values.get(&(start + ChronoDuration::days(1))).is_some());
    }

    #[test]
    fn low_overlap_is_excluded() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = start + ChronoDuration::days(29);
        let fetch = make_fetch(&[(start, 5.0)], "x");
        let def = definition();
        let harmonized = Harmonizer::harmonize(&[(fetch, &def)], (start, end));
        assert_eq!(harmonized[0].status, HarmonizationStatus::InsufficientOverlap);
    }

    #[test]
    fn fixed_range_normalization_clamps_to_unit_interval() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let end = start + ChronoDuration::days(1);
        let fetch = make_fetch(&[(start, -5.0), (end, 20.0)], "x");
        let def = definition();
        let harmonized = Harmonizer::harmonize(&[(fetch, &def)], (start, end));
        for value in harmonized[0].values.values() {
            assert!((0.0..=1.0).contains(value));
        }
    }
}
