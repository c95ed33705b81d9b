//! Daily time series, source fetch results, and the canonical fingerprint
//! that keys the fetch cache.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ErrorKind;

/// A dense, contiguous-date, multi-feature daily series. Invariant: no
/// duplicate dates (enforced by `BTreeMap` keying), all stored floats are
/// finite once harmonized (validated by `validate`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailySeries {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// date -> feature -> value. Absent feature keys mean "missing" for
    /// that date, never `NaN`.
    pub points: BTreeMap<NaiveDate, BTreeMap<String, f64>>,
}

impl DailySeries {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn set(&mut self, date: NaiveDate, feature: impl Into<String>, value: f64) {
        self.start = Some(self.start.map_or(date, |s| s.min(date)));
        self.end = Some(self.end.map_or(date, |e| e.max(date)));
        self.points.entry(date).or_default().insert(feature.into(), value);
    }

    pub fn get(&self, date: NaiveDate, feature: &str) -> Option<f64> {
        self.points.get(&date).and_then(|row| row.get(feature)).copied()
    }

    pub fn dates(&self) -> impl Iterator<Item = &NaiveDate> {
        self.points.keys()
    }

    pub fn feature_series(&self, feature: &str) -> BTreeMap<NaiveDate, f64> {
        self.points
            .iter()
            .filter_map(|(date, row)| row.get(feature).map(|v| (*date, *v)))
            .collect()
    }

    /// All floats finite, no duplicate dates (structurally guaranteed by
    /// `BTreeMap`). Called after harmonization, never before — raw
    /// upstream payloads may legitimately contain gaps represented by a
    /// missing key, but never `NaN`/`Inf` once normalized.
    pub fn validate_finite(&self) -> bool {
        self.points
            .values()
            .all(|row| row.values().all(|v| v.is_finite()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    Empty,
    Error,
}

/// Canonical hash of a fetch's identity inputs. Two fetches with the same
/// fingerprint are, in steady state, the same request against the same
/// upstream state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Fingerprint {
    /// `geo_inputs` and `extra_key_fields` are `(name, value)` pairs drawn
    /// from the source's registered `geo_inputs_used` / `cache_key_fields`
    /// — a GLOBAL/NATIONAL source passes an empty `geo_inputs` slice so
    /// two regions in its scope hash identically, while a REGIONAL source
    /// always includes its discriminating geo fields.
    pub fn compute(
        source_id: &str,
        geo_inputs: &[(&str, String)],
        window_days: u32,
        extra_key_fields: &[(&str, String)],
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_id.as_bytes());
        hasher.update(b"|");
        hasher.update(window_days.to_string().as_bytes());
        for (name, value) in geo_inputs {
            hasher.update(b"|");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        for (name, value) in extra_key_fields {
            hasher.update(b"|");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFetch {
    pub source_id: String,
    pub region_id: String,
    pub window_days: u32,
    pub fingerprint: Fingerprint,
    pub fetched_at: DateTime<Utc>,
    pub status: FetchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<DailySeries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub attempt_count: u32,
    pub latency_ms: u64,
}

impl SourceFetch {
    pub fn ok(
        source_id: impl Into<String>,
        region_id: impl Into<String>,
        window_days: u32,
        fingerprint: Fingerprint,
        series: DailySeries,
        attempt_count: u32,
        latency_ms: u64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            region_id: region_id.into(),
            window_days,
            fingerprint,
            fetched_at: Utc::now(),
            status: FetchStatus::Ok,
            series: Some(series),
            error_kind: None,
            attempt_count,
            latency_ms,
        }
    }

    pub fn empty(
        source_id: impl Into<String>,
        region_id: impl Into<String>,
        window_days: u32,
        fingerprint: Fingerprint,
        error_kind: Option<ErrorKind>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            region_id: region_id.into(),
            window_days,
            fingerprint,
            fetched_at: Utc::now(),
            status: FetchStatus::Empty,
            series: Some(DailySeries::empty()),
            error_kind,
            attempt_count: 1,
            latency_ms: 0,
        }
    }

    pub fn error(
        source_id: impl Into<String>,
        region_id: impl Into<String>,
        window_days: u32,
        fingerprint: Fingerprint,
        error_kind: ErrorKind,
        attempt_count: u32,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            region_id: region_id.into(),
            window_days,
            fingerprint,
            fetched_at: Utc::now(),
            status: FetchStatus::Error,
            series: None,
            error_kind: Some(error_kind),
            attempt_count,
            latency_ms: 0,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, FetchStatus::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regional_sources_diverge_across_regions() {
        let il = Fingerprint::compute(
            "weather",
            &[("lat", "40.0".into()), ("lon", "-89.0".into())],
            365,
            &[],
        );
        let az = Fingerprint::compute(
            "weather",
            &[("lat", "34.0".into()), ("lon", "-112.0".into())],
            365,
            &[],
        );
        assert_ne!(il, az);
    }

    #[test]
    fn global_sources_ignore_geo_inputs() {
        let a = Fingerprint::compute("fuel_price", &[], 365, &[]);
        let b = Fingerprint::compute("fuel_price", &[], 365, &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = Fingerprint::compute("weather", &[("lat", "40.0".into())], 30, &[]);
        let b = Fingerprint::compute("weather", &[("lat", "40.0".into())], 30, &[]);
        assert_eq!(a, b);
    }
}
