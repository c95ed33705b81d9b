//! Append-only forecast journal: one newline-delimited JSON record per
//! completed request. Disabled entirely (a pure no-op) when `JOURNAL_PATH`
//! is unset, per spec.md §4.8. Writes are best-effort — a failure is
//! logged and swallowed rather than surfaced to the caller, matching the
//! teacher's `scrapers` modules' "never let a side-channel write fail the
//! request" posture.

use std::path::PathBuf;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::orchestrator::ForecastResult;

#[derive(Debug, Serialize)]
struct JournalRecord {
    region_id: String,
    created_at_iso: String,
    fingerprint_hex: String,
    result_digest_hex: String,
    model_name: String,
    horizon: u32,
}

enum Sink {
    Disabled,
    File { path: PathBuf, file: Mutex<Option<tokio::fs::File>> },
}

pub struct Journal {
    sink: Sink,
}

impl Journal {
    pub fn new(path: Option<&str>) -> Self {
        match path {
            Some(p) if !p.is_empty() => {
                Journal { sink: Sink::File { path: PathBuf::from(p), file: Mutex::new(None) } }
            }
            _ => Journal { sink: Sink::Disabled },
        }
    }

    pub fn disabled() -> Self {
        Journal { sink: Sink::Disabled }
    }

    pub async fn append(&self, result: &ForecastResult) {
        let (path, file) = match &self.sink {
            Sink::Disabled => return,
            Sink::File { path, file } => (path, file),
        };

        let record = JournalRecord {
            region_id: result.region_id.clone(),
            created_at_iso: result.created_at.to_rfc3339(),
            fingerprint_hex: request_fingerprint(result),
            result_digest_hex: result_digest(result),
            model_name: result.model_name.as_str().to_string(),
            horizon: result.horizon_days,
        };

        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to serialize journal record, dropping");
                return;
            }
        };

        let mut guard = file.lock().await;
        if guard.is_none() {
            match OpenOptions::new().create(true).append(true).open(path).await {
                Ok(opened) => *guard = Some(opened),
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "failed to open journal file, dropping record");
                    return;
                }
            }
        }

        let Some(opened) = guard.as_mut() else { return };
        if let Err(err) = opened.write_all(format!("{line}\n").as_bytes()).await {
            warn!(error = %err, "failed to append journal record");
            return;
        }
        if let Err(err) = opened.flush().await {
            warn!(error = %err, "failed to flush journal record");
        }
    }
}

/// Hashes the request's resolved identity (region, window, every connector
/// the fan-out attempted) so a journal record can be matched back to the
/// cache entries that produced it.
fn request_fingerprint(result: &ForecastResult) -> String {
    let mut hasher = Sha256::new();
    hasher.update(result.region_id.as_bytes());
    hasher.update(b"|");
    hasher.update(result.days_back.to_string().as_bytes());
    for source in &result.sources {
        hasher.update(b"|");
        hasher.update(source.source_id.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn result_digest(result: &ForecastResult) -> String {
    let mut hasher = Sha256::new();
    hasher.update(result.region_id.as_bytes());
    if let Some(day) = result.history.last() {
        hasher.update(day.composite.to_bits().to_le_bytes());
    }
    for point in &result.forecast {
        hasher.update(point.point.to_bits().to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ModelName;
    use crate::orchestrator::{DataQuality, SourceFetchSummary};
    use crate::series::FetchStatus;
    use chrono::Utc;

    fn sample_result() -> ForecastResult {
        ForecastResult {
            region_id: "us_il".into(),
            created_at: Utc::now(),
            days_back: 30,
            horizon_days: 7,
            history: vec![crate::index::DailyIndex {
                date: Utc::now().date_naive(),
                composite: 0.42,
                parents: Default::default(),
                children: Default::default(),
                contributions: Vec::new(),
                degraded_all_missing: false,
            }],
            forecast: Vec::new(),
            model_name: ModelName::NaiveLast,
            model_params: serde_json::json!({}),
            sources: vec![SourceFetchSummary {
                source_id: "weather".into(),
                status: FetchStatus::Ok,
                points: 30,
                last_fetched: Utc::now(),
                error_kind: None,
            }],
            data_quality: DataQuality { completeness: 1.0, regional_variance_tag: "40.0,-89.0".into() },
            degraded: false,
            degraded_reason: None,
        }
    }

    #[tokio::test]
    async fn disabled_journal_is_a_no_op() {
        let journal = Journal::disabled();
        journal.append(&sample_result()).await;
    }

    #[tokio::test]
    async fn appends_one_line_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.ndjson");
        let journal = Journal::new(Some(path.to_str().unwrap()));
        journal.append(&sample_result()).await;
        journal.append(&sample_result()).await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
        for line in contents.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["region_id"], "us_il");
        }
    }
}
