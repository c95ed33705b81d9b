//! Per-request pipeline: `Fetching -> Harmonizing -> Composing ->
//! Forecasting -> Publishing -> Journaling -> Done`, with `Degraded` a
//! side-exit rather than a hard failure (only region/horizon validation
//! can still fail the request outright, per spec.md §4.8's state machine).
//!
//! Grounded on the teacher's `DataSourceKillSwitch` (per-source accounting
//! around a fan-out of upstream calls) for the shape of "collect health per
//! connector as the fan-out completes", and `middleware/rate_limit.rs`'s
//! `Semaphore`-bounded-gate idea for the upstream concurrency cap.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::FetchCache;
use crate::config::AppConfig;
use crate::error::{AppError, ErrorKind};
use crate::forecast::{self, ForecastPoint, ModelName};
use crate::harmonizer::Harmonizer;
use crate::index::weights::{ParentWeights, ALL_CHILDREN};
use crate::index::{DailyIndex, IndexComputer};
use crate::journal::Journal;
use crate::metrics::MetricsPublisher;
use crate::region::{Region, RegionRegistry};
use crate::series::{FetchStatus, SourceFetch};
use crate::sources::{FetchRequest, SourceConnector, SourceRegistry};

/// Mirrors spec.md §4.8's per-request state machine. Only used for
/// `tracing` span events — there is no separate consumer that inspects the
/// enum directly, since every stage but the last two either always
/// succeeds or folds into `Degraded` rather than aborting the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Harmonizing,
    Composing,
    Forecasting,
    Publishing,
    Journaling,
    Done,
}

pub struct ForecastRequest {
    pub region_id: String,
    pub region_name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub days_back: u32,
    pub horizon_days: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceFetchSummary {
    pub source_id: String,
    pub status: FetchStatus,
    pub points: usize,
    pub last_fetched: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataQuality {
    pub completeness: f64,
    pub regional_variance_tag: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastResult {
    pub region_id: String,
    pub created_at: DateTime<Utc>,
    pub days_back: u32,
    pub horizon_days: u32,
    pub history: Vec<DailyIndex>,
    pub forecast: Vec<ForecastPoint>,
    pub model_name: ModelName,
    pub model_params: serde_json::Value,
    pub sources: Vec<SourceFetchSummary>,
    pub data_quality: DataQuality,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

pub struct Orchestrator {
    config: Arc<AppConfig>,
    regions: Arc<RegionRegistry>,
    registry: Arc<SourceRegistry>,
    cache: Arc<FetchCache>,
    weights: ParentWeights,
}

impl Orchestrator {
    pub fn new(
        config: Arc<AppConfig>,
        regions: Arc<RegionRegistry>,
        registry: Arc<SourceRegistry>,
        cache: Arc<FetchCache>,
        weights: ParentWeights,
    ) -> Self {
        Self { config, regions, registry, cache, weights }
    }

    pub async fn run(
        &self,
        request: ForecastRequest,
        metrics: &MetricsPublisher,
        journal: &Journal,
    ) -> Result<ForecastResult, AppError> {
        validate_request(&request)?;
        let region = self.regions.resolve(
            &request.region_id,
            request.region_name.as_deref(),
            request.lat,
            request.lon,
        )?;

        let deadline = Instant::now() + self.config.forecast_deadline();
        let cancellation = CancellationToken::new();

        log_stage(&region, Stage::Fetching);
        let (fetches, deadline_exceeded) = self
            .fan_out(&region, request.days_back, deadline, &cancellation)
            .await;

        log_stage(&region, Stage::Harmonizing);
        let range_end = Utc::now().date_naive();
        let range_start = range_end - chrono::Duration::days(request.days_back.max(1) as i64 - 1);
        let defs: Vec<(SourceFetch, &crate::sources::SourceDefinition)> = fetches
            .iter()
            .filter_map(|fetch| {
                self.registry
                    .get(&fetch.source_id)
                    .map(|connector| (fetch.clone(), connector.definition()))
            })
            .collect();
        let harmonized = Harmonizer::harmonize(&defs, (range_start, range_end));

        log_stage(&region, Stage::Composing);
        let computer = IndexComputer::new(self.weights);
        let mut history = computer.compute(&harmonized);
        if history.is_empty() {
            // No source contributed a single usable day: spec.md §4.5's
            // "all parents missing -> neutral 0.5" still needs a day to
            // live on, so the metrics publisher has something to emit.
            history.push(DailyIndex {
                date: range_end,
                composite: 0.5,
                parents: BTreeMap::new(),
                children: BTreeMap::new(),
                contributions: Vec::new(),
                degraded_all_missing: true,
            });
        }
        let all_sources_missing = history.last().map(|day| day.degraded_all_missing).unwrap_or(true);

        log_stage(&region, Stage::Forecasting);
        let composite_history: Vec<(NaiveDate, f64)> = history.iter().map(|d| (d.date, d.composite)).collect();
        let offline_seed = self
            .config
            .offline_mode
            .then_some((region.id.as_str(), request.horizon_days));
        let forecast_output = forecast::forecast(&composite_history, request.horizon_days, offline_seed);

        let degraded = all_sources_missing || deadline_exceeded;
        let degraded_reason = if deadline_exceeded {
            Some("deadline_exceeded".to_string())
        } else if all_sources_missing {
            Some("all_sources_missing".to_string())
        } else {
            None
        };

        // completeness = present_children / total_children across the full
        // tree (SPEC_FULL.md §3), not a fraction of sources: a source can
        // contribute more than one child, and a source reporting `ok` with
        // an insufficient-overlap column still leaves that child missing.
        let present_children = history.last().map(|day| day.children.len()).unwrap_or(0);
        let completeness = present_children as f64 / ALL_CHILDREN.len() as f64;

        let sources: Vec<SourceFetchSummary> = fetches
            .iter()
            .map(|fetch| SourceFetchSummary {
                source_id: fetch.source_id.clone(),
                status: fetch.status,
                points: fetch.series.as_ref().map(|s| s.points.len()).unwrap_or(0),
                last_fetched: fetch.fetched_at,
                error_kind: fetch.error_kind,
            })
            .collect();

        let result = ForecastResult {
            region_id: region.id.clone(),
            created_at: Utc::now(),
            days_back: request.days_back,
            horizon_days: request.horizon_days,
            history,
            forecast: forecast_output.points,
            model_name: forecast_output.model_name,
            model_params: forecast_output.model_params,
            sources,
            data_quality: DataQuality {
                completeness,
                regional_variance_tag: format!("{:.4},{:.4}", region.lat, region.lon),
            },
            degraded,
            degraded_reason,
        };

        log_stage(&region, Stage::Publishing);
        metrics.publish(&result);

        log_stage(&region, Stage::Journaling);
        journal.append(&result).await;

        log_stage(&region, Stage::Done);
        Ok(result)
    }

    /// Fans out one fetch per registered connector, bounded to
    /// `MAX_CONCURRENT_UPSTREAM` simultaneous upstream calls, each mediated
    /// by the fetch cache. Stops admitting new results once the deadline
    /// passes, cancelling in-flight work and draining whatever already
    /// completed rather than waiting further.
    async fn fan_out(
        &self,
        region: &Region,
        window_days: u32,
        deadline: Instant,
        cancellation: &CancellationToken,
    ) -> (Vec<SourceFetch>, bool) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_upstream));
        let mut join_set: JoinSet<SourceFetch> = JoinSet::new();

        for connector in self.registry.iter() {
            let connector = connector.clone();
            let cache = self.cache.clone();
            let semaphore = semaphore.clone();
            let region = region.clone();
            let config = self.config.clone();
            let cancellation = cancellation.clone();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();

                let def_id = connector.definition().id;
                let ttl = config.ttl_override_for(def_id).unwrap_or(connector.definition().ttl);
                let negative_ttl = Duration::from_secs(30);
                let api_key = config.api_key_for(def_id).map(|s| s.to_string());
                let timeout = config.fetch_timeout();
                let offline_mode = config.offline_mode;
                let retry_attempts = config.retry_attempts;
                let retry_base_backoff_ms = config.retry_base_backoff_ms;
                let retry_max_backoff_ms = config.retry_max_backoff_ms;
                let fingerprint = connector.fingerprint(&region, window_days);

                cache
                    .get_or_fetch(fingerprint, ttl, negative_ttl, || async move {
                        let request = FetchRequest {
                            region: &region,
                            window_days,
                            offline_mode,
                            api_key: api_key.as_deref(),
                            timeout,
                            retry_attempts,
                            retry_base_backoff_ms,
                            retry_max_backoff_ms,
                            cancellation,
                        };
                        connector.fetch(&request).await
                    })
                    .await
            });
        }

        let mut fetches = Vec::new();
        let mut deadline_exceeded = false;

        while !join_set.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                deadline_exceeded = true;
                cancellation.cancel();
                drain_completed(&mut join_set, &mut fetches);
                break;
            }

            tokio::select! {
                result = join_set.join_next() => {
                    match result {
                        Some(Ok(fetch)) => fetches.push(fetch),
                        Some(Err(err)) => warn!(error = %err, "connector task did not complete"),
                        None => {}
                    }
                }
                _ = tokio::time::sleep(remaining) => {
                    deadline_exceeded = true;
                    cancellation.cancel();
                    drain_completed(&mut join_set, &mut fetches);
                    break;
                }
            }
        }

        (fetches, deadline_exceeded)
    }
}

fn drain_completed(join_set: &mut JoinSet<SourceFetch>, fetches: &mut Vec<SourceFetch>) {
    while let Some(result) = join_set.try_join_next() {
        if let Ok(fetch) = result {
            fetches.push(fetch);
        }
    }
}

fn log_stage(region: &Region, stage: Stage) {
    info!(region = %region.id, stage = ?stage, "forecast pipeline stage");
}

fn validate_request(request: &ForecastRequest) -> Result<(), AppError> {
    if !(1..=3650).contains(&request.days_back) {
        return Err(AppError::invalid_input(format!(
            "days_back {} out of range [1, 3650]",
            request.days_back
        )));
    }
    if !(1..=90).contains(&request.horizon_days) {
        return Err(AppError::invalid_input(format!(
            "forecast_horizon {} out of range [1, 90]",
            request.horizon_days
        )));
    }
    Ok(())
}
