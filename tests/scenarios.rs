//! End-to-end scenario tests: run the full orchestrator (fetch -> harmonize
//! -> compose -> forecast -> publish -> journal) against an offline
//! `AppState`-equivalent, per SPEC_FULL.md §8's scenario list.
//!
//! Scenarios 1/2/5 (deterministic offline forecast, regional variance,
//! cache single-flight) are covered by unit tests colocated with
//! `orchestrator.rs` and `cache.rs`. This file covers the three scenarios
//! that need a full `Orchestrator::run` against deliberately unhealthy or
//! slow sources: partial-failure degrade (3), all-sources-missing (4), and
//! deadline degrade (6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use behavior_forecaster::cache::FetchCache;
use behavior_forecaster::config::AppConfig;
use behavior_forecaster::error::ErrorKind;
use behavior_forecaster::index::weights::ParentWeights;
use behavior_forecaster::journal::Journal;
use behavior_forecaster::metrics::MetricsPublisher;
use behavior_forecaster::orchestrator::{ForecastRequest, Orchestrator};
use behavior_forecaster::region::RegionRegistry;
use behavior_forecaster::series::{DailySeries, FetchStatus, Fingerprint, SourceFetch};
use behavior_forecaster::sources::{
    Classification, FetchRequest, FillPolicy, NormalizationSpec, SourceConnector, SourceDefinition,
    SourceRegistry,
};

fn config(offline_mode: bool, forecast_deadline_seconds: u64, api_keys: HashMap<String, String>) -> Arc<AppConfig> {
    Arc::new(AppConfig {
        cache_max_size: 1000,
        cache_ttl_overrides_minutes: HashMap::new(),
        max_concurrent_upstream: 8,
        max_concurrent_requests: 64,
        forecast_deadline_seconds,
        offline_mode,
        api_keys,
        journal_path: None,
        retry_attempts: 1,
        retry_base_backoff_ms: 1,
        retry_max_backoff_ms: 5,
        fetch_timeout_seconds: 10,
        port: 8080,
    })
}

fn request() -> ForecastRequest {
    ForecastRequest {
        region_id: "us_il".into(),
        region_name: None,
        lat: 40.0,
        lon: -89.0,
        days_back: 30,
        horizon_days: 7,
    }
}

/// Always returns `Empty` with `missing_credentials` — stands in for a
/// source that has no configured API key and never touches the network,
/// so scenario 4 doesn't depend on real upstream reachability.
struct AlwaysEmptyConnector {
    definition: SourceDefinition,
}

impl AlwaysEmptyConnector {
    fn new(id: &'static str) -> Self {
        Self {
            definition: SourceDefinition {
                id,
                name: "Test Always-Empty Source",
                category: "test",
                classification: Classification::Global,
                requires_key: true,
                can_run_without_key: false,
                geo_inputs_used: &[],
                cache_key_fields: &[],
                description: "deterministic empty source for scenario tests",
                features: &[],
                ttl: Duration::from_secs(60),
                fill_policy: FillPolicy::InterpolateOnly,
                normalization: NormalizationSpec::FixedRange { min: 0.0, max: 1.0 },
                mobility_kind: None,
            },
        }
    }
}

#[async_trait]
impl SourceConnector for AlwaysEmptyConnector {
    fn definition(&self) -> &SourceDefinition {
        &self.definition
    }

    fn fingerprint(&self, _region: &behavior_forecaster::region::Region, window_days: u32) -> Fingerprint {
        Fingerprint::compute(self.definition.id, &[], window_days, &[])
    }

    async fn fetch(&self, request: &FetchRequest<'_>) -> SourceFetch {
        SourceFetch::empty(
            self.definition.id,
            request.region.id.clone(),
            request.window_days,
            self.fingerprint(request.region, request.window_days),
            Some(ErrorKind::MissingCredentials),
        )
    }
}

/// Returns `Ok` with a trivial series almost immediately.
struct FastConnector {
    definition: SourceDefinition,
}

impl FastConnector {
    fn new() -> Self {
        Self {
            definition: SourceDefinition {
                id: "test_fast",
                name: "Test Fast Source",
                category: "test",
                classification: Classification::Global,
                requires_key: false,
                can_run_without_key: true,
                geo_inputs_used: &[],
                cache_key_fields: &[],
                description: "deterministic fast source for scenario tests",
                features: &[("fast_feature", "media_attention")],
                ttl: Duration::from_secs(60),
                fill_policy: FillPolicy::InterpolateOnly,
                normalization: NormalizationSpec::FixedRange { min: 0.0, max: 1.0 },
                mobility_kind: None,
            },
        }
    }
}

#[async_trait]
impl SourceConnector for FastConnector {
    fn definition(&self) -> &SourceDefinition {
        &self.definition
    }

    fn fingerprint(&self, _region: &behavior_forecaster::region::Region, window_days: u32) -> Fingerprint {
        Fingerprint::compute(self.definition.id, &[], window_days, &[])
    }

    async fn fetch(&self, request: &FetchRequest<'_>) -> SourceFetch {
        let mut series = DailySeries::empty();
        let end = chrono::Utc::now().date_naive();
        for offset in 0..request.window_days.min(30) {
            series.set(end - chrono::Duration::days(offset as i64), "fast_feature", 0.4);
        }
        SourceFetch::ok(
            self.definition.id,
            request.region.id.clone(),
            request.window_days,
            self.fingerprint(request.region, request.window_days),
            series,
            1,
            5,
        )
    }
}

/// Sleeps far longer than any deadline used in these tests before
/// returning `Ok` — stands in for a slow/unreachable upstream without an
/// actual network dependency.
struct SlowConnector {
    definition: SourceDefinition,
}

impl SlowConnector {
    fn new() -> Self {
        Self {
            definition: SourceDefinition {
                id: "test_slow",
                name: "Test Slow Source",
                category: "test",
                classification: Classification::Global,
                requires_key: false,
                can_run_without_key: true,
                geo_inputs_used: &[],
                cache_key_fields: &[],
                description: "deterministic slow source for scenario tests",
                features: &[("slow_feature", "search_interest")],
                ttl: Duration::from_secs(60),
                fill_policy: FillPolicy::InterpolateOnly,
                normalization: NormalizationSpec::FixedRange { min: 0.0, max: 1.0 },
                mobility_kind: None,
            },
        }
    }
}

#[async_trait]
impl SourceConnector for SlowConnector {
    fn definition(&self) -> &SourceDefinition {
        &self.definition
    }

    fn fingerprint(&self, _region: &behavior_forecaster::region::Region, window_days: u32) -> Fingerprint {
        Fingerprint::compute(self.definition.id, &[], window_days, &[])
    }

    async fn fetch(&self, request: &FetchRequest<'_>) -> SourceFetch {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let mut series = DailySeries::empty();
        series.set(chrono::Utc::now().date_naive(), "slow_feature", 0.3);
        SourceFetch::ok(
            self.definition.id,
            request.region.id.clone(),
            request.window_days,
            self.fingerprint(request.region, request.window_days),
            series,
            1,
            5000,
        )
    }
}

fn orchestrator_with(config: Arc<AppConfig>, registry: SourceRegistry) -> Orchestrator {
    Orchestrator::new(
        config,
        Arc::new(RegionRegistry::default_catalog()),
        Arc::new(registry),
        Arc::new(FetchCache::new(1000)),
        ParentWeights::DEFAULT,
    )
}

/// Scenario 3: every keyed connector configured without credentials, at
/// least one parent still present. Expect a clean (non-degraded) result
/// with `missing_credentials` recorded for the unconfigured sources.
#[tokio::test]
async fn partial_failure_degrade() {
    let config = config(true, 60, HashMap::new());
    let registry = SourceRegistry::default_registry();
    let orchestrator = orchestrator_with(config, registry);
    let metrics = MetricsPublisher::noop();
    let journal = Journal::disabled();

    let result = orchestrator.run(request(), &metrics, &journal).await.unwrap();

    assert!(!result.degraded, "result should not be degraded: at least one parent is present");

    let economic = result.sources.iter().find(|s| s.source_id == "economic_index").unwrap();
    assert_eq!(economic.status, FetchStatus::Empty);
    assert_eq!(economic.error_kind, Some(ErrorKind::MissingCredentials));

    let fuel = result.sources.iter().find(|s| s.source_id == "fuel_price").unwrap();
    assert_eq!(fuel.status, FetchStatus::Empty);
    assert_eq!(fuel.error_kind, Some(ErrorKind::MissingCredentials));

    let weather = result.sources.iter().find(|s| s.source_id == "weather").unwrap();
    assert_eq!(weather.status, FetchStatus::Ok);
}

/// Scenario 4: every source returns `empty`. Expect `degraded=true`,
/// `composite=0.5`, and `data_source_status` (status != Ok) for every
/// source.
#[tokio::test]
async fn all_sources_missing_yields_neutral_composite() {
    let config = config(false, 60, HashMap::new());
    let registry = SourceRegistry::new(vec![
        Arc::new(AlwaysEmptyConnector::new("test_empty_a")),
        Arc::new(AlwaysEmptyConnector::new("test_empty_b")),
    ]);
    let orchestrator = orchestrator_with(config, registry);
    let metrics = MetricsPublisher::noop();
    let journal = Journal::disabled();

    let result = orchestrator.run(request(), &metrics, &journal).await.unwrap();

    assert!(result.degraded);
    assert_eq!(result.degraded_reason.as_deref(), Some("all_sources_missing"));
    let latest = result.history.last().unwrap();
    assert_eq!(latest.composite, 0.5);
    assert!(latest.degraded_all_missing);
    assert!(!result.sources.is_empty());
    for source in &result.sources {
        assert_ne!(source.status, FetchStatus::Ok);
    }
}

/// Scenario 6: a short deadline with one fast and one slow source. Expect
/// a degraded response with `degraded_reason="deadline_exceeded"`, and the
/// fast source's result still included.
#[tokio::test]
async fn deadline_degrade_includes_fast_sources() {
    let config = config(false, 1, HashMap::new());
    let registry = SourceRegistry::new(vec![Arc::new(FastConnector::new()), Arc::new(SlowConnector::new())]);
    let orchestrator = orchestrator_with(config, registry);
    let metrics = MetricsPublisher::noop();
    let journal = Journal::disabled();

    let result = orchestrator.run(request(), &metrics, &journal).await.unwrap();

    assert!(result.degraded);
    assert_eq!(result.degraded_reason.as_deref(), Some("deadline_exceeded"));
    let fast = result.sources.iter().find(|s| s.source_id == "test_fast");
    assert!(fast.is_some(), "fast source should have completed before the deadline");
    assert_eq!(fast.unwrap().status, FetchStatus::Ok);
}
