//! Prometheus metrics publisher.
//!
//! Grounded on the teacher's own `Cargo.toml`, which already pins `metrics`
//! and `metrics-exporter-prometheus` but never wires them (the teacher's
//! `performance/metrics.rs` hand-rolls a JSON snapshot instead). This
//! installs the recorder those two crates were chosen for.

use std::collections::HashMap;

use metrics::{describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::RwLock;
use tracing::warn;

use crate::index::weights::parent_for_child;
use crate::index::derived::latest_derived_metrics;
use crate::orchestrator::ForecastResult;
use crate::series::FetchStatus;

/// Publishes a `ForecastResult` as a set of per-region gauges and renders
/// the Prometheus text exposition for `GET /metrics`.
///
/// Two invariants this type enforces centrally rather than trusting every
/// call site:
/// - cardinality: a region label is never `""` or the literal `"None"`
///   (mirrors `region::validate_region_id`, re-checked here because a
///   metrics label leak is much harder to notice than a rejected request).
/// - write ordering: a publish for a region only applies if its result's
///   `created_at` is `>=` the last-applied timestamp for that region, so a
///   slow/delayed task can never stomp a newer result that already landed.
pub struct MetricsPublisher {
    handle: Option<PrometheusHandle>,
    last_published_at: RwLock<HashMap<String, chrono::DateTime<chrono::Utc>>>,
}

impl MetricsPublisher {
    /// Installs the global `metrics` recorder backed by a Prometheus
    /// exporter. Must be called at most once per process.
    pub fn install() -> Result<Self, crate::error::AppError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|err| crate::error::AppError::internal(format!("failed to install metrics recorder: {err}")))?;
        describe_metrics();
        Ok(Self { handle: Some(handle), last_published_at: RwLock::new(HashMap::new()) })
    }

    /// A publisher with nowhere to render to, for one-shot CLI runs and
    /// tests where no HTTP `/metrics` endpoint exists to serve.
    pub fn noop() -> Self {
        Self { handle: None, last_published_at: RwLock::new(HashMap::new()) }
    }

    /// Prometheus text exposition of everything published so far. Empty
    /// string if this publisher was built with `noop`.
    pub fn render(&self) -> String {
        self.handle.as_ref().map(|h| h.render()).unwrap_or_default()
    }

    pub fn publish(&self, result: &ForecastResult) {
        let region = result.region_id.as_str();
        if region.is_empty() || region == "None" {
            warn!(region, "refusing to publish metrics: cardinality invariant violated");
            return;
        }

        let should_publish = {
            let mut last = self.last_published_at.write();
            let is_newer = last.get(region).map(|prev| result.created_at >= *prev).unwrap_or(true);
            if is_newer {
                last.insert(region.to_string(), result.created_at);
            }
            is_newer
        };
        if !should_publish {
            warn!(region, "dropping stale metrics publish: a newer result already applied");
            return;
        }

        let Some(latest) = result.history.last() else { return };

        gauge!("behavior_index", "region" => region.to_string()).set(latest.composite);

        for (parent, value) in &latest.parents {
            gauge!("parent_subindex_value", "region" => region.to_string(), "parent" => parent.clone()).set(*value);
        }
        for (child, value) in &latest.children {
            if let Some(parent) = parent_for_child(child) {
                gauge!(
                    "child_subindex_value",
                    "region" => region.to_string(),
                    "parent" => parent.to_string(),
                    "child" => child.clone()
                )
                .set(*value);
            }
        }
        for contribution in &latest.contributions {
            gauge!(
                "subindex_contribution",
                "region" => region.to_string(),
                "parent" => contribution.parent.clone(),
                "child" => contribution.child.clone()
            )
            .set(contribution.weight);
        }

        for source in &result.sources {
            let status_value = if source.status == FetchStatus::Ok { 1.0 } else { 0.0 };
            gauge!(
                "data_source_status",
                "region" => region.to_string(),
                "source" => source.source_id.clone()
            )
            .set(status_value);
            if source.status == FetchStatus::Ok {
                gauge!(
                    "data_source_last_success_timestamp_seconds",
                    "region" => region.to_string(),
                    "source" => source.source_id.clone()
                )
                .set(source.last_fetched.timestamp() as f64);
            }
        }

        gauge!(
            "forecast_points_generated",
            "region" => region.to_string(),
            "model" => result.model_name.as_str()
        )
        .set(result.forecast.len() as f64);
        gauge!("forecast_last_updated_timestamp_seconds", "region" => region.to_string())
            .set(result.created_at.timestamp() as f64);

        let derived = latest_derived_metrics(&result.history);
        if let Some(delta) = derived.delta_7d {
            gauge!("behavior_index_delta_7d", "region" => region.to_string()).set(delta);
        }
        if let Some(delta) = derived.delta_30d {
            gauge!("behavior_index_delta_30d", "region" => region.to_string()).set(delta);
        }
        if let Some(delta) = derived.delta_90d {
            gauge!("behavior_index_delta_90d", "region" => region.to_string()).set(delta);
        }
        if let Some(volatility) = derived.volatility_30d {
            gauge!("behavior_index_volatility_30d", "region" => region.to_string()).set(volatility);
        }
    }
}

fn describe_metrics() {
    describe_gauge!("behavior_index", Unit::Count, "Latest composite behavior index value for a region, in [0, 1]");
    describe_gauge!("parent_subindex_value", Unit::Count, "Latest parent-level sub-index value for a region");
    describe_gauge!("child_subindex_value", Unit::Count, "Latest child-level sub-index value for a region");
    describe_gauge!("subindex_contribution", Unit::Count, "Equal-weight share a child contributes within its parent");
    describe_gauge!("data_source_status", Unit::Count, "1 if the source's most recent fetch was healthy, else 0");
    describe_gauge!(
        "data_source_last_success_timestamp_seconds",
        Unit::Seconds,
        "Unix timestamp of a source's last healthy fetch"
    );
    describe_gauge!("forecast_points_generated", Unit::Count, "Number of forecast points produced by the last run");
    describe_gauge!(
        "forecast_last_updated_timestamp_seconds",
        Unit::Seconds,
        "Unix timestamp of the last completed forecast for a region"
    );
    describe_gauge!("behavior_index_delta_7d", Unit::Count, "7-day change in the composite behavior index");
    describe_gauge!("behavior_index_delta_30d", Unit::Count, "30-day change in the composite behavior index");
    describe_gauge!("behavior_index_delta_90d", Unit::Count, "90-day change in the composite behavior index");
    describe_gauge!(
        "behavior_index_volatility_30d",
        Unit::Count,
        "30-day rolling standard deviation of the composite behavior index"
    );
}
