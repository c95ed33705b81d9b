//! Storm events connector: active weather alerts from the National
//! Weather Service, split into storm-severity and flood-risk stress,
//! feeding `environmental_stress`'s `storm_severity_stress` and
//! `flood_risk_stress` children.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::ErrorKind;
use crate::series::{DailySeries, Fingerprint, SourceFetch};
use crate::sources::offline::synthetic_series;
use crate::sources::retry::{fetch_with_retry, Attempt};
use crate::sources::{
    Classification, FetchRequest, FillPolicy, NormalizationSpec, SourceConnector, SourceDefinition,
};

const BASE_URL: &str = "https://api.weather.gov/alerts/active";

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    features: Vec<AlertFeature>,
}

#[derive(Debug, Deserialize)]
struct AlertFeature {
    properties: AlertProperties,
}

#[derive(Debug, Deserialize)]
struct AlertProperties {
    severity: String,
    event: String,
    #[serde(rename = "onset")]
    onset: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct StormEventsConnector {
    client: Client,
    definition: SourceDefinition,
}

impl StormEventsConnector {
    pub fn new() -> Self {
        Self {
            client: Client::builder().build().expect("failed to build reqwest client"),
            definition: SourceDefinition {
                id: "storm_events",
                name: "NWS Active Alerts",
                category: "environmental",
                classification: Classification::Regional,
                requires_key: false,
                can_run_without_key: true,
                geo_inputs_used: &["lat", "lon"],
                cache_key_fields: &[],
                description: "Active severe-weather alert severity and flood-specific risk near a coordinate",
                features: &[
                    ("storm_severity", "storm_severity_stress"),
                    ("flood_risk", "flood_risk_stress"),
                ],
                ttl: Duration::from_secs(10 * 60),
                fill_policy: FillPolicy::InterpolateOnly,
                normalization: NormalizationSpec::FixedRange { min: 0.0, max: 1.0 },
                mobility_kind: None,
            },
        }
    }

    fn severity_score(severity: &str) -> f64 {
        match severity {
            "Extreme" => 1.0,
            "Severe" => 0.75,
            "Moderate" => 0.45,
            "Minor" => 0.2,
            _ => 0.0,
        }
    }
}

impl Default for StormEventsConnector {
    fn default() -> Self {
        Self::new()
    }
}

/// Repeats a snapshot-valued reading across every day of the requested
/// window, ending today. Used by connectors whose upstream only exposes
/// current state (no historical query), so the harmonizer still sees full
/// coverage instead of a single point it has no basis to fill backward
/// from.
fn repeat_across_window(values: &[(&str, f64)], window_days: u32) -> DailySeries {
    let mut series = DailySeries::empty();
    let end = chrono::Utc::now().date_naive();
    let start = end - chrono::Duration::days(window_days.max(1) as i64 - 1);
    let mut date = start;
    while date <= end {
        for (feature, value) in values {
            series.set(date, *feature, *value);
        }
        date += chrono::Duration::days(1);
    }
    series
}

#[async_trait]
impl SourceConnector for StormEventsConnector {
    fn definition(&self) -> &SourceDefinition {
        &self.definition
    }

    fn fingerprint(&self, region: &crate::region::Region, window_days: u32) -> Fingerprint {
        Fingerprint::compute(
            self.definition().id,
            &[
                ("lat", format!("{:.2}", region.lat)),
                ("lon", format!("{:.2}", region.lon)),
            ],
            window_days,
            &[],
        )
    }

    async fn fetch(&self, request: &FetchRequest<'_>) -> SourceFetch {
        let def = self.definition();
        let fingerprint = self.fingerprint(request.region, request.window_days);

        if request.offline_mode {
            let series = synthetic_series(
                def.id,
                &request.region.id,
                &[("storm_severity", (0.0, 0.6)), ("flood_risk", (0.0, 0.5))],
                request.window_days,
            );
            return SourceFetch::ok(
                def.id,
                request.region.id.clone(),
                request.window_days,
                fingerprint,
                series,
                1,
                0,
            );
        }

        let start = std::time::Instant::now();
        let lat = request.region.lat;
        let lon = request.region.lon;
        let window_days = request.window_days;
        let result = fetch_with_retry(
            request.retry_attempts,
            request.retry_base_backoff_ms,
            request.retry_max_backoff_ms,
            request.timeout,
            &request.cancellation,
            || async move {
                let response = self
                    .client
                    .get(BASE_URL)
                    .query(&[("point", format!("{lat},{lon}"))])
                    .send()
                    .await;
                match response {
                    Ok(resp) => match resp.json::<AlertsResponse>().await {
                        Ok(parsed) => {
                            let mut storm_max: f64 = 0.0;
                            let mut flood_max: f64 = 0.0;
                            for feature in parsed.features {
                                let score = Self::severity_score(&feature.properties.severity);
                                storm_max = storm_max.max(score);
                                if feature.properties.event.to_lowercase().contains("flood") {
                                    flood_max = flood_max.max(score);
                                }
                            }
                            // NWS only exposes currently-active alerts, not a history of
                            // past severity — carry today's reading across the whole
                            // requested window rather than leaving every earlier day
                            // uncovered.
                            let series = repeat_across_window(
                                &[("storm_severity", storm_max), ("flood_risk", flood_max)],
                                window_days,
                            );
                            Attempt::Success(series)
                        }
                        Err(_) => Attempt::Failed,
                    },
                    Err(_) => Attempt::Failed,
                }
            },
        )
        .await;

        match result {
            Ok((series, attempts)) if !series.is_empty() => SourceFetch::ok(
                def.id,
                request.region.id.clone(),
                request.window_days,
                fingerprint,
                series,
                attempts,
                start.elapsed().as_millis() as u64,
            ),
            Ok((_, attempts)) => SourceFetch::error(
                def.id,
                request.region.id.clone(),
                request.window_days,
                fingerprint,
                ErrorKind::UpstreamUnavailable,
                attempts,
            ),
            Err(kind) => SourceFetch::error(
                def.id,
                request.region.id.clone(),
                request.window_days,
                fingerprint,
                kind,
                request.retry_attempts,
            ),
        }
    }
}
