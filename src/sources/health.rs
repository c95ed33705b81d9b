//! Public health connector: CDC-style syndromic surveillance proxy,
//! feeding `social_disruption`'s `health_risk_proxy` child.

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

const BASE_URL: &str = "https://data.cdc.gov/resource/rdmq-nq56.json";

#[derive(Debug, Deserialize)]
struct CdcRecord {
    week_end: chrono::NaiveDate,
    #[serde(deserialize_with = "deserialize_str_f64")]
    percent_visits_ili: f64,
}

fn deserialize_str_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse::<f64>().map_err(serde::de::Error::custom)
}

pub struct PublicHealthConnector {
    client: Client,
    definition: SourceDefinition,
}

impl PublicHealthConnector {
    pub fn new() -> Self {
        Self {
            client: Client::builder().build().expect("failed to build reqwest client"),
            definition: SourceDefinition {
                id: "public_health",
                name: "CDC Syndromic Surveillance",
                category: "social",
                classification: Classification::Regional,
                requires_key: false,
                can_run_without_key: true,
                geo_inputs_used: &["region_name"],
                cache_key_fields: &[],
                description: "Influenza-like-illness visit share as a regional health-stress proxy",
                features: &[("health_proxy", "health_risk_proxy")],
                ttl: Duration::from_secs(60 * 60),
                fill_policy: FillPolicy::InterpolateOnly,
                normalization: NormalizationSpec::FixedRange { min: 0.0, max: 12.0 },
                mobility_kind: None,
            },
        }
    }
}

impl Default for PublicHealthConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceConnector for PublicHealthConnector {
    fn definition(&self) -> &SourceDefinition {
        &self.definition
    }

    fn fingerprint(&self, region: &crate::region::Region, window_days: u32) -> Fingerprint {
        Fingerprint::compute(
            self.definition().id,
            &[("region_name", region.name.clone())],
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
                &[("health_proxy", (0.5, 8.0))],
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
        let result = fetch_with_retry(
            request.retry_attempts,
            request.retry_base_backoff_ms,
            request.retry_max_backoff_ms,
            request.timeout,
            &request.cancellation,
            || async {
                let response = self
                    .client
                    .get(BASE_URL)
                    .query(&[("$order", "week_end DESC"), ("$limit", "52")])
                    .send()
                    .await;
                match response {
                    Ok(resp) => match resp.json::<Vec<CdcRecord>>().await {
                        Ok(records) => {
                            let mut series = DailySeries::empty();
                            for record in records {
                                series.set(record.week_end, "health_proxy", record.percent_visits_ili);
                            }
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

    #[tokio::test]
    async fn offline_series_stays_within_normalization_band() {
        let connector = PublicHealthConnector::new();
        let region = Region::new("us_il", "Illinois", "US", RegionType::State, 40.0, -89.0).unwrap();
        let req = FetchRequest {
            region: &region,
            window_days: 30,
            offline_mode: true,
            api_key: None,
            timeout: Duration::from_secs(1),
            retry_attempts: 2,
            retry_base_backoff_ms: 1,
            retry_max_backoff_ms: 5,
            cancellation: CancellationToken::new(),
        };
        let fetch = connector.fetch(&req).await;
        let series = fetch.series.unwrap();
        for row in series.points.values() {
            let value = row["health_proxy"];
            assert!((0.0..=12.0).contains(&value));
        }
    }
}
