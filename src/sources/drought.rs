//! Drought connector: Standardized Precipitation Index proxy from the US
//! Drought Monitor, feeding `environmental_stress`'s `drought_stress`
//! child.

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

const BASE_URL: &str = "https://droughtmonitor.unl.edu/DmData/DataTables.aspx/ReturnNationalData";

#[derive(Debug, Deserialize)]
struct DroughtRecord {
    #[serde(rename = "ValidStart")]
    valid_start: chrono::NaiveDate,
    #[serde(rename = "DSCI")]
    dsci: f64,
}

pub struct DroughtConnector {
    client: Client,
    definition: SourceDefinition,
}

impl DroughtConnector {
    pub fn new() -> Self {
        Self {
            client: Client::builder().build().expect("failed to build reqwest client"),
            definition: SourceDefinition {
                id: "drought",
                name: "US Drought Monitor",
                category: "environmental",
                classification: Classification::Regional,
                requires_key: false,
                can_run_without_key: true,
                geo_inputs_used: &["lat", "lon"],
                cache_key_fields: &[],
                description: "Drought Severity and Coverage Index by coordinate, scaled to [0, 1]",
                features: &[("spi", "drought_stress")],
                ttl: Duration::from_secs(60 * 60),
                fill_policy: FillPolicy::InterpolateOnly,
                normalization: NormalizationSpec::FixedRange { min: 0.0, max: 1.0 },
                mobility_kind: None,
            },
        }
    }
}

impl Default for DroughtConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceConnector for DroughtConnector {
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
                &[("spi", (0.0, 1.0))],
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
        let end_date = chrono::Utc::now().date_naive();
        let start_date = end_date - chrono::Duration::days(request.window_days.max(1) as i64 - 1);
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
                    .query(&[
                        ("lat", lat.to_string()),
                        ("lon", lon.to_string()),
                        ("startdate", start_date.to_string()),
                        ("enddate", end_date.to_string()),
                    ])
                    .send()
                    .await;
                match response {
                    Ok(resp) => match resp.json::<Vec<DroughtRecord>>().await {
                        Ok(records) => {
                            let mut series = DailySeries::empty();
                            for record in records {
                                series.set(record.valid_start, "spi", (record.dsci / 500.0).clamp(0.0, 1.0));
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

    fn request(region: &Region) -> FetchRequest<'_> {
        FetchRequest {
            region,
            window_days: 60,
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
    async fn regional_scope_diverges_by_coordinate() {
        let connector = DroughtConnector::new();
        let il = Region::new("us_il", "Illinois", "US", RegionType::State, 40.0, -89.0).unwrap();
        let az = Region::new("us_az", "Arizona", "US", RegionType::State, 34.0, -112.0).unwrap();
        let a = connector.fetch(&request(&il)).await;
        let b = connector.fetch(&request(&az)).await;
        assert_ne!(a.fingerprint, b.fingerprint);
    }
}
