//! Fuel price connector: weekly national average retail gasoline price,
//! feeding `economic_stress`'s `fuel_stress` child.

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

const BASE_URL: &str = "https://api.eia.gov/v2/petroleum/pri/gnd/data";

#[derive(Debug, Deserialize)]
struct EiaResponse {
    response: EiaResponseBody,
}

#[derive(Debug, Deserialize)]
struct EiaResponseBody {
    data: Vec<EiaDatum>,
}

#[derive(Debug, Deserialize)]
struct EiaDatum {
    period: chrono::NaiveDate,
    value: f64,
}

pub struct FuelPriceConnector {
    client: Client,
    definition: SourceDefinition,
}

impl FuelPriceConnector {
    pub fn new() -> Self {
        Self {
            client: Client::builder().build().expect("failed to build reqwest client"),
            definition: SourceDefinition {
                id: "fuel_price",
                name: "EIA Retail Gasoline Price",
                category: "economic",
                classification: Classification::National,
                requires_key: true,
                can_run_without_key: false,
                geo_inputs_used: &[],
                cache_key_fields: &["country"],
                description: "Weekly US average retail regular gasoline price from EIA",
                features: &[("fuel_price", "fuel_stress")],
                ttl: Duration::from_secs(30 * 60),
                fill_policy: FillPolicy::ForwardFill { days: 2 },
                normalization: NormalizationSpec::RobustIqr,
                mobility_kind: None,
            },
        }
    }
}

impl Default for FuelPriceConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceConnector for FuelPriceConnector {
    fn definition(&self) -> &SourceDefinition {
        &self.definition
    }

    fn fingerprint(&self, _region: &crate::region::Region, window_days: u32) -> Fingerprint {
        Fingerprint::compute(self.definition().id, &[], window_days, &[("country", "US".into())])
    }

    async fn fetch(&self, request: &FetchRequest<'_>) -> SourceFetch {
        let def = self.definition();
        let fingerprint = self.fingerprint(request.region, request.window_days);

        if def.requires_key && request.api_key.is_none() {
            return SourceFetch::empty(
                def.id,
                request.region.id.clone(),
                request.window_days,
                fingerprint,
                Some(ErrorKind::MissingCredentials),
            );
        }

        if request.offline_mode {
            let series = synthetic_series(
                def.id,
                &request.region.id,
                &[("fuel_price", (2.50, 4.75))],
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
        let api_key = request.api_key.unwrap_or_default().to_string();
        let end_date = chrono::Utc::now().date_naive();
        let start_date = end_date - chrono::Duration::days(request.window_days.max(1) as i64 - 1);
        let result = fetch_with_retry(
            request.retry_attempts,
            request.retry_base_backoff_ms,
            request.retry_max_backoff_ms,
            request.timeout,
            &request.cancellation,
            || {
                let api_key = api_key.clone();
                async move {
                    let response = self
                        .client
                        .get(BASE_URL)
                        .query(&[
                            ("api_key", api_key.as_str()),
                            ("frequency", "weekly"),
                            ("start", &start_date.to_string()),
                            ("end", &end_date.to_string()),
                        ])
                        .send()
                        .await;
                    match response {
                        Ok(resp) => match resp.json::<EiaResponse>().await {
                            Ok(parsed) => {
                                let mut series = DailySeries::empty();
                                for datum in parsed.response.data {
                                    series.set(datum.period, "fuel_price", datum.value);
                                }
                                Attempt::Success(series)
                            }
                            Err(_) => Attempt::Failed,
                        },
                        Err(_) => Attempt::Failed,
                    }
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
            window_days: 90,
            offline_mode: true,
            api_key: Some("key"),
            timeout: Duration::from_secs(1),
            retry_attempts: 2,
            retry_base_backoff_ms: 1,
            retry_max_backoff_ms: 5,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn national_scope_fingerprint_matches_across_regions() {
        let connector = FuelPriceConnector::new();
        let il = Region::new("us_il", "Illinois", "US", RegionType::State, 40.0, -89.0).unwrap();
        let az = Region::new("us_az", "Arizona", "US", RegionType::State, 34.0, -112.0).unwrap();
        let a = connector.fetch(&request(&il)).await;
        let b = connector.fetch(&request(&az)).await;
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[tokio::test]
    async fn produces_fuel_price_feature() {
        let connector = FuelPriceConnector::new();
        let region = Region::new("us_il", "Illinois", "US", RegionType::State, 40.0, -89.0).unwrap();
        let fetch = connector.fetch(&request(&region)).await;
        let series = fetch.series.unwrap();
        assert!(series.dates().count() > 0);
        assert!(series.get(*series.dates().next().unwrap(), "fuel_price").is_some());
    }
}
