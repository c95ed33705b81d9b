//! Economic index connector: market volatility and consumer sentiment,
//! both national-scope series (FRED-style indices), feeding
//! `economic_stress`'s `market_volatility` and `consumer_sentiment`
//! children.

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

const BASE_URL: &str = "https://api.stlouisfed.org/fred/series/observations";

#[derive(Debug, Deserialize)]
struct FredResponse {
    observations: Vec<FredObservation>,
}

#[derive(Debug, Deserialize)]
struct FredObservation {
    date: chrono::NaiveDate,
    value: String,
}

pub struct EconomicIndexConnector {
    client: Client,
    definition: SourceDefinition,
}

impl EconomicIndexConnector {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .build()
                .expect("failed to build reqwest client"),
            definition: SourceDefinition {
                id: "economic_index",
                name: "FRED Economic Indices",
                category: "economic",
                classification: Classification::National,
                requires_key: true,
                can_run_without_key: false,
                geo_inputs_used: &[],
                cache_key_fields: &["country"],
                description: "Market volatility (VIX) and consumer sentiment (UMCSENT) from FRED, national scope",
                features: &[
                    ("market_volatility", "market_volatility"),
                    ("consumer_sentiment", "consumer_sentiment"),
                ],
                ttl: Duration::from_secs(5 * 60),
                fill_policy: FillPolicy::ForwardFill { days: 2 },
                normalization: NormalizationSpec::FixedRange { min: 0.0, max: 1.0 },
                mobility_kind: None,
            },
        }
    }

    async fn fetch_series(
        &self,
        series_id: &str,
        feature: &'static str,
        window_days: u32,
        out: &mut DailySeries,
    ) -> Result<(), ()> {
        let response = self
            .client
            .get(BASE_URL)
            .query(&[
                ("series_id", series_id),
                ("file_type", "json"),
                ("sort_order", "desc"),
                ("limit", &window_days.to_string()),
            ])
            .send()
            .await
            .map_err(|_| ())?
            .json::<FredResponse>()
            .await
            .map_err(|_| ())?;

        for obs in response.observations {
            if let Ok(value) = obs.value.trim().parse::<f64>() {
                out.set(obs.date, feature, value);
            }
        }
        Ok(())
    }
}

impl Default for EconomicIndexConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceConnector for EconomicIndexConnector {
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
                &[
                    ("market_volatility", (0.05, 0.9)),
                    ("consumer_sentiment", (0.1, 0.95)),
                ],
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
                let mut out = DailySeries::empty();
                let ok = self
                    .fetch_series("VIXCLS", "market_volatility", request.window_days, &mut out)
                    .await
                    .is_ok()
                    && self
                        .fetch_series("UMCSENT", "consumer_sentiment", request.window_days, &mut out)
                        .await
                        .is_ok();
                if ok {
                    Attempt::Success(out)
                } else {
                    Attempt::Failed
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
    use crate::region::Region;
    use tokio_util::sync::CancellationToken;

    fn request(region: &Region, offline: bool, api_key: Option<&str>) -> FetchRequest<'_> {
        FetchRequest {
            region,
            window_days: 30,
            offline_mode: offline,
            api_key,
            timeout: Duration::from_secs(1),
            retry_attempts: 2,
            retry_base_backoff_ms: 1,
            retry_max_backoff_ms: 5,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn missing_credentials_is_recorded_not_errored() {
        let connector = EconomicIndexConnector::new();
        let region = Region::new("us_il", "Illinois", "US", crate::region::RegionType::State, 40.0, -89.0).unwrap();
        let req = request(&region, false, None);
        let fetch = connector.fetch(&req).await;
        assert!(matches!(fetch.status, crate::series::FetchStatus::Empty));
        assert_eq!(fetch.error_kind, Some(ErrorKind::MissingCredentials));
    }

    #[tokio::test]
    async fn national_scope_ignores_region_in_fingerprint() {
        let connector = EconomicIndexConnector::new();
        let il = Region::new("us_il", "Illinois", "US", crate::region::RegionType::State, 40.0, -89.0).unwrap();
        let az = Region::new("us_az", "Arizona", "US", crate::region::RegionType::State, 34.0, -112.0).unwrap();
        let fetch_il = connector.fetch(&request(&il, true, Some("key"))).await;
        let fetch_az = connector.fetch(&request(&az, true, Some("key"))).await;
        assert_eq!(fetch_il.fingerprint, fetch_az.fingerprint);
    }

    #[tokio::test]
    async fn offline_mode_never_returns_error() {
        let connector = EconomicIndexConnector::new();
        let region = Region::new("us_il", "Illinois", "US", crate::region::RegionType::State, 40.0, -89.0).unwrap();
        let fetch = connector.fetch(&request(&region, true, Some("key"))).await;
        assert!(matches!(fetch.status, crate::series::FetchStatus::Ok));
    }
}
