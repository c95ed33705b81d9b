//! Media attention connector: GDELT news-tone volume and search-interest
//! proxy, feeding `social_disruption`'s `media_attention` and
//! `search_interest` children.

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

const BASE_URL: &str = "https://api.gdeltproject.org/api/v2/doc/doc";

#[derive(Debug, Deserialize)]
struct GdeltResponse {
    #[serde(default)]
    articles: Vec<GdeltArticle>,
}

#[derive(Debug, Deserialize)]
struct GdeltArticle {
    #[serde(default)]
    tone: Option<f64>,
}

pub struct MediaAttentionConnector {
    client: Client,
    definition: SourceDefinition,
}

impl MediaAttentionConnector {
    pub fn new() -> Self {
        Self {
            client: Client::builder().build().expect("failed to build reqwest client"),
            definition: SourceDefinition {
                id: "media_attention",
                name: "GDELT News Attention",
                category: "social",
                classification: Classification::Regional,
                requires_key: false,
                can_run_without_key: true,
                geo_inputs_used: &["region_name"],
                cache_key_fields: &[],
                description: "Article volume and negative-tone share for a region's news coverage",
                features: &[
                    ("media_attention", "media_attention"),
                    ("search_interest", "search_interest"),
                ],
                ttl: Duration::from_secs(10 * 60),
                fill_policy: FillPolicy::InterpolateOnly,
                normalization: NormalizationSpec::RobustIqr,
                mobility_kind: None,
            },
        }
    }
}

impl Default for MediaAttentionConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceConnector for MediaAttentionConnector {
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
                &[("media_attention", (0.0, 1.0)), ("search_interest", (0.0, 1.0))],
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
        let region_name = request.region.name.clone();
        let result = fetch_with_retry(
            request.retry_attempts,
            request.retry_base_backoff_ms,
            request.retry_max_backoff_ms,
            request.timeout,
            &request.cancellation,
            || {
                let region_name = region_name.clone();
                async move {
                    let response = self
                        .client
                        .get(BASE_URL)
                        .query(&[
                            ("query", region_name.as_str()),
                            ("mode", "ArtList"),
                            ("format", "json"),
                        ])
                        .send()
                        .await;
                    match response {
                        Ok(resp) => match resp.json::<GdeltResponse>().await {
                            Ok(parsed) => {
                                let mut series = DailySeries::empty();
                                let today = chrono::Utc::now().date_naive();
                                let volume = (parsed.articles.len() as f64 / 100.0).clamp(0.0, 1.0);
                                let negative_share = if parsed.articles.is_empty() {
                                    0.0
                                } else {
                                    parsed
                                        .articles
                                        .iter()
                                        .filter(|article| article.tone.unwrap_or(0.0) < -2.0)
                                        .count() as f64
                                        / parsed.articles.len() as f64
                                };
                                series.set(today, "media_attention", volume);
                                series.set(today, "search_interest", negative_share);
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
    async fn fingerprint_keys_on_region_name_not_coordinates() {
        let connector = MediaAttentionConnector::new();
        let a = Region::new("us_il", "Illinois", "US", RegionType::State, 40.0, -89.0).unwrap();
        let b = Region::new("us_il2", "Illinois", "US", RegionType::State, 41.0, -90.0).unwrap();
        let fetch_a = connector.fetch(&request(&a)).await;
        let fetch_b = connector.fetch(&request(&b)).await;
        assert_eq!(fetch_a.fingerprint, fetch_b.fingerprint);
    }
}
