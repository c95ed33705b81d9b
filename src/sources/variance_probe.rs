//! Self-test: confirms REGIONAL connectors actually vary by region, so a
//! misconfigured connector that silently ignores its geo inputs (and
//! would otherwise cache-collide every region onto one fingerprint) gets
//! caught before it reaches production traffic.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::region::{Region, RegionType};
use crate::sources::{Classification, FetchRequest, SourceRegistry};

#[derive(Debug, Clone)]
pub struct VarianceProbeResult {
    pub source_id: String,
    pub passed: bool,
    pub detail: String,
}

/// Runs every REGIONAL connector against two distinct probe regions in
/// offline mode and checks the resulting fingerprints and feature values
/// actually differ. GLOBAL/NATIONAL connectors are skipped — they are
/// supposed to produce identical output across regions.
pub async fn run_variance_probe(registry: &SourceRegistry) -> Vec<VarianceProbeResult> {
    let region_a = Region::new("probe_a", "Probe A", "ZZ", RegionType::Custom, 10.0, 10.0)
        .expect("probe region is valid");
    let region_b = Region::new("probe_b", "Probe B", "ZZ", RegionType::Custom, -35.0, 150.0)
        .expect("probe region is valid");

    let mut results = Vec::new();
    for connector in registry.iter() {
        let def = connector.definition();
        if def.classification != Classification::Regional {
            continue;
        }

        let request_a = probe_request(&region_a);
        let request_b = probe_request(&region_b);
        let fetch_a = connector.fetch(&request_a).await;
        let fetch_b = connector.fetch(&request_b).await;

        let fingerprints_diverge = fetch_a.fingerprint != fetch_b.fingerprint;
        let series_diverge = fetch_a.series.as_ref().map(|s| &s.points) != fetch_b.series.as_ref().map(|s| &s.points);

        let passed = fingerprints_diverge && series_diverge;
        results.push(VarianceProbeResult {
            source_id: def.id.to_string(),
            passed,
            detail: if passed {
                "fingerprint and series diverge across probe regions".to_string()
            } else {
                format!(
                    "fingerprints_diverge={fingerprints_diverge} series_diverge={series_diverge}"
                )
            },
        });
    }
    results
}

fn probe_request(region: &Region) -> FetchRequest<'_> {
    FetchRequest {
        region,
        window_days: 14,
        offline_mode: true,
        api_key: Some("probe-key"),
        timeout: Duration::from_secs(1),
        retry_attempts: 1,
        retry_base_backoff_ms: 1,
        retry_max_backoff_ms: 5,
        cancellation: CancellationToken::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_regional_connectors_pass_the_variance_probe() {
        let registry = SourceRegistry::default_registry();
        let results = run_variance_probe(&registry).await;
        assert!(!results.is_empty(), "expected at least one regional connector");
        for result in &results {
            assert!(result.passed, "{} failed variance probe: {}", result.source_id, result.detail);
        }
    }
}
