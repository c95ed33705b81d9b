//! Shared application state threaded through every HTTP handler via axum's
//! `State` extractor. Split out from `main.rs` (rather than defined there,
//! as the teacher does with its own `AppState`) because the handlers that
//! need it live in the library crate's `api` module, not the binary.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::cache::FetchCache;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::index::weights::ParentWeights;
use crate::journal::Journal;
use crate::metrics::MetricsPublisher;
use crate::orchestrator::Orchestrator;
use crate::region::RegionRegistry;
use crate::sources::SourceRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub regions: Arc<RegionRegistry>,
    pub registry: Arc<SourceRegistry>,
    pub metrics: Arc<MetricsPublisher>,
    pub journal: Arc<Journal>,
    pub orchestrator: Arc<Orchestrator>,
    pub request_semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn build(config: Arc<AppConfig>, metrics: Arc<MetricsPublisher>) -> Result<Self, AppError> {
        let regions = Arc::new(RegionRegistry::default_catalog());
        let registry = Arc::new(SourceRegistry::default_registry());
        let cache = Arc::new(FetchCache::new(config.cache_max_size));
        let journal = Arc::new(Journal::new(config.journal_path.as_deref()));
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            regions.clone(),
            registry.clone(),
            cache,
            ParentWeights::DEFAULT,
        ));
        let request_semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests));
        Ok(Self { config, regions, registry, metrics, journal, orchestrator, request_semaphore })
    }
}
