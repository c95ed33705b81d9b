//! Source connectors: the uniform contract over heterogeneous upstream
//! providers, plus the static registry that drives orchestration and the
//! variance probe.

pub mod drought;
pub mod economic;
pub mod fuel;
pub mod health;
pub mod media;
pub mod mobility;
pub mod offline;
pub mod registry;
pub mod retry;
pub mod storms;
pub mod variance_probe;
pub mod weather;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::region::Region;
use crate::series::{Fingerprint, SourceFetch};

pub use registry::{SourceDefinition, SourceRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Global,
    National,
    Regional,
}

/// Declares whether a mobility-family source emits a raw activity share
/// (the index computer inverts it: `1 - value`) or is already expressed
/// as a disruption/stress signal. See DESIGN.md "Open Question decisions".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MobilityKind {
    Activity,
    AlreadyInverted,
}

/// How the harmonizer should fill short gaps in a source's series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillPolicy {
    /// Forward-fill up to `days`, then fall back to interpolation.
    ForwardFill { days: u32 },
    /// Only linear interpolation (interior gaps), no forward-fill.
    InterpolateOnly,
}

#[derive(Debug, Clone, Copy)]
pub enum NormalizationSpec {
    FixedRange { min: f64, max: f64 },
    RobustIqr,
}

/// Inputs to a single connector invocation.
pub struct FetchRequest<'a> {
    pub region: &'a Region,
    pub window_days: u32,
    pub offline_mode: bool,
    pub api_key: Option<&'a str>,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_base_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub cancellation: CancellationToken,
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn definition(&self) -> &SourceDefinition;

    /// Computes the cache fingerprint for a `(region, window_days)` pair
    /// without performing the fetch. The fetch cache calls this to decide
    /// whether a loader invocation is even needed; `fetch` recomputes the
    /// identical value so the two never drift apart.
    fn fingerprint(&self, region: &Region, window_days: u32) -> Fingerprint;

    /// Returns `Ok`/`Empty`/`Error` per the contract in spec.md §4.1. Must
    /// never panic or propagate an unexpected error — all failure modes
    /// are recovered locally into the returned `SourceFetch`.
    async fn fetch(&self, request: &FetchRequest<'_>) -> SourceFetch;
}
