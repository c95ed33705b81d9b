//! HTTP handlers for the forecast API.
//!
//! Grounded on the teacher's `api/simple.rs` for extractor/response shape
//! (`State`, `Json`, tuple `(StatusCode, Json<T>)` responses) and its
//! `AppState`-threaded handler style, generalized from order-book endpoints
//! to the forecast/region/source endpoints spec.md §6 describes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorBody, ErrorKind};
use crate::orchestrator::ForecastRequest;
use crate::series::FetchStatus;
use crate::sources::registry::SourceDefinition;
use crate::state::AppState;

fn default_days_back() -> u32 {
    365
}

fn default_horizon() -> u32 {
    7
}

#[derive(Debug, Deserialize)]
pub struct ForecastRequestBody {
    pub region_id: String,
    pub region_name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_days_back")]
    pub days_back: u32,
    #[serde(default = "default_horizon")]
    pub forecast_horizon: u32,
}

#[derive(Debug, Serialize)]
pub struct SourceStatusEntry {
    pub source_id: String,
    pub status: FetchStatus,
    pub points: usize,
    pub last_fetched: DateTime<Utc>,
}

/// `POST /forecast`: runs the full pipeline for one region and returns the
/// composed `ForecastResult` plus a flattened view of per-source status.
pub async fn post_forecast(State(state): State<AppState>, Json(body): Json<ForecastRequestBody>) -> Response {
    let Ok(_permit) = state.request_semaphore.clone().try_acquire_owned() else {
        let body = ErrorBody {
            error_kind: ErrorKind::Internal.as_str(),
            message: "too many concurrent forecast requests".to_string(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    };

    let request = ForecastRequest {
        region_id: body.region_id,
        region_name: body.region_name,
        lat: body.latitude,
        lon: body.longitude,
        days_back: body.days_back,
        horizon_days: body.forecast_horizon,
    };

    match state.orchestrator.run(request, &state.metrics, &state.journal).await {
        Ok(result) => {
            let sources = result
                .sources
                .iter()
                .map(|s| SourceStatusEntry {
                    source_id: s.source_id.clone(),
                    status: s.status,
                    points: s.points,
                    last_fetched: s.last_fetched,
                })
                .collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "result": result, "sources": sources }))).into_response()
        }
        Err(err) => {
            let status = match err.kind() {
                ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                ErrorKind::InvalidConfiguration => StatusCode::BAD_REQUEST,
                ErrorKind::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body: ErrorBody = (&err).into();
            (status, Json(body)).into_response()
        }
    }
}

/// `GET /metrics`: Prometheus text exposition of every gauge published so
/// far in this process.
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    ([("content-type", "text/plain; version=0.0.4")], state.metrics.render())
}

/// `GET /regions`: the static region catalog.
pub async fn get_regions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.regions.list().to_vec()).into_response()
}

#[derive(Debug, Serialize)]
pub struct SourceSummary {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub classification: crate::sources::Classification,
    pub requires_key: bool,
    pub can_run_without_key: bool,
    pub description: &'static str,
    pub features: Vec<&'static str>,
}

impl From<&SourceDefinition> for SourceSummary {
    fn from(def: &SourceDefinition) -> Self {
        Self {
            id: def.id,
            name: def.name,
            category: def.category,
            classification: def.classification,
            requires_key: def.requires_key,
            can_run_without_key: def.can_run_without_key,
            description: def.description,
            features: def.features.iter().map(|(_, child)| *child).collect(),
        }
    }
}

/// `GET /sources`: the static connector catalog, in registration order.
pub async fn get_sources(State(state): State<AppState>) -> impl IntoResponse {
    let sources: Vec<SourceSummary> = state.registry.iter().map(|c| SourceSummary::from(c.definition())).collect();
    Json(sources).into_response()
}

/// `GET /health`: liveness probe, excluded from request logging.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
