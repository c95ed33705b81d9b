//! Regional Behavior Forecasting Engine — HTTP server and CLI entry point.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use behavior_forecaster::config::AppConfig;
use behavior_forecaster::error::AppError;
use behavior_forecaster::metrics::MetricsPublisher;
use behavior_forecaster::orchestrator::ForecastRequest;
use behavior_forecaster::series::FetchStatus;
use behavior_forecaster::sources::variance_probe::run_variance_probe;
use behavior_forecaster::sources::SourceRegistry;
use behavior_forecaster::state::AppState;
use behavior_forecaster::{api, middleware};

#[derive(Parser)]
#[command(name = "forecaster", about = "Regional behavioral forecasting engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (the default when no subcommand is given).
    Serve,
    /// Run one forecast request and print the result as JSON.
    Forecast {
        #[arg(long)]
        region_id: String,
        #[arg(long)]
        region_name: Option<String>,
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lon: f64,
        #[arg(long, default_value_t = 365)]
        days_back: u32,
        #[arg(long, default_value_t = 7)]
        horizon: u32,
    },
    /// Run the regional-variance probe against every REGIONAL connector.
    SelfTest,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let config = match AppConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!(%err, "invalid configuration");
            return ExitCode::from(2);
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config).await,
        Command::Forecast { region_id, region_name, lat, lon, days_back, horizon } => {
            run_one_shot(config, region_id, region_name, lat, lon, days_back, horizon).await
        }
        Command::SelfTest => run_self_test().await,
    }
}

async fn run_server(config: Arc<AppConfig>) -> ExitCode {
    let state = match build_state(config.clone()) {
        Ok(state) => state,
        Err(err) => {
            error!(%err, "failed to initialize application state");
            return ExitCode::from(2);
        }
    };

    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, %addr, "failed to bind listener");
            return ExitCode::from(69);
        }
    };

    info!(%addr, "forecaster listening");
    let serve = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>());
    if let Err(err) = serve.await {
        error!(%err, "server error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn build_state(config: Arc<AppConfig>) -> Result<AppState, AppError> {
    let metrics = Arc::new(MetricsPublisher::install()?);
    AppState::build(config, metrics)
}

fn build_router(state: AppState) -> Router {
    let rate_limiter = middleware::RateLimitLayer::new(middleware::RateLimitConfig::default());

    Router::new()
        .route("/health", get(api::health_check))
        .route("/forecast", post(api::post_forecast))
        .route("/metrics", get(api::get_metrics))
        .route("/regions", get(api::get_regions))
        .route("/sources", get(api::get_sources))
        .layer(axum::middleware::from_fn_with_state(rate_limiter, middleware::rate_limit_middleware))
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn run_one_shot(
    config: Arc<AppConfig>,
    region_id: String,
    region_name: Option<String>,
    lat: f64,
    lon: f64,
    days_back: u32,
    horizon: u32,
) -> ExitCode {
    let state = match build_state(config) {
        Ok(state) => state,
        Err(err) => {
            error!(%err, "failed to initialize application state");
            return ExitCode::from(2);
        }
    };

    let request = ForecastRequest { region_id, region_name, lat, lon, days_back, horizon_days: horizon };
    match state.orchestrator.run(request, &state.metrics, &state.journal).await {
        Ok(result) => {
            match serde_json::to_string_pretty(&result) {
                Ok(json) => println!("{json}"),
                Err(err) => error!(%err, "failed to serialize forecast result"),
            }
            if result.sources.iter().all(|s| s.status != FetchStatus::Ok) {
                ExitCode::from(69)
            } else if result.degraded_reason.as_deref() == Some("deadline_exceeded") {
                ExitCode::from(73)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            error!(%err, "forecast failed");
            match err.kind() {
                behavior_forecaster::error::ErrorKind::InvalidInput => ExitCode::from(64),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run_self_test() -> ExitCode {
    let registry = SourceRegistry::default_registry();
    let results = run_variance_probe(&registry).await;
    let mut all_passed = true;
    for result in &results {
        if result.passed {
            info!(source = %result.source_id, "variance probe passed");
        } else {
            all_passed = false;
            error!(source = %result.source_id, detail = %result.detail, "variance probe failed");
        }
    }
    if all_passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "behavior_forecaster=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
