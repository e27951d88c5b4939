//! HTTP server for grid matching.
//!
//! Loads the grid dataset once at startup and answers point and batch
//! queries against it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use gridmatch::{GridMatcher, LoadReport, MatchResult, MatcherConfig};

/// Upper bound on points per batch request
const MAX_BATCH: usize = 100_000;

#[derive(Parser, Debug)]
#[command(name = "gridmatch-server")]
#[command(about = "Grid matching HTTP server")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    listen: String,

    /// TOML matcher configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Grid polygon file (.gpkg or .geojson), overrides the config
    #[arg(long)]
    grid: Option<PathBuf>,

    /// Grid label table (.csv or .xlsx), overrides the config
    #[arg(long)]
    labels: Option<PathBuf>,
}

/// Application state shared across handlers
struct AppState {
    matcher: GridMatcher,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    info!("Gridmatch Server");
    let config = MatcherConfig::from_args(args.config.as_deref(), args.grid, args.labels)?;

    let matcher = tokio::task::spawn_blocking(move || GridMatcher::new(&config)).await?;
    if matcher.is_loaded() {
        info!("Serving {} grids", matcher.grid_count());
    } else {
        warn!("Grid dataset is not loaded; every query will return an empty match");
    }

    let state = Arc::new(AppState { matcher });

    // Build router
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/v1/match", get(match_handler))
        .route("/v1/match/batch", post(batch_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Starting server on {}", args.listen);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    loaded: bool,
    grids: usize,
    report: LoadReport,
}

/// Health check endpoint
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let loaded = state.matcher.is_loaded();
    Json(HealthResponse {
        status: if loaded { "ok" } else { "degraded" },
        loaded,
        grids: state.matcher.grid_count(),
        report: state.matcher.load_report().clone(),
    })
}

#[derive(Debug, Deserialize)]
struct MatchQueryParams {
    lon: Option<String>,
    lat: Option<String>,
}

/// Single point match
async fn match_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MatchQueryParams>,
) -> Json<MatchResult> {
    Json(state.matcher.match_point(params.lon, params.lat))
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    points: Vec<[serde_json::Value; 2]>,
}

/// Batch match, results in request order
async fn batch_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<Vec<MatchResult>>, (StatusCode, String)> {
    if request.points.len() > MAX_BATCH {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("at most {} points per request", MAX_BATCH),
        ));
    }

    let points: Vec<(serde_json::Value, serde_json::Value)> = request
        .points
        .into_iter()
        .map(|[lon, lat]| (lon, lat))
        .collect();

    let results = tokio::task::spawn_blocking(move || state.matcher.par_match_batch(&points))
        .await
        .map_err(|e| {
            tracing::error!("Batch matching failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(results))
}
