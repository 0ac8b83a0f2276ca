// OrcaMet Ensemble Forecast & Risk Engine v0.1
use axum::routing::{get, post};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod db;
mod errors;
mod helpers;
mod routes;
mod services;

use config::AppConfig;
use routes::grid::GridState;
use routes::runs::AppState;
use services::grid::{SharedSweepState, SweepState};
use services::provider::{ProviderRegistry, WeatherClient};

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;

/// OrcaMet Engine — OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "OrcaMet Ensemble Forecast & Risk Engine",
        version = "0.1.0",
        description = "Ensemble weather risk engine for rope-access work. \
            Fetches hourly forecasts from several numerical weather models, \
            combines them into a weighted ensemble with per-hour spread, scores \
            each hour against site thresholds, rolls hours into daily go/no-go \
            recommendations, and sweeps a spatial grid for the risk heatmap.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Runs", description = "Forecast run submission and retrieval"),
        (name = "Grid", description = "Spatial risk-grid sweeps"),
        (name = "Maintenance", description = "Retention cleanup"),
    ),
    paths(
        routes::health::health_check,
        routes::runs::submit_run,
        routes::runs::submit_batch,
        routes::runs::get_site_runs,
        routes::runs::get_run_hourly,
        routes::runs::cleanup_runs,
        routes::grid::submit_grid_sweep,
        routes::grid::get_sweep_status,
        routes::grid::get_latest_grid_run,
        routes::grid::get_grid_points,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::runs::RunSubmission,
            routes::runs::BatchTarget,
            routes::runs::BatchSubmission,
            routes::runs::BatchRunResult,
            routes::runs::BatchRunsResponse,
            routes::runs::RunSummary,
            routes::runs::RunsResponse,
            routes::runs::HourlyEntry,
            routes::runs::RunHourlyResponse,
            routes::runs::CleanupResponse,
            routes::grid::GridSweepRequest,
            routes::grid::GridSweepAccepted,
            routes::grid::GridRunSummary,
            routes::grid::GridPointEntry,
            routes::grid::GridPointsResponse,
            services::grid::SweepState,
            services::risk::ThresholdProfile,
            services::risk::Recommendation,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orcamet_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    // Set up database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .min_connections(DB_POOL_MIN_CONNECTIONS)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    // Provider registry and shared weather client. The registry is an
    // immutable configuration value; the client's semaphore is the global
    // bound on in-flight provider requests.
    let registry = Arc::new(ProviderRegistry::with_defaults());
    let client = WeatherClient::new(
        &config.user_agent,
        config.max_inflight_requests,
        Duration::from_secs(config.provider_timeout_secs),
    );

    tracing::info!(
        "Provider registry: {} (max {} in-flight requests)",
        registry.ids().join(", "),
        config.max_inflight_requests
    );

    // Build shared application state
    let app_state = AppState {
        pool: pool.clone(),
        client: client.clone(),
        registry: registry.clone(),
        forecast_days: config.forecast_days,
        max_concurrent_targets: config.max_concurrent_targets,
    };

    let sweep_state: SharedSweepState = Arc::new(RwLock::new(SweepState::new()));
    let grid_state = GridState {
        pool: pool.clone(),
        client,
        registry,
        sweep: sweep_state,
        pacing_ms: config.grid_pacing_ms,
    };

    // CORS — submission + retrieval API; GET and POST only
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    // Build router
    // Run routes use AppState; grid routes use GridState; health uses PgPool.
    let run_routes = Router::new()
        .route("/api/v1/runs", post(routes::runs::submit_run))
        .route("/api/v1/runs/batch", post(routes::runs::submit_batch))
        .route("/api/v1/runs/site/:site_id", get(routes::runs::get_site_runs))
        .route("/api/v1/runs/:run_id/hourly", get(routes::runs::get_run_hourly))
        .route(
            "/api/v1/maintenance/cleanup",
            post(routes::runs::cleanup_runs),
        )
        .with_state(app_state);

    let grid_routes = Router::new()
        .route("/api/v1/grid-runs", post(routes::grid::submit_grid_sweep))
        .route("/api/v1/grid-runs/status", get(routes::grid::get_sweep_status))
        .route(
            "/api/v1/grid-runs/latest",
            get(routes::grid::get_latest_grid_run),
        )
        .route(
            "/api/v1/grid-runs/:run_id/points",
            get(routes::grid::get_grid_points),
        )
        .with_state(grid_state);

    // Health check uses PgPool to verify DB connectivity
    let health_routes = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .with_state(pool);

    let app = Router::new()
        .merge(health_routes)
        .merge(run_routes)
        .merge(grid_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Engine API listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
