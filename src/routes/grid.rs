//! Grid sweep HTTP endpoints.
//!
//! Sweeps cover hundreds of points with paced fetches, so submission is
//! asynchronous: POST validates and spawns a tracked task, then returns 202.
//! Progress is observable via the status endpoint while the sweep runs.
//!
//! - POST /api/v1/grid-runs               — submit a sweep
//! - GET  /api/v1/grid-runs/status        — live sweep progress
//! - GET  /api/v1/grid-runs/latest        — latest successful sweep
//! - GET  /api/v1/grid-runs/:run_id/points — point records of a sweep

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::models::GridRunRow;
use crate::db::queries;
use crate::errors::AppError;
use crate::services::grid::{build_lattice, run_grid_sweep, GridSweepParams, SharedSweepState, SweepState};
use crate::services::provider::{ProviderRegistry, WeatherClient};

/// Shared state for grid endpoints.
#[derive(Clone)]
pub(crate) struct GridState {
    pub(crate) pool: sqlx::PgPool,
    pub(crate) client: WeatherClient,
    pub(crate) registry: Arc<ProviderRegistry>,
    pub(crate) sweep: SharedSweepState,
    /// Pacing delay between point fetches (milliseconds).
    pub(crate) pacing_ms: u64,
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Sweep submission. Every field is optional; defaults cover the UK at 0.5°
/// with the `ecmwf` model over 3 days.
#[derive(Debug, Deserialize, ToSchema)]
pub struct GridSweepRequest {
    pub lat_min: Option<f64>,
    pub lat_max: Option<f64>,
    pub lon_min: Option<f64>,
    pub lon_max: Option<f64>,
    /// Lattice spacing in degrees
    pub resolution: Option<f64>,
    /// Forecast days (today inclusive)
    pub days: Option<u32>,
    /// Single provider for the whole sweep
    pub provider: Option<String>,
}

/// Acknowledgement of an accepted sweep.
#[derive(Debug, Serialize, ToSchema)]
pub struct GridSweepAccepted {
    pub status: String,
    pub provider: String,
    /// Number of lattice points the sweep will attempt
    pub grid_points: usize,
}

/// Summary of one grid run.
#[derive(Debug, Serialize, ToSchema)]
pub struct GridRunSummary {
    pub run_id: Uuid,
    /// Forecast date (ISO 8601 date)
    pub forecast_date: String,
    /// When the sweep was generated (ISO 8601)
    pub generated_at: String,
    pub status: String,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub resolution: f64,
    pub provider: String,
    pub grid_points: i32,
    pub failed_points: i32,
    pub num_hours: Option<i32>,
    pub error_message: Option<String>,
}

impl From<&GridRunRow> for GridRunSummary {
    fn from(run: &GridRunRow) -> Self {
        Self {
            run_id: run.id,
            forecast_date: run.forecast_date.to_string(),
            generated_at: run.generated_at.to_rfc3339(),
            status: run.status.clone(),
            lat_min: run.lat_min,
            lat_max: run.lat_max,
            lon_min: run.lon_min,
            lon_max: run.lon_max,
            resolution: run.resolution,
            provider: run.provider.clone(),
            grid_points: run.grid_points,
            failed_points: run.failed_points,
            num_hours: run.num_hours,
            error_message: run.error_message.clone(),
        }
    }
}

/// One point-hour of a grid run, for the heatmap layer.
#[derive(Debug, Serialize, ToSchema)]
pub struct GridPointEntry {
    pub latitude: f64,
    pub longitude: f64,
    /// Timestamp (ISO 8601)
    pub time: String,
    pub wind_speed: f64,
    pub wind_gusts: f64,
    pub precipitation: f64,
    pub temperature: f64,
    pub risk: f64,
}

/// Point records of one grid run.
#[derive(Debug, Serialize, ToSchema)]
pub struct GridPointsResponse {
    pub run: GridRunSummary,
    pub points: Vec<GridPointEntry>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Submit a grid sweep.
///
/// Validates parameters (including the provider id) before anything runs,
/// rejects concurrent sweeps, then spawns the sweep as a tracked task and
/// returns 202. Watch progress on the status endpoint.
#[utoipa::path(
    post,
    path = "/api/v1/grid-runs",
    tag = "Grid",
    request_body = GridSweepRequest,
    responses(
        (status = 202, description = "Sweep accepted and running", body = GridSweepAccepted),
        (status = 400, description = "Invalid sweep parameters or a sweep is already running", body = crate::errors::ErrorResponse),
    )
)]
pub async fn submit_grid_sweep(
    State(state): State<GridState>,
    Json(request): Json<GridSweepRequest>,
) -> Result<(StatusCode, Json<GridSweepAccepted>), AppError> {
    let defaults = GridSweepParams::default();
    let params = GridSweepParams {
        lat_min: request.lat_min.unwrap_or(defaults.lat_min),
        lat_max: request.lat_max.unwrap_or(defaults.lat_max),
        lon_min: request.lon_min.unwrap_or(defaults.lon_min),
        lon_max: request.lon_max.unwrap_or(defaults.lon_max),
        resolution: request.resolution.unwrap_or(defaults.resolution),
        days: request.days.unwrap_or(defaults.days),
        provider: request.provider.unwrap_or(defaults.provider),
    };

    params.validate(&state.registry)?;

    {
        let sweep = state.sweep.read().await;
        if sweep.status == "running" {
            return Err(AppError::Validation(
                "A grid sweep is already running".to_string(),
            ));
        }
    }

    let grid_points = build_lattice(&params).len();
    let provider = params.provider.clone();
    let pacing = std::time::Duration::from_millis(state.pacing_ms);

    // Mark running before the task starts so two submissions can't race past
    // the check above.
    {
        let mut sweep = state.sweep.write().await;
        *sweep = SweepState {
            status: "running".to_string(),
            total_points: grid_points,
            ..SweepState::new()
        };
    }

    tokio::spawn(async move {
        let result = run_grid_sweep(
            &state.pool,
            &state.client,
            &state.registry,
            &params,
            &state.sweep,
            pacing,
        )
        .await;
        if let Err(e) = result {
            tracing::error!("Grid sweep task failed: {}", e);
            let mut sweep = state.sweep.write().await;
            sweep.status = "failed".to_string();
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(GridSweepAccepted {
            status: "running".to_string(),
            provider,
            grid_points,
        }),
    ))
}

/// Live progress of the current (or most recent) sweep.
#[utoipa::path(
    get,
    path = "/api/v1/grid-runs/status",
    tag = "Grid",
    responses(
        (status = 200, description = "Sweep progress", body = SweepState),
    )
)]
pub async fn get_sweep_status(State(state): State<GridState>) -> Json<SweepState> {
    Json(state.sweep.read().await.clone())
}

/// The latest successful grid run.
#[utoipa::path(
    get,
    path = "/api/v1/grid-runs/latest",
    tag = "Grid",
    responses(
        (status = 200, description = "Latest successful sweep", body = GridRunSummary),
        (status = 404, description = "No successful sweep exists", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_latest_grid_run(
    State(state): State<GridState>,
) -> Result<Json<GridRunSummary>, AppError> {
    let run = queries::get_latest_grid_run(&state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("No successful grid run exists".to_string()))?;
    Ok(Json(GridRunSummary::from(&run)))
}

/// Point records of one grid run, for the heatmap layer.
#[utoipa::path(
    get,
    path = "/api/v1/grid-runs/{run_id}/points",
    tag = "Grid",
    params(("run_id" = Uuid, Path, description = "Grid run identifier")),
    responses(
        (status = 200, description = "Point records", body = GridPointsResponse),
        (status = 404, description = "Grid run not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_grid_points(
    State(state): State<GridState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<GridPointsResponse>, AppError> {
    let latest = queries::get_latest_grid_run(&state.pool).await?;
    let run = match latest {
        Some(run) if run.id == run_id => run,
        _ => {
            return Err(AppError::NotFound(format!(
                "Grid run {} not found among successful runs",
                run_id
            )))
        }
    };

    let rows = queries::get_grid_points_for_run(&state.pool, run_id).await?;
    let points = rows
        .iter()
        .map(|row| GridPointEntry {
            latitude: row.latitude,
            longitude: row.longitude,
            time: row.timestamp.to_rfc3339(),
            wind_speed: row.wind_speed,
            wind_gusts: row.wind_gusts,
            precipitation: row.precipitation,
            temperature: row.temperature,
            risk: row.risk,
        })
        .collect();

    Ok(Json(GridPointsResponse {
        run: GridRunSummary::from(&run),
        points,
    }))
}
