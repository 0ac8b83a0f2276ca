//! Spatial risk-grid sweeps for the map heatmap layer.
//!
//! Iterates a regular lat/lon lattice over a bounding region using a single
//! provider (multiple providers are deliberately disallowed here to keep the
//! total number of external calls bounded), scores every hour at every point
//! against the default threshold profile, and bulk-persists the records in
//! bounded-size chunks. Per-point failures are counted and skipped; the sweep
//! fails only when zero points yield any data.
//!
//! Sweeps run for minutes, so they are submitted as a tracked tokio task;
//! live progress is shared via `Arc<RwLock<SweepState>>` and exposed over the
//! status endpoint, the same way long-lived background work is observed
//! elsewhere in the codebase.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::models::GridRunRow;
use crate::db::queries::{self, CreateGridRunParams, GridPointInsert};
use crate::errors::AppError;
use crate::helpers::round2;
use crate::services::ensemble::{combine_series, ProviderWeights};
use crate::services::provider::{ProviderRegistry, WeatherClient};
use crate::services::risk::{score_hours, ThresholdProfile};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// UK bounding box (covers mainland GB + Northern Ireland).
const UK_LAT_MIN: f64 = 49.9;
const UK_LAT_MAX: f64 = 58.7;
const UK_LON_MIN: f64 = -7.6;
const UK_LON_MAX: f64 = 1.8;

/// Default grid spacing in degrees (≈ 55 km).
const DEFAULT_RESOLUTION_DEG: f64 = 0.5;

/// Default number of forecast days per sweep.
const DEFAULT_SWEEP_DAYS: u32 = 3;

/// Longest allowed sweep window, matching the provider forecast horizon.
const MAX_SWEEP_DAYS: u32 = 16;

/// Point records per bulk insert. Bounds peak memory for large sweeps.
const GRID_INSERT_CHUNK: usize = 5000;

/// Log progress every this many points.
const PROGRESS_LOG_INTERVAL: usize = 10;

// ---------------------------------------------------------------------------
// Sweep parameters
// ---------------------------------------------------------------------------

/// Parameters of one grid sweep.
#[derive(Debug, Clone)]
pub struct GridSweepParams {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    /// Lattice spacing in degrees.
    pub resolution: f64,
    /// Number of forecast days (today inclusive).
    pub days: u32,
    /// The single provider used for the whole sweep.
    pub provider: String,
}

impl Default for GridSweepParams {
    fn default() -> Self {
        Self {
            lat_min: UK_LAT_MIN,
            lat_max: UK_LAT_MAX,
            lon_min: UK_LON_MIN,
            lon_max: UK_LON_MAX,
            resolution: DEFAULT_RESOLUTION_DEG,
            days: DEFAULT_SWEEP_DAYS,
            provider: "ecmwf".to_string(),
        }
    }
}

impl GridSweepParams {
    /// Reject malformed sweeps before creating a run or touching the network.
    pub fn validate(&self, registry: &ProviderRegistry) -> Result<(), AppError> {
        let bounds = [
            ("lat_min", self.lat_min),
            ("lat_max", self.lat_max),
            ("lon_min", self.lon_min),
            ("lon_max", self.lon_max),
            ("resolution", self.resolution),
        ];
        for (name, value) in bounds {
            if !value.is_finite() {
                return Err(AppError::Validation(format!(
                    "Grid parameter '{}' must be finite, got {}",
                    name, value
                )));
            }
        }
        if self.lat_max < self.lat_min || self.lon_max < self.lon_min {
            return Err(AppError::Validation(
                "Grid bounding box is inverted".to_string(),
            ));
        }
        if self.resolution <= 0.0 {
            return Err(AppError::Validation(format!(
                "Grid resolution must be positive, got {}",
                self.resolution
            )));
        }
        if self.days == 0 || self.days > MAX_SWEEP_DAYS {
            return Err(AppError::Validation(format!(
                "Sweep days must be between 1 and {}, got {}",
                MAX_SWEEP_DAYS, self.days
            )));
        }
        registry.resolve(&[self.provider.clone()])?;
        Ok(())
    }
}

/// Build the ordered lattice for a bounding box, inclusive of both boundary
/// edges: a 2°×2° box at 1° resolution yields exactly 9 points.
pub fn build_lattice(params: &GridSweepParams) -> Vec<(f64, f64)> {
    // Tolerance absorbs float accumulation so an exact max edge is included.
    let eps = params.resolution * 1e-6;
    let mut points = Vec::new();

    let mut lat = params.lat_min;
    while lat <= params.lat_max + eps {
        let mut lon = params.lon_min;
        while lon <= params.lon_max + eps {
            points.push((lat, lon));
            lon += params.resolution;
        }
        lat += params.resolution;
    }

    points
}

// ---------------------------------------------------------------------------
// Sweep state (in-memory, shared via Arc<RwLock<>>)
// ---------------------------------------------------------------------------

/// Live progress of the current (or most recent) sweep.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SweepState {
    /// "idle", "running", "success", or "failed"
    pub status: String,
    pub run_id: Option<Uuid>,
    pub provider: Option<String>,
    pub total_points: usize,
    pub completed_points: usize,
    pub failed_points: usize,
    pub stored_records: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SweepState {
    pub fn new() -> Self {
        Self {
            status: "idle".to_string(),
            run_id: None,
            provider: None,
            total_points: 0,
            completed_points: 0,
            failed_points: 0,
            stored_records: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Shared sweep state handle.
pub type SharedSweepState = Arc<RwLock<SweepState>>;

// ---------------------------------------------------------------------------
// Sweep execution
// ---------------------------------------------------------------------------

/// Run one grid sweep to completion.
///
/// Creates the run row, walks every lattice point with a fixed pacing delay
/// between fetches, flushes point records in chunks, and finishes the run as
/// success (with the failure count retained) or failed (zero points yielded
/// data, or a chunk failed to persist). Failures are recorded on the run row
/// first and then returned as errors, so a failed sweep is never silently
/// dropped.
pub async fn run_grid_sweep(
    pool: &PgPool,
    client: &WeatherClient,
    registry: &ProviderRegistry,
    params: &GridSweepParams,
    state: &SharedSweepState,
    pacing: std::time::Duration,
) -> Result<GridRunRow, AppError> {
    params.validate(registry)?;
    let provider = registry
        .resolve(&[params.provider.clone()])?
        .remove(0)
        .clone();

    let today = Utc::now().date_naive();
    let end_date = today + ChronoDuration::days(params.days as i64 - 1);
    let lattice = build_lattice(params);
    let total_points = lattice.len();

    let mut run = queries::create_grid_run(
        pool,
        &CreateGridRunParams {
            forecast_date: today,
            lat_min: params.lat_min,
            lat_max: params.lat_max,
            lon_min: params.lon_min,
            lon_max: params.lon_max,
            resolution: params.resolution,
            provider: provider.id.clone(),
            grid_points: total_points as i32,
        },
    )
    .await?;

    tracing::info!(
        "Grid sweep {}: {} points at {}° resolution, {} to {}, model {}",
        run.id,
        total_points,
        params.resolution,
        today,
        end_date,
        provider.display_name
    );

    {
        let mut s = state.write().await;
        *s = SweepState {
            status: "running".to_string(),
            run_id: Some(run.id),
            provider: Some(provider.id.clone()),
            total_points,
            started_at: Some(Utc::now()),
            ..SweepState::new()
        };
    }

    let weights = ProviderWeights::from_registry(registry);
    let thresholds = ThresholdProfile::default();
    let started = Instant::now();

    let mut buffer: Vec<GridPointInsert> = Vec::with_capacity(GRID_INSERT_CHUNK);
    let mut stored_records = 0usize;
    let mut failed_points = 0usize;

    for (idx, &(lat, lon)) in lattice.iter().enumerate() {
        if idx % PROGRESS_LOG_INTERVAL == 0 && idx > 0 {
            let elapsed = started.elapsed().as_secs_f64();
            let rate = idx as f64 / elapsed.max(f64::EPSILON);
            let eta = (total_points - idx) as f64 / rate.max(f64::EPSILON);
            tracing::info!(
                "Grid sweep {}: [{}/{}] ({:.2}°N, {:.2}°E) — {:.1} pts/s, ETA {:.0}s",
                run.id,
                idx,
                total_points,
                lat,
                lon,
                rate,
                eta
            );
        }

        match client.fetch_series(&provider, lat, lon, today, end_date).await {
            Ok(series) => {
                // Single provider: combination degenerates to pass-through
                // with all spreads forced to zero.
                let combined = combine_series(std::slice::from_ref(&series), &weights);
                let scored = score_hours(&combined, &thresholds);

                for h in &scored {
                    buffer.push(GridPointInsert {
                        latitude: lat,
                        longitude: lon,
                        timestamp: h.hour.timestamp,
                        wind_speed: round2(h.hour.wind_speed),
                        wind_gusts: round2(h.hour.wind_gusts),
                        precipitation: round2(h.hour.precipitation),
                        temperature: round2(h.hour.temperature),
                        risk: round2(h.risk),
                    });
                }

                if buffer.len() >= GRID_INSERT_CHUNK {
                    if let Err(e) = flush_chunk(pool, run.id, &mut buffer, &mut stored_records).await
                    {
                        record_failure(
                            pool,
                            state,
                            run.id,
                            failed_points,
                            &format!("Bulk insert failed: {}", e),
                        )
                        .await?;
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Grid sweep {}: point ({:.2}, {:.2}) failed: {}",
                    run.id,
                    lat,
                    lon,
                    e
                );
                failed_points += 1;
            }
        }

        {
            let mut s = state.write().await;
            s.completed_points = idx + 1;
            s.failed_points = failed_points;
            s.stored_records = stored_records + buffer.len();
        }

        // Pacing between point fetches bounds the request rate upstream.
        if idx + 1 < total_points {
            tokio::time::sleep(pacing).await;
        }
    }

    if let Err(e) = flush_chunk(pool, run.id, &mut buffer, &mut stored_records).await {
        record_failure(
            pool,
            state,
            run.id,
            failed_points,
            &format!("Bulk insert failed: {}", e),
        )
        .await?;
        return Err(e);
    }

    let productive_points = total_points.saturating_sub(failed_points).max(1);

    if stored_records == 0 {
        let reason = "No data fetched — all grid points failed".to_string();
        record_failure(pool, state, run.id, failed_points, &reason).await?;
        return Err(AppError::TotalFailure(reason));
    }

    let num_hours = (stored_records / productive_points) as i32;
    queries::complete_grid_run(pool, run.id, failed_points as i32, num_hours).await?;
    queries::delete_superseded_grid_runs(pool, today, run.id).await?;
    run.status = "success".to_string();
    run.failed_points = failed_points as i32;
    run.num_hours = Some(num_hours);
    finish_state(state, "success", stored_records, failed_points).await;

    tracing::info!(
        "Grid sweep {} complete: {} records ({} points, {} failed) in {:.0}s",
        run.id,
        stored_records,
        total_points - failed_points,
        failed_points,
        started.elapsed().as_secs_f64()
    );

    Ok(run)
}

/// Flush the buffered chunk, updating the stored-record counter.
async fn flush_chunk(
    pool: &PgPool,
    run_id: Uuid,
    buffer: &mut Vec<GridPointInsert>,
    stored_records: &mut usize,
) -> Result<(), AppError> {
    if buffer.is_empty() {
        return Ok(());
    }
    queries::insert_grid_rows(pool, run_id, buffer).await?;
    *stored_records += buffer.len();
    tracing::debug!("Grid sweep {}: stored chunk of {} records", run_id, buffer.len());
    buffer.clear();
    Ok(())
}

/// Record a sweep failure on the run row and the shared state. A failed run
/// row is always left behind; computed-but-unstored records are discarded.
async fn record_failure(
    pool: &PgPool,
    state: &SharedSweepState,
    run_id: Uuid,
    failed_points: usize,
    reason: &str,
) -> Result<(), AppError> {
    tracing::error!("Grid sweep {}: {}", run_id, reason);
    queries::fail_grid_run(pool, run_id, failed_points as i32, reason).await?;
    finish_state(state, "failed", 0, failed_points).await;
    Ok(())
}

async fn finish_state(
    state: &SharedSweepState,
    status: &str,
    stored_records: usize,
    failed_points: usize,
) {
    let mut s = state.write().await;
    s.status = status.to_string();
    s.stored_records = stored_records;
    s.failed_points = failed_points;
    s.finished_at = Some(Utc::now());
}
