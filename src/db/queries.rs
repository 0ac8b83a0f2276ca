//! Runtime sqlx queries for run and grid persistence.
//!
//! Transaction-scoped functions take `&mut PgConnection` so the orchestrator
//! can commit a run's hourly rows, the superseding delete, and the success
//! transition atomically. Everything else operates on the pool directly.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::models::{ForecastRunRow, GridPointRow, GridRunRow, HourlyRiskRow};

const RUN_COLUMNS: &str = "id, site_id, site_name, latitude, longitude, exposure, forecast_date, \
     generated_at, status, models_used, peak_risk, peak_wind, peak_gust, \
     peak_precip, min_temp, recommendation, error_message";

const GRID_RUN_COLUMNS: &str = "id, forecast_date, generated_at, status, lat_min, lat_max, lon_min, \
     lon_max, resolution, provider, grid_points, failed_points, num_hours, \
     error_message";

// ---------------------------------------------------------------------------
// Forecast runs
// ---------------------------------------------------------------------------

/// Parameters for creating a new (pending) forecast run.
pub struct CreateRunParams {
    pub site_id: Uuid,
    pub site_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub exposure: Option<String>,
    pub forecast_date: NaiveDate,
    pub models_used: Vec<String>,
}

/// Daily aggregates written when a run succeeds.
pub struct CompleteRunParams {
    pub peak_risk: f64,
    pub peak_wind: f64,
    pub peak_gust: f64,
    pub peak_precip: f64,
    pub min_temp: f64,
    pub recommendation: String,
}

/// One hourly row to persist under a run.
pub struct HourlyInsert {
    pub timestamp: DateTime<Utc>,
    pub wind_speed: f64,
    pub wind_gusts: f64,
    pub precipitation: f64,
    pub temperature: f64,
    pub wind_spread: f64,
    pub gust_spread: f64,
    pub precip_spread: f64,
    pub temp_spread: f64,
    pub model_count: i32,
    pub hourly_risk: f64,
}

/// Create a run in state `pending`.
pub async fn create_forecast_run(
    pool: &PgPool,
    params: &CreateRunParams,
) -> Result<ForecastRunRow, sqlx::Error> {
    sqlx::query_as::<_, ForecastRunRow>(&format!(
        "INSERT INTO forecast_runs (
            id, site_id, site_name, latitude, longitude, exposure,
            forecast_date, generated_at, status, models_used
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), 'pending', $8)
        RETURNING {RUN_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(params.site_id)
    .bind(&params.site_name)
    .bind(params.latitude)
    .bind(params.longitude)
    .bind(&params.exposure)
    .bind(params.forecast_date)
    .bind(&params.models_used)
    .fetch_one(pool)
    .await
}

/// Transition a run to `running` when provider fetches begin.
pub async fn mark_run_running(pool: &PgPool, run_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE forecast_runs SET status = 'running' WHERE id = $1")
        .bind(run_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a run `failed`, retaining the reason. Terminal.
pub async fn fail_forecast_run(
    pool: &PgPool,
    run_id: Uuid,
    message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE forecast_runs SET status = 'failed', error_message = $2 WHERE id = $1")
        .bind(run_id)
        .bind(message)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a run `success` with its daily aggregates. Terminal.
/// Transaction-scoped: commits together with the hourly rows.
pub async fn complete_forecast_run(
    conn: &mut PgConnection,
    run_id: Uuid,
    params: &CompleteRunParams,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE forecast_runs
         SET status = 'success', peak_risk = $2, peak_wind = $3, peak_gust = $4,
             peak_precip = $5, min_temp = $6, recommendation = $7
         WHERE id = $1",
    )
    .bind(run_id)
    .bind(params.peak_risk)
    .bind(params.peak_wind)
    .bind(params.peak_gust)
    .bind(params.peak_precip)
    .bind(params.min_temp)
    .bind(&params.recommendation)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Delete prior successful runs for the same (site, date), keeping the
/// replacement. Hourly rows cascade. Transaction-scoped so a failed
/// replacement never removes the previous good run.
pub async fn delete_superseded_runs(
    conn: &mut PgConnection,
    site_id: Uuid,
    forecast_date: NaiveDate,
    keep_run_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM forecast_runs
         WHERE site_id = $1 AND forecast_date = $2 AND status = 'success' AND id <> $3",
    )
    .bind(site_id)
    .bind(forecast_date)
    .bind(keep_run_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Multi-row insert of a run's hourly records.
pub async fn insert_hourly_rows(
    conn: &mut PgConnection,
    run_id: Uuid,
    rows: &[HourlyInsert],
) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }

    let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
        "INSERT INTO hourly_risk (
            run_id, timestamp, wind_speed, wind_gusts, precipitation, temperature,
            wind_spread, gust_spread, precip_spread, temp_spread, model_count, hourly_risk
        ) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(run_id)
            .push_bind(row.timestamp)
            .push_bind(row.wind_speed)
            .push_bind(row.wind_gusts)
            .push_bind(row.precipitation)
            .push_bind(row.temperature)
            .push_bind(row.wind_spread)
            .push_bind(row.gust_spread)
            .push_bind(row.precip_spread)
            .push_bind(row.temp_spread)
            .push_bind(row.model_count)
            .push_bind(row.hourly_risk);
    });
    builder.build().execute(&mut *conn).await?;
    Ok(())
}

/// Runs for a site from a given date onwards, newest generation first per day.
pub async fn get_runs_for_site(
    pool: &PgPool,
    site_id: Uuid,
    from_date: NaiveDate,
) -> Result<Vec<ForecastRunRow>, sqlx::Error> {
    sqlx::query_as::<_, ForecastRunRow>(&format!(
        "SELECT {RUN_COLUMNS}
         FROM forecast_runs
         WHERE site_id = $1 AND forecast_date >= $2
         ORDER BY forecast_date, generated_at DESC"
    ))
    .bind(site_id)
    .bind(from_date)
    .fetch_all(pool)
    .await
}

/// Fetch a single run by id.
pub async fn get_run(pool: &PgPool, run_id: Uuid) -> Result<Option<ForecastRunRow>, sqlx::Error> {
    sqlx::query_as::<_, ForecastRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM forecast_runs WHERE id = $1"
    ))
    .bind(run_id)
    .fetch_optional(pool)
    .await
}

/// Hourly rows of one run, in timestamp order.
pub async fn get_hourly_for_run(
    pool: &PgPool,
    run_id: Uuid,
) -> Result<Vec<HourlyRiskRow>, sqlx::Error> {
    sqlx::query_as::<_, HourlyRiskRow>(
        "SELECT id, run_id, timestamp, wind_speed, wind_gusts, precipitation, temperature,
                wind_spread, gust_spread, precip_spread, temp_spread, model_count, hourly_risk
         FROM hourly_risk
         WHERE run_id = $1
         ORDER BY timestamp",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
}

/// Retention cleanup: delete runs generated before the cutoff.
/// Hourly rows cascade. Returns the number of runs removed.
pub async fn delete_runs_older_than(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM forecast_runs WHERE generated_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Grid runs
// ---------------------------------------------------------------------------

/// Parameters for creating a grid sweep run (created directly in `running`).
pub struct CreateGridRunParams {
    pub forecast_date: NaiveDate,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub resolution: f64,
    pub provider: String,
    pub grid_points: i32,
}

/// One hourly record at one lattice point.
pub struct GridPointInsert {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub wind_speed: f64,
    pub wind_gusts: f64,
    pub precipitation: f64,
    pub temperature: f64,
    pub risk: f64,
}

pub async fn create_grid_run(
    pool: &PgPool,
    params: &CreateGridRunParams,
) -> Result<GridRunRow, sqlx::Error> {
    sqlx::query_as::<_, GridRunRow>(&format!(
        "INSERT INTO grid_runs (
            id, forecast_date, generated_at, status, lat_min, lat_max, lon_min,
            lon_max, resolution, provider, grid_points
        ) VALUES ($1, $2, NOW(), 'running', $3, $4, $5, $6, $7, $8, $9)
        RETURNING {GRID_RUN_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(params.forecast_date)
    .bind(params.lat_min)
    .bind(params.lat_max)
    .bind(params.lon_min)
    .bind(params.lon_max)
    .bind(params.resolution)
    .bind(&params.provider)
    .bind(params.grid_points)
    .fetch_one(pool)
    .await
}

/// Mark a sweep `success` with its final counters.
pub async fn complete_grid_run(
    pool: &PgPool,
    run_id: Uuid,
    failed_points: i32,
    num_hours: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE grid_runs
         SET status = 'success', failed_points = $2, num_hours = $3
         WHERE id = $1",
    )
    .bind(run_id)
    .bind(failed_points)
    .bind(num_hours)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark a sweep `failed`, retaining the reason and failure counter.
pub async fn fail_grid_run(
    pool: &PgPool,
    run_id: Uuid,
    failed_points: i32,
    message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE grid_runs
         SET status = 'failed', failed_points = $2, error_message = $3
         WHERE id = $1",
    )
    .bind(run_id)
    .bind(failed_points)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete prior successful grid runs for the same date (replace strategy).
/// Point rows cascade.
pub async fn delete_superseded_grid_runs(
    pool: &PgPool,
    forecast_date: NaiveDate,
    keep_run_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM grid_runs
         WHERE forecast_date = $1 AND status = 'success' AND id <> $2",
    )
    .bind(forecast_date)
    .bind(keep_run_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Multi-row insert of one chunk of grid point records.
pub async fn insert_grid_rows(
    pool: &PgPool,
    run_id: Uuid,
    rows: &[GridPointInsert],
) -> Result<(), sqlx::Error> {
    if rows.is_empty() {
        return Ok(());
    }

    let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
        "INSERT INTO grid_points (
            run_id, latitude, longitude, timestamp, wind_speed, wind_gusts,
            precipitation, temperature, risk
        ) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(run_id)
            .push_bind(row.latitude)
            .push_bind(row.longitude)
            .push_bind(row.timestamp)
            .push_bind(row.wind_speed)
            .push_bind(row.wind_gusts)
            .push_bind(row.precipitation)
            .push_bind(row.temperature)
            .push_bind(row.risk);
    });
    builder.build().execute(pool).await?;
    Ok(())
}

/// The most recent successful grid run, if any.
pub async fn get_latest_grid_run(pool: &PgPool) -> Result<Option<GridRunRow>, sqlx::Error> {
    sqlx::query_as::<_, GridRunRow>(&format!(
        "SELECT {GRID_RUN_COLUMNS}
         FROM grid_runs
         WHERE status = 'success'
         ORDER BY generated_at DESC
         LIMIT 1"
    ))
    .fetch_optional(pool)
    .await
}

/// Point records of one grid run, in timestamp then position order.
pub async fn get_grid_points_for_run(
    pool: &PgPool,
    run_id: Uuid,
) -> Result<Vec<GridPointRow>, sqlx::Error> {
    sqlx::query_as::<_, GridPointRow>(
        "SELECT id, run_id, latitude, longitude, timestamp, wind_speed, wind_gusts,
                precipitation, temperature, risk
         FROM grid_points
         WHERE run_id = $1
         ORDER BY timestamp, latitude, longitude",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
}
