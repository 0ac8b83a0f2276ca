//! Forecast run HTTP endpoints — the job-submission and retrieval surface.
//!
//! - POST /api/v1/runs                       — run the pipeline for one target
//! - POST /api/v1/runs/batch                 — run many targets, bounded fan-out
//! - GET  /api/v1/runs/site/:site_id         — run summaries for a site
//! - GET  /api/v1/runs/:run_id/hourly        — one run's hourly records
//! - POST /api/v1/maintenance/cleanup        — retention cleanup of old runs

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::models::{ForecastRunRow, HourlyRiskRow};
use crate::db::queries;
use crate::errors::AppError;
use crate::services::provider::{ProviderRegistry, WeatherClient};
use crate::services::risk::ThresholdProfile;
use crate::services::runner::{
    run_forecast_for_target, run_forecasts_batch, ForecastTarget, RunRequest,
};

/// Shared application state for run endpoints.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) pool: sqlx::PgPool,
    pub(crate) client: WeatherClient,
    pub(crate) registry: Arc<ProviderRegistry>,
    /// Default window length in days when a submission omits the end date.
    pub(crate) forecast_days: u32,
    /// Bound on targets processed concurrently in a batch.
    pub(crate) max_concurrent_targets: usize,
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// A forecast run submission for one target.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RunSubmission {
    /// Stable site identifier; successive runs for the same site supersede
    /// each other per forecast date.
    pub site_id: Uuid,
    pub site_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Exposure category ("urban", "coastal", "highland", "rural")
    pub exposure: Option<String>,
    /// Threshold profile; engine defaults are used when omitted.
    pub thresholds: Option<ThresholdProfile>,
    /// First forecast date (defaults to today, UTC).
    pub start_date: Option<NaiveDate>,
    /// Last forecast date, inclusive (defaults to start + configured days − 1).
    pub end_date: Option<NaiveDate>,
    /// Providers to consult (defaults to every registered provider).
    pub providers: Option<Vec<String>>,
}

/// One target inside a batch submission.
#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchTarget {
    pub site_id: Uuid,
    pub site_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub exposure: Option<String>,
    /// Threshold profile; engine defaults are used when omitted.
    pub thresholds: Option<ThresholdProfile>,
}

/// A batch submission: many targets sharing one window and provider list.
#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchSubmission {
    pub targets: Vec<BatchTarget>,
    /// First forecast date (defaults to today, UTC).
    pub start_date: Option<NaiveDate>,
    /// Last forecast date, inclusive (defaults to start + configured days − 1).
    pub end_date: Option<NaiveDate>,
    /// Providers to consult (defaults to every registered provider).
    pub providers: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SiteRunsQuery {
    /// Earliest forecast date to include, ISO 8601 (defaults to today)
    pub from: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CleanupQuery {
    /// Delete runs generated more than this many days ago (default 30)
    pub days: Option<u32>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Summary of one (site, forecast_date) run.
#[derive(Debug, Serialize, ToSchema)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub site_id: Uuid,
    pub site_name: String,
    /// Forecast date (ISO 8601 date)
    pub forecast_date: String,
    /// When the run was generated (ISO 8601)
    pub generated_at: String,
    /// "pending", "running", "success", or "failed"
    pub status: String,
    pub models_used: Vec<String>,
    pub peak_risk: Option<f64>,
    pub peak_wind: Option<f64>,
    pub peak_gust: Option<f64>,
    pub peak_precip: Option<f64>,
    pub min_temp: Option<f64>,
    /// "GO", "CAUTION", or "CANCEL" (success runs only)
    pub recommendation: Option<String>,
    pub error_message: Option<String>,
}

impl From<&ForecastRunRow> for RunSummary {
    fn from(run: &ForecastRunRow) -> Self {
        Self {
            run_id: run.id,
            site_id: run.site_id,
            site_name: run.site_name.clone(),
            forecast_date: run.forecast_date.to_string(),
            generated_at: run.generated_at.to_rfc3339(),
            status: run.status.clone(),
            models_used: run.models_used.clone(),
            peak_risk: run.peak_risk,
            peak_wind: run.peak_wind,
            peak_gust: run.peak_gust,
            peak_precip: run.peak_precip,
            min_temp: run.min_temp,
            recommendation: run.recommendation.clone(),
            error_message: run.error_message.clone(),
        }
    }
}

/// Response to a run submission: one summary per day in the window.
#[derive(Debug, Serialize, ToSchema)]
pub struct RunsResponse {
    pub runs: Vec<RunSummary>,
}

/// One hourly record with raw variables, spreads, and the risk score.
#[derive(Debug, Serialize, ToSchema)]
pub struct HourlyEntry {
    /// Timestamp (ISO 8601)
    pub time: String,
    pub wind_speed: f64,
    pub wind_gusts: f64,
    pub precipitation: f64,
    pub temperature: f64,
    pub wind_spread: f64,
    pub gust_spread: f64,
    pub precip_spread: f64,
    pub temp_spread: f64,
    /// Providers that contributed to this hour
    pub model_count: i32,
    pub risk: f64,
}

impl From<&HourlyRiskRow> for HourlyEntry {
    fn from(row: &HourlyRiskRow) -> Self {
        Self {
            time: row.timestamp.to_rfc3339(),
            wind_speed: row.wind_speed,
            wind_gusts: row.wind_gusts,
            precipitation: row.precipitation,
            temperature: row.temperature,
            wind_spread: row.wind_spread,
            gust_spread: row.gust_spread,
            precip_spread: row.precip_spread,
            temp_spread: row.temp_spread,
            model_count: row.model_count,
            risk: row.hourly_risk,
        }
    }
}

/// One run's hourly records.
#[derive(Debug, Serialize, ToSchema)]
pub struct RunHourlyResponse {
    pub run: RunSummary,
    pub hours: Vec<HourlyEntry>,
}

/// Outcome of one target inside a batch: either its per-day run summaries
/// or the error that stopped it. One target's failure never aborts the rest.
#[derive(Debug, Serialize, ToSchema)]
pub struct BatchRunResult {
    pub site_id: Uuid,
    pub site_name: String,
    pub runs: Vec<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchRunsResponse {
    pub results: Vec<BatchRunResult>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CleanupResponse {
    /// Number of runs deleted (hourly rows cascade)
    pub deleted: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Submit a forecast run for one target.
///
/// Runs the full pipeline synchronously — fetch from every requested
/// provider, combine, score, aggregate, persist — and returns one run
/// summary per day in the window, each in a terminal state. Invalid input
/// (unknown provider, non-finite thresholds) is rejected before any fetch
/// begins.
#[utoipa::path(
    post,
    path = "/api/v1/runs",
    tag = "Runs",
    request_body = RunSubmission,
    responses(
        (status = 200, description = "Run completed (per-day statuses inside)", body = RunsResponse),
        (status = 400, description = "Invalid submission", body = crate::errors::ErrorResponse),
    )
)]
pub async fn submit_run(
    State(state): State<AppState>,
    Json(submission): Json<RunSubmission>,
) -> Result<Json<RunsResponse>, AppError> {
    let start_date = submission
        .start_date
        .unwrap_or_else(|| Utc::now().date_naive());
    let end_date = submission
        .end_date
        .unwrap_or(start_date + Duration::days(state.forecast_days as i64 - 1));

    let target = ForecastTarget {
        site_id: submission.site_id,
        site_name: submission.site_name,
        latitude: submission.latitude,
        longitude: submission.longitude,
        exposure: submission.exposure,
        thresholds: submission.thresholds.unwrap_or_default(),
    };
    let request = RunRequest {
        start_date,
        end_date,
        providers: submission
            .providers
            .unwrap_or_else(|| state.registry.ids()),
    };

    let runs =
        run_forecast_for_target(&state.pool, &state.client, &state.registry, &target, &request)
            .await?;

    Ok(Json(RunsResponse {
        runs: runs.iter().map(RunSummary::from).collect(),
    }))
}

/// Submit forecast runs for many targets at once.
///
/// Targets execute with bounded concurrency and are fully independent: one
/// target's validation or total failure is reported in its slot without
/// affecting the others.
#[utoipa::path(
    post,
    path = "/api/v1/runs/batch",
    tag = "Runs",
    request_body = BatchSubmission,
    responses(
        (status = 200, description = "Per-target outcomes", body = BatchRunsResponse),
        (status = 400, description = "Empty target list", body = crate::errors::ErrorResponse),
    )
)]
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(submission): Json<BatchSubmission>,
) -> Result<Json<BatchRunsResponse>, AppError> {
    if submission.targets.is_empty() {
        return Err(AppError::Validation(
            "Batch submission contains no targets".to_string(),
        ));
    }

    let start_date = submission
        .start_date
        .unwrap_or_else(|| Utc::now().date_naive());
    let end_date = submission
        .end_date
        .unwrap_or(start_date + Duration::days(state.forecast_days as i64 - 1));
    let request = RunRequest {
        start_date,
        end_date,
        providers: submission
            .providers
            .unwrap_or_else(|| state.registry.ids()),
    };

    let targets: Vec<ForecastTarget> = submission
        .targets
        .into_iter()
        .map(|t| ForecastTarget {
            site_id: t.site_id,
            site_name: t.site_name,
            latitude: t.latitude,
            longitude: t.longitude,
            exposure: t.exposure,
            thresholds: t.thresholds.unwrap_or_default(),
        })
        .collect();

    let outcomes = run_forecasts_batch(
        &state.pool,
        &state.client,
        &state.registry,
        targets,
        &request,
        state.max_concurrent_targets,
    )
    .await;

    let results = outcomes
        .into_iter()
        .map(|o| match o.result {
            Ok(runs) => BatchRunResult {
                site_id: o.site_id,
                site_name: o.site_name,
                runs: runs.iter().map(RunSummary::from).collect(),
                error: None,
            },
            Err(e) => BatchRunResult {
                site_id: o.site_id,
                site_name: o.site_name,
                runs: Vec::new(),
                error: Some(e.to_string()),
            },
        })
        .collect();

    Ok(Json(BatchRunsResponse { results }))
}

/// List run summaries for a site.
///
/// Returns at most one run per forecast date (the most recently generated),
/// from the given date onwards.
#[utoipa::path(
    get,
    path = "/api/v1/runs/site/{site_id}",
    tag = "Runs",
    params(
        ("site_id" = Uuid, Path, description = "Site identifier"),
        SiteRunsQuery,
    ),
    responses(
        (status = 200, description = "Run summaries", body = RunsResponse),
        (status = 400, description = "Invalid date parameter", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_site_runs(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Query(query): Query<SiteRunsQuery>,
) -> Result<Json<RunsResponse>, AppError> {
    let from_date = match &query.from {
        Some(raw) => raw.parse::<NaiveDate>().map_err(|_| {
            AppError::Validation(format!("Invalid 'from' date '{}', expected YYYY-MM-DD", raw))
        })?,
        None => Utc::now().date_naive(),
    };

    let rows = queries::get_runs_for_site(&state.pool, site_id, from_date).await?;

    // Rows are ordered (forecast_date, generated_at DESC): the first row per
    // date is the current one, older generations are superseded.
    let mut seen = HashSet::new();
    let runs: Vec<RunSummary> = rows
        .iter()
        .filter(|r| seen.insert(r.forecast_date))
        .map(RunSummary::from)
        .collect();

    Ok(Json(RunsResponse { runs }))
}

/// Fetch one run's hourly records, in timestamp order.
#[utoipa::path(
    get,
    path = "/api/v1/runs/{run_id}/hourly",
    tag = "Runs",
    params(("run_id" = Uuid, Path, description = "Run identifier")),
    responses(
        (status = 200, description = "Hourly records", body = RunHourlyResponse),
        (status = 404, description = "Run not found", body = crate::errors::ErrorResponse),
    )
)]
pub async fn get_run_hourly(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunHourlyResponse>, AppError> {
    let run = queries::get_run(&state.pool, run_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Run {} not found", run_id)))?;

    let hours = queries::get_hourly_for_run(&state.pool, run_id).await?;

    Ok(Json(RunHourlyResponse {
        run: RunSummary::from(&run),
        hours: hours.iter().map(HourlyEntry::from).collect(),
    }))
}

/// Delete runs older than the retention window to keep the database lean.
#[utoipa::path(
    post,
    path = "/api/v1/maintenance/cleanup",
    tag = "Maintenance",
    params(CleanupQuery),
    responses(
        (status = 200, description = "Old runs deleted", body = CleanupResponse),
    )
)]
pub async fn cleanup_runs(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>, AppError> {
    let days = query.days.unwrap_or(30);
    let cutoff = Utc::now() - Duration::days(days as i64);
    let deleted = queries::delete_runs_older_than(&state.pool, cutoff).await?;

    tracing::info!("Cleanup: deleted {} runs older than {} days", deleted, days);
    Ok(Json(CleanupResponse { deleted }))
}
