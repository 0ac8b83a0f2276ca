//! Forecast run orchestration.
//!
//! Drives the full pipeline for one target: fan out to all requested
//! providers, combine, score, aggregate per day, persist. Run lifecycle per
//! (target, forecast_date):
//!
//! ```text
//! pending → running → success | failed
//! ```
//!
//! Individual provider failures are tolerated (the ensemble shrinks); a day
//! without any ensemble hours fails independently of its siblings; a failed
//! run row is always recorded, never silently dropped. Persisting a
//! successful day is atomic: the superseding delete, the hourly rows, and
//! the success transition commit in one transaction, or the run is marked
//! failed and the computed rows are discarded.

use chrono::NaiveDate;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::ForecastRunRow;
use crate::db::queries::{self, CompleteRunParams, CreateRunParams, HourlyInsert};
use crate::errors::AppError;
use crate::helpers::round2;
use crate::services::daily::{aggregate_day, group_by_day, DailySummary};
use crate::services::ensemble::{combine_series, ProviderWeights};
use crate::services::provider::{ProviderConfig, ProviderRegistry, WeatherClient};
use crate::services::risk::{score_hours, HourlyRisk, ThresholdProfile};

/// Longest allowed request window (Open-Meteo's forecast horizon).
const MAX_WINDOW_DAYS: usize = 16;

/// A forecast target: a work site (or named location) with its active
/// threshold profile. Immutable for the duration of one run.
#[derive(Debug, Clone)]
pub struct ForecastTarget {
    pub site_id: Uuid,
    pub site_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Exposure category ("urban", "coastal", "highland", "rural");
    /// recorded on the run for observability.
    pub exposure: Option<String>,
    pub thresholds: ThresholdProfile,
}

/// One run request: an inclusive date window and the providers to consult.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub providers: Vec<String>,
}

/// Validate a target/request pair against the registry.
///
/// Everything here runs before any run row is created or any network request
/// is made: unknown providers, non-finite thresholds or coordinates, and
/// inverted or oversized windows never start a run.
pub fn validate_request<'r>(
    registry: &'r ProviderRegistry,
    target: &ForecastTarget,
    request: &RunRequest,
) -> Result<Vec<&'r ProviderConfig>, AppError> {
    target.thresholds.validate()?;

    if !target.latitude.is_finite() || !target.longitude.is_finite() {
        return Err(AppError::Validation(format!(
            "Target '{}' has non-finite coordinates",
            target.site_name
        )));
    }

    date_window(request.start_date, request.end_date)?;
    registry.resolve(&request.providers)
}

/// Expand an inclusive date window into its individual days.
fn date_window(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, AppError> {
    if end < start {
        return Err(AppError::Validation(format!(
            "Window end {} is before start {}",
            end, start
        )));
    }

    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        days.push(current);
        current = current.succ_opt().ok_or_else(|| {
            AppError::Validation(format!("Window extends beyond representable dates: {}", current))
        })?;
    }

    if days.len() > MAX_WINDOW_DAYS {
        return Err(AppError::Validation(format!(
            "Window of {} days exceeds the {}-day forecast horizon",
            days.len(),
            MAX_WINDOW_DAYS
        )));
    }

    Ok(days)
}

/// Run the full pipeline for one target and window.
///
/// Returns one run row per day in the window, each in a terminal state.
/// Only fails outright on invalid input or when the initial run rows cannot
/// be created — after that, every error is captured on the affected row.
pub async fn run_forecast_for_target(
    pool: &PgPool,
    client: &WeatherClient,
    registry: &ProviderRegistry,
    target: &ForecastTarget,
    request: &RunRequest,
) -> Result<Vec<ForecastRunRow>, AppError> {
    let providers = validate_request(registry, target, request)?;
    let days = date_window(request.start_date, request.end_date)?;
    let models_used: Vec<String> = providers.iter().map(|p| p.id.clone()).collect();

    // One pending run row per day, before any network activity.
    let mut runs = Vec::with_capacity(days.len());
    for &day in &days {
        let run = queries::create_forecast_run(
            pool,
            &CreateRunParams {
                site_id: target.site_id,
                site_name: target.site_name.clone(),
                latitude: target.latitude,
                longitude: target.longitude,
                exposure: target.exposure.clone(),
                forecast_date: day,
                models_used: models_used.clone(),
            },
        )
        .await?;
        runs.push(run);
    }

    for run in &mut runs {
        queries::mark_run_running(pool, run.id).await?;
        run.status = "running".to_string();
    }

    // Fan out to every requested provider in parallel; each attempt yields a
    // Result and the combiner works from the successes.
    let fetches = providers.iter().map(|p| {
        client.fetch_series(
            p,
            target.latitude,
            target.longitude,
            request.start_date,
            request.end_date,
        )
    });
    let results = join_all(fetches).await;

    let mut series = Vec::with_capacity(results.len());
    for (provider, result) in providers.iter().zip(results) {
        match result {
            Ok(s) => {
                tracing::debug!(
                    "{}: provider {} returned {} hours",
                    target.site_name,
                    provider.id,
                    s.hours.len()
                );
                series.push(s);
            }
            Err(e) => {
                tracing::warn!(
                    "{}: provider {} failed, continuing with reduced ensemble: {}",
                    target.site_name,
                    provider.id,
                    e
                );
            }
        }
    }

    let total_hours: usize = series.iter().map(|s| s.hours.len()).sum();
    if total_hours == 0 {
        let reason = format!(
            "All {} providers failed for the whole window",
            providers.len()
        );
        tracing::error!("{}: {}", target.site_name, reason);
        for run in &mut runs {
            queries::fail_forecast_run(pool, run.id, &reason).await?;
            run.status = "failed".to_string();
            run.error_message = Some(reason.clone());
        }
        return Ok(runs);
    }

    let weights = ProviderWeights::from_registry(registry);
    let combined = combine_series(&series, &weights);
    let scored = score_hours(&combined, &target.thresholds);
    let mut by_day = group_by_day(scored);

    // Each day succeeds or fails independently.
    for run in &mut runs {
        let hours = by_day.remove(&run.forecast_date).unwrap_or_default();
        match aggregate_day(run.forecast_date, &hours) {
            Some(summary) => {
                match persist_day(pool, run, &hours, &summary).await {
                    Ok(()) => {
                        apply_success(run, &summary);
                        tracing::info!(
                            "{} {}: {} (peak risk {:.1}%, {} hours)",
                            target.site_name,
                            run.forecast_date,
                            summary.recommendation.as_str(),
                            summary.peak_risk,
                            summary.hour_count
                        );
                    }
                    Err(e) => {
                        let reason = format!("Failed to store results: {}", e);
                        tracing::error!("{} {}: {}", target.site_name, run.forecast_date, reason);
                        queries::fail_forecast_run(pool, run.id, &reason).await?;
                        run.status = "failed".to_string();
                        run.error_message = Some(reason);
                    }
                }
            }
            None => {
                let reason = "No ensemble hours produced for this day".to_string();
                tracing::warn!("{} {}: {}", target.site_name, run.forecast_date, reason);
                queries::fail_forecast_run(pool, run.id, &reason).await?;
                run.status = "failed".to_string();
                run.error_message = Some(reason);
            }
        }
    }

    Ok(runs)
}

/// Persist one successful day atomically: supersede any prior success run
/// for the same (site, date), write the hourly rows, and mark this run
/// successful — all in one transaction.
async fn persist_day(
    pool: &PgPool,
    run: &ForecastRunRow,
    hours: &[HourlyRisk],
    summary: &DailySummary,
) -> Result<(), AppError> {
    let rows: Vec<HourlyInsert> = hours
        .iter()
        .map(|h| HourlyInsert {
            timestamp: h.hour.timestamp,
            wind_speed: round2(h.hour.wind_speed),
            wind_gusts: round2(h.hour.wind_gusts),
            precipitation: round2(h.hour.precipitation),
            temperature: round2(h.hour.temperature),
            wind_spread: round2(h.hour.wind_spread),
            gust_spread: round2(h.hour.gust_spread),
            precip_spread: round2(h.hour.precip_spread),
            temp_spread: round2(h.hour.temp_spread),
            model_count: h.hour.model_count as i32,
            hourly_risk: round2(h.risk),
        })
        .collect();

    let mut tx = pool.begin().await?;
    queries::delete_superseded_runs(&mut tx, run.site_id, run.forecast_date, run.id).await?;
    queries::insert_hourly_rows(&mut tx, run.id, &rows).await?;
    queries::complete_forecast_run(
        &mut tx,
        run.id,
        &CompleteRunParams {
            peak_risk: round2(summary.peak_risk),
            peak_wind: round2(summary.peak_wind),
            peak_gust: round2(summary.peak_gust),
            peak_precip: round2(summary.peak_precip),
            min_temp: round2(summary.min_temp),
            recommendation: summary.recommendation.as_str().to_string(),
        },
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Mirror a committed success onto the in-memory row.
fn apply_success(run: &mut ForecastRunRow, summary: &DailySummary) {
    run.status = "success".to_string();
    run.peak_risk = Some(round2(summary.peak_risk));
    run.peak_wind = Some(round2(summary.peak_wind));
    run.peak_gust = Some(round2(summary.peak_gust));
    run.peak_precip = Some(round2(summary.peak_precip));
    run.min_temp = Some(round2(summary.min_temp));
    run.recommendation = Some(summary.recommendation.as_str().to_string());
}

/// Outcome of one target within a batch.
pub struct BatchOutcome {
    pub site_id: Uuid,
    pub site_name: String,
    pub result: Result<Vec<ForecastRunRow>, AppError>,
}

/// Run the pipeline for many targets with bounded concurrency.
///
/// Targets are independent: one target's failure never aborts the others.
/// `max_concurrent` bounds simultaneous pipelines; the client's shared
/// semaphore additionally bounds in-flight provider requests globally.
pub async fn run_forecasts_batch(
    pool: &PgPool,
    client: &WeatherClient,
    registry: &ProviderRegistry,
    targets: Vec<ForecastTarget>,
    request: &RunRequest,
    max_concurrent: usize,
) -> Vec<BatchOutcome> {
    stream::iter(targets)
        .map(|target| async move {
            let result =
                run_forecast_for_target(pool, client, registry, &target, request).await;
            if let Err(ref e) = result {
                tracing::error!("Run failed for site {}: {}", target.site_name, e);
            }
            BatchOutcome {
                site_id: target.site_id,
                site_name: target.site_name,
                result,
            }
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ForecastTarget {
        ForecastTarget {
            site_id: Uuid::new_v4(),
            site_name: "Forth Bridge South".to_string(),
            latitude: 56.0,
            longitude: -3.39,
            exposure: Some("coastal".to_string()),
            thresholds: ThresholdProfile::default(),
        }
    }

    fn request(start: &str, end: &str) -> RunRequest {
        RunRequest {
            start_date: start.parse().unwrap(),
            end_date: end.parse().unwrap(),
            providers: vec!["ecmwf".to_string(), "gfs".to_string()],
        }
    }

    #[test]
    fn test_date_window_single_day() {
        let days = date_window("2026-08-06".parse().unwrap(), "2026-08-06".parse().unwrap())
            .unwrap();
        assert_eq!(days.len(), 1);
    }

    #[test]
    fn test_date_window_inclusive() {
        let days = date_window("2026-08-06".parse().unwrap(), "2026-08-08".parse().unwrap())
            .unwrap();
        assert_eq!(days.len(), 3);
        assert_eq!(days[0], "2026-08-06".parse::<NaiveDate>().unwrap());
        assert_eq!(days[2], "2026-08-08".parse::<NaiveDate>().unwrap());
    }

    #[test]
    fn test_date_window_rejects_inverted() {
        let err = date_window("2026-08-08".parse().unwrap(), "2026-08-06".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_date_window_rejects_oversized() {
        let err = date_window("2026-08-01".parse().unwrap(), "2026-09-15".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_validate_request_accepts_known_providers() {
        let registry = ProviderRegistry::with_defaults();
        let resolved =
            validate_request(&registry, &target(), &request("2026-08-06", "2026-08-08")).unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn test_validate_request_rejects_unknown_provider() {
        let registry = ProviderRegistry::with_defaults();
        let mut req = request("2026-08-06", "2026-08-08");
        req.providers.push("hirlam".to_string());
        let err = validate_request(&registry, &target(), &req).unwrap_err();
        assert!(err.to_string().contains("hirlam"));
    }

    #[test]
    fn test_validate_request_rejects_bad_thresholds() {
        let registry = ProviderRegistry::with_defaults();
        let mut t = target();
        t.thresholds.wind_mean_cancel = f64::NAN;
        let err = validate_request(&registry, &t, &request("2026-08-06", "2026-08-08"))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_validate_request_rejects_bad_coordinates() {
        let registry = ProviderRegistry::with_defaults();
        let mut t = target();
        t.latitude = f64::INFINITY;
        assert!(validate_request(&registry, &t, &request("2026-08-06", "2026-08-08")).is_err());
    }

    // run_forecast_for_target and run_forecasts_batch require a PgPool and
    // are exercised against a real database in deployment; the pure
    // validation, windowing, combination, scoring, and aggregation logic
    // they compose is unit-tested in this module and in ensemble/risk/daily.
}
