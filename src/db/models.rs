use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// One (site, forecast_date) unit of work.
///
/// Status lifecycle: pending → running → success | failed. Aggregate fields
/// are populated on success; `error_message` on failure. At most one success
/// row is retained per (site_id, forecast_date) — re-running replaces it.
#[derive(Debug, Clone, FromRow)]
pub struct ForecastRunRow {
    pub id: Uuid,
    pub site_id: Uuid,
    pub site_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub exposure: Option<String>,
    pub forecast_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub status: String,
    pub models_used: Vec<String>,
    pub peak_risk: Option<f64>,
    pub peak_wind: Option<f64>,
    pub peak_gust: Option<f64>,
    pub peak_precip: Option<f64>,
    pub min_temp: Option<f64>,
    pub recommendation: Option<String>,
    pub error_message: Option<String>,
}

/// One combined, scored hour belonging to a forecast run.
#[derive(Debug, Clone, FromRow)]
pub struct HourlyRiskRow {
    pub id: i64,
    pub run_id: Uuid,
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

/// One spatial sweep over a bounding-box lattice.
#[derive(Debug, Clone, FromRow)]
pub struct GridRunRow {
    pub id: Uuid,
    pub forecast_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
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

/// One hourly record at one lattice point of a grid run.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)] // All fields populated by FromRow; some accessed only via route serialization
pub struct GridPointRow {
    pub id: i64,
    pub run_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub wind_speed: f64,
    pub wind_gusts: f64,
    pub precipitation: f64,
    pub temperature: f64,
    pub risk: f64,
}
