//! Open-Meteo forecast provider client.
//!
//! Fetches one numerical weather model's hourly series for a location and
//! date window from the Open-Meteo forecast API, selecting the model with
//! the `models=` parameter. See: https://open-meteo.com/en/docs
//!
//! Field mapping (v1, fixed per client version):
//! - `wind_speed_10m`  (km/h) → wind_speed  (m/s)
//! - `wind_gusts_10m`  (km/h) → wind_gusts  (m/s)
//! - `precipitation`   (mm/h) → precipitation
//! - `temperature_2m`  (°C)   → temperature
//!
//! Unit conversion happens here and nowhere else. Missing or non-finite
//! values are sanitized to neutral defaults (0.0 for wind/gust/precip,
//! 10.0 °C for temperature) rather than propagated downstream.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::errors::AppError;
use crate::helpers::{sanitize, NEUTRAL_TEMP_C};

const OPEN_METEO_BASE_URL: &str = "https://api.open-meteo.com";

/// Hourly variables requested from every model.
const HOURLY_FIELDS: &str = "wind_speed_10m,wind_gusts_10m,precipitation,temperature_2m";

/// Open-Meteo reports wind in km/h by default; the engine works in m/s.
const KMH_TO_MS: f64 = 1.0 / 3.6;

// ---------------------------------------------------------------------------
// Provider registry
// ---------------------------------------------------------------------------

/// Configuration for one numerical weather model.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Engine-facing identifier (e.g. "ecmwf").
    pub id: String,
    /// Human-readable model name for logs and run records.
    pub display_name: String,
    /// Value of the Open-Meteo `models=` query parameter.
    pub model_param: String,
    /// Ensemble weight. Equal by default; callers may build a registry
    /// with non-equal weights.
    pub weight: f64,
}

/// Immutable registry of known providers.
///
/// Constructed once at startup and passed into the orchestrator, so tests
/// can substitute a registry of fake providers. An identifier not present
/// here is a configuration error surfaced before any network activity.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self { providers }
    }

    /// The default registry: five independent global/regional models,
    /// equally weighted.
    pub fn with_defaults() -> Self {
        let entry = |id: &str, display_name: &str, model_param: &str| ProviderConfig {
            id: id.to_string(),
            display_name: display_name.to_string(),
            model_param: model_param.to_string(),
            weight: 1.0,
        };
        Self::new(vec![
            entry("ecmwf", "ECMWF IFS", "ecmwf_ifs025"),
            entry("gfs", "NOAA GFS", "gfs_seamless"),
            entry("icon", "DWD ICON", "icon_seamless"),
            entry("ukmo", "UK Met Office", "ukmo_seamless"),
            entry("meteofrance", "Météo-France ARPEGE", "meteofrance_seamless"),
        ])
    }

    pub fn get(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// All known provider identifiers, in registry order.
    pub fn ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id.clone()).collect()
    }

    /// Resolve a list of provider identifiers against the registry.
    ///
    /// Fails with a validation error naming the unknown identifier, so the
    /// caller can reject a run before any fetch begins.
    pub fn resolve(&self, ids: &[String]) -> Result<Vec<&ProviderConfig>, AppError> {
        if ids.is_empty() {
            return Err(AppError::Validation(
                "At least one provider must be requested".to_string(),
            ));
        }
        ids.iter()
            .map(|id| {
                self.get(id).ok_or_else(|| {
                    AppError::Validation(format!(
                        "Unknown provider '{}'. Available: {}",
                        id,
                        self.ids().join(", ")
                    ))
                })
            })
            .collect()
    }

    /// Ensemble weight for a provider, 1.0 when unknown.
    pub fn weight_for(&self, id: &str) -> f64 {
        self.get(id).map(|p| p.weight).unwrap_or(1.0)
    }
}

// ---------------------------------------------------------------------------
// Normalized series
// ---------------------------------------------------------------------------

/// One normalized hour from a single provider.
#[derive(Debug, Clone)]
pub struct ProviderHour {
    pub timestamp: DateTime<Utc>,
    /// Mean wind speed in m/s.
    pub wind_speed: f64,
    /// Wind gusts in m/s.
    pub wind_gusts: f64,
    /// Precipitation rate in mm/h.
    pub precipitation: f64,
    /// Air temperature in °C.
    pub temperature: f64,
}

/// One provider's normalized hourly output for a location/window.
///
/// May cover fewer hours than requested if the model's horizon ends early;
/// an empty series is valid (the provider contributed nothing).
#[derive(Debug, Clone)]
pub struct ProviderSeries {
    pub provider_id: String,
    pub hours: Vec<ProviderHour>,
}

// ---------------------------------------------------------------------------
// Open-Meteo JSON response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OmResponse {
    hourly: Option<OmHourly>,
}

#[derive(Debug, Deserialize)]
struct OmHourly {
    time: Vec<String>,
    wind_speed_10m: Option<Vec<Option<f64>>>,
    wind_gusts_10m: Option<Vec<Option<f64>>>,
    precipitation: Option<Vec<Option<f64>>>,
    temperature_2m: Option<Vec<Option<f64>>>,
}

/// Index into an optional column, treating absent columns as all-null.
fn value_at(column: &Option<Vec<Option<f64>>>, i: usize) -> Option<f64> {
    column.as_ref().and_then(|col| col.get(i).copied().flatten())
}

/// Parse an Open-Meteo timestamp. The API returns minute-resolution ISO
/// strings without a zone suffix ("2026-08-06T14:00") when asked for UTC;
/// full RFC 3339 is accepted as well.
fn parse_om_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .ok()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Convert a raw hourly block into a sanitized, normalized series.
///
/// Pure function (no I/O). Entries with unparseable timestamps are skipped
/// with a warning rather than failing the whole series.
fn normalize_hourly(provider_id: &str, hourly: &OmHourly) -> Vec<ProviderHour> {
    let mut hours = Vec::with_capacity(hourly.time.len());

    for (i, raw_time) in hourly.time.iter().enumerate() {
        let Some(timestamp) = parse_om_time(raw_time) else {
            tracing::warn!(
                "Provider {}: skipping unparseable timestamp '{}'",
                provider_id,
                raw_time
            );
            continue;
        };

        hours.push(ProviderHour {
            timestamp,
            wind_speed: sanitize(value_at(&hourly.wind_speed_10m, i), 0.0) * KMH_TO_MS,
            wind_gusts: sanitize(value_at(&hourly.wind_gusts_10m, i), 0.0) * KMH_TO_MS,
            precipitation: sanitize(value_at(&hourly.precipitation, i), 0.0),
            temperature: sanitize(value_at(&hourly.temperature_2m, i), NEUTRAL_TEMP_C),
        });
    }

    hours
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for the Open-Meteo forecast API.
///
/// One instance is shared across all runs and sweeps. The semaphore bounds
/// in-flight requests globally, which is the upstream rate limit for every
/// caller (site runs and grid sweeps alike).
#[derive(Debug, Clone)]
pub struct WeatherClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    limiter: Arc<Semaphore>,
}

impl WeatherClient {
    pub fn new(user_agent: &str, max_inflight: usize, request_timeout: Duration) -> Self {
        Self::with_base_url(OPEN_METEO_BASE_URL, user_agent, max_inflight, request_timeout)
    }

    /// Construct against an alternate base URL (tests point this at a mock
    /// server).
    pub fn with_base_url(
        base_url: &str,
        user_agent: &str,
        max_inflight: usize,
        request_timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
            limiter: Arc::new(Semaphore::new(max_inflight.max(1))),
        }
    }

    /// Fetch one model's hourly series for a location and date window.
    ///
    /// Returns a normalized, sanitized [`ProviderSeries`], or a provider
    /// error on transport failure, non-2xx status, or a malformed payload.
    /// A response with no hourly block at all is malformed; a response with
    /// fewer hours than requested is not (the series is just shorter).
    pub async fn fetch_series(
        &self,
        provider: &ProviderConfig,
        lat: f64,
        lon: f64,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<ProviderSeries, AppError> {
        // Coordinates limited to 4 decimal places, matching the upstream grid.
        let url = format!(
            "{}/v1/forecast?latitude={:.4}&longitude={:.4}&hourly={}&models={}&start_date={}&end_date={}&timezone=UTC",
            self.base_url,
            lat,
            lon,
            HOURLY_FIELDS,
            provider.model_param,
            start_date.format("%Y-%m-%d"),
            end_date.format("%Y-%m-%d"),
        );

        // Permit is held for the duration of the request. The semaphore is
        // never closed, so acquire cannot fail.
        let _permit = self
            .limiter
            .acquire()
            .await
            .expect("request limiter closed");

        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| {
                AppError::Provider(format!("{} request failed: {}", provider.display_name, e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::Provider(format!(
                "{} returned HTTP {}",
                provider.display_name,
                response.status()
            )));
        }

        let payload: OmResponse = response.json().await.map_err(|e| {
            AppError::Provider(format!("{} JSON parse error: {}", provider.display_name, e))
        })?;

        let hourly = payload.hourly.ok_or_else(|| {
            AppError::Provider(format!(
                "{} response missing hourly block",
                provider.display_name
            ))
        })?;

        let hours = normalize_hourly(&provider.id, &hourly);
        tracing::debug!(
            "Provider {}: fetched {} hours for ({:.2}, {:.2})",
            provider.id,
            hours.len(),
            lat,
            lon
        );

        Ok(ProviderSeries {
            provider_id: provider.id.clone(),
            hours,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hourly_block(json: serde_json::Value) -> OmHourly {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_registry_resolves_known_providers() {
        let registry = ProviderRegistry::with_defaults();
        let resolved = registry
            .resolve(&["ecmwf".to_string(), "gfs".to_string()])
            .unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].model_param, "ecmwf_ifs025");
    }

    #[test]
    fn test_registry_rejects_unknown_provider() {
        let registry = ProviderRegistry::with_defaults();
        let err = registry
            .resolve(&["ecmwf".to_string(), "wrf".to_string()])
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("wrf"));
    }

    #[test]
    fn test_registry_rejects_empty_list() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.resolve(&[]).is_err());
    }

    #[test]
    fn test_registry_default_weights_equal() {
        let registry = ProviderRegistry::with_defaults();
        for id in registry.ids() {
            assert_eq!(registry.weight_for(&id), 1.0);
        }
        assert_eq!(registry.weight_for("unknown"), 1.0);
    }

    #[test]
    fn test_parse_om_time_minute_iso() {
        let dt = parse_om_time("2026-08-06T14:00").unwrap();
        assert_eq!(dt, "2026-08-06T14:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_parse_om_time_rfc3339() {
        let dt = parse_om_time("2026-08-06T14:00:00Z").unwrap();
        assert_eq!(dt, "2026-08-06T14:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_parse_om_time_garbage() {
        assert!(parse_om_time("not-a-time").is_none());
    }

    #[test]
    fn test_normalize_converts_wind_to_ms() {
        let hourly = hourly_block(serde_json::json!({
            "time": ["2026-08-06T00:00"],
            "wind_speed_10m": [36.0],
            "wind_gusts_10m": [72.0],
            "precipitation": [0.4],
            "temperature_2m": [12.5]
        }));
        let hours = normalize_hourly("ecmwf", &hourly);
        assert_eq!(hours.len(), 1);
        assert!((hours[0].wind_speed - 10.0).abs() < 1e-9);
        assert!((hours[0].wind_gusts - 20.0).abs() < 1e-9);
        assert_eq!(hours[0].precipitation, 0.4);
        assert_eq!(hours[0].temperature, 12.5);
    }

    #[test]
    fn test_normalize_sanitizes_nulls() {
        let hourly = hourly_block(serde_json::json!({
            "time": ["2026-08-06T00:00", "2026-08-06T01:00"],
            "wind_speed_10m": [null, 18.0],
            "wind_gusts_10m": [null, null],
            "precipitation": [null, 1.2],
            "temperature_2m": [null, -3.0]
        }));
        let hours = normalize_hourly("gfs", &hourly);
        assert_eq!(hours.len(), 2);
        assert_eq!(hours[0].wind_speed, 0.0);
        assert_eq!(hours[0].wind_gusts, 0.0);
        assert_eq!(hours[0].precipitation, 0.0);
        assert_eq!(hours[0].temperature, 10.0);
        assert!((hours[1].wind_speed - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_missing_columns() {
        // A model that reports no gust column at all still produces hours.
        let hourly = hourly_block(serde_json::json!({
            "time": ["2026-08-06T00:00"],
            "wind_speed_10m": [7.2],
            "precipitation": [0.0],
            "temperature_2m": [8.0]
        }));
        let hours = normalize_hourly("icon", &hourly);
        assert_eq!(hours.len(), 1);
        assert_eq!(hours[0].wind_gusts, 0.0);
        assert!((hours[0].wind_speed - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_skips_bad_timestamps() {
        let hourly = hourly_block(serde_json::json!({
            "time": ["garbage", "2026-08-06T01:00"],
            "wind_speed_10m": [3.6, 3.6],
            "wind_gusts_10m": [7.2, 7.2],
            "precipitation": [0.0, 0.0],
            "temperature_2m": [5.0, 5.0]
        }));
        let hours = normalize_hourly("ukmo", &hourly);
        assert_eq!(hours.len(), 1);
        assert_eq!(
            hours[0].timestamp,
            "2026-08-06T01:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    // --- Client tests against a mock Open-Meteo server ---

    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> WeatherClient {
        WeatherClient::with_base_url(base_url, "test-agent", 2, Duration::from_secs(5))
    }

    fn window() -> (NaiveDate, NaiveDate) {
        (
            "2026-08-06".parse().unwrap(),
            "2026-08-08".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_fetch_series_maps_fields_and_units() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("models", "ecmwf_ifs025"))
            .and(query_param("start_date", "2026-08-06"))
            .and(query_param("end_date", "2026-08-08"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hourly": {
                    "time": ["2026-08-06T00:00", "2026-08-06T01:00"],
                    "wind_speed_10m": [36.0, null],
                    "wind_gusts_10m": [54.0, 72.0],
                    "precipitation": [0.0, 1.5],
                    "temperature_2m": [12.0, null]
                }
            })))
            .mount(&server)
            .await;

        let registry = ProviderRegistry::with_defaults();
        let provider = registry.get("ecmwf").unwrap();
        let (start, end) = window();

        let series = test_client(&server.uri())
            .fetch_series(provider, 55.95, -3.19, start, end)
            .await
            .unwrap();

        assert_eq!(series.provider_id, "ecmwf");
        assert_eq!(series.hours.len(), 2);
        assert!((series.hours[0].wind_speed - 10.0).abs() < 1e-9);
        assert!((series.hours[0].wind_gusts - 15.0).abs() < 1e-9);
        assert_eq!(series.hours[0].temperature, 12.0);
        // Nulls sanitized to neutral defaults.
        assert_eq!(series.hours[1].wind_speed, 0.0);
        assert_eq!(series.hours[1].temperature, 10.0);
        assert_eq!(series.hours[1].precipitation, 1.5);
    }

    #[tokio::test]
    async fn test_fetch_series_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let registry = ProviderRegistry::with_defaults();
        let provider = registry.get("gfs").unwrap();
        let (start, end) = window();

        let err = test_client(&server.uri())
            .fetch_series(provider, 51.5, -0.1, start, end)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Provider(_)));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_fetch_series_malformed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let registry = ProviderRegistry::with_defaults();
        let provider = registry.get("icon").unwrap();
        let (start, end) = window();

        let err = test_client(&server.uri())
            .fetch_series(provider, 51.5, -0.1, start, end)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Provider(_)));
    }

    #[tokio::test]
    async fn test_fetch_series_missing_hourly_block() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let registry = ProviderRegistry::with_defaults();
        let provider = registry.get("ukmo").unwrap();
        let (start, end) = window();

        let err = test_client(&server.uri())
            .fetch_series(provider, 51.5, -0.1, start, end)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("hourly"));
    }

    #[test]
    fn test_normalize_ragged_short_column() {
        // Column shorter than time axis: missing tail treated as null.
        let hourly = hourly_block(serde_json::json!({
            "time": ["2026-08-06T00:00", "2026-08-06T01:00"],
            "wind_speed_10m": [3.6],
            "wind_gusts_10m": [7.2, 7.2],
            "precipitation": [0.1, 0.1],
            "temperature_2m": [5.0, 5.0]
        }));
        let hours = normalize_hourly("ecmwf", &hourly);
        assert_eq!(hours.len(), 2);
        assert!((hours[0].wind_speed - 1.0).abs() < 1e-9);
        assert_eq!(hours[1].wind_speed, 0.0);
    }
}
