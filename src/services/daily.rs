//! Daily roll-up of scored hours.
//!
//! The worst hour of the day governs the whole day: the daily recommendation
//! is the band of the *peak* hourly risk, not of any average. A day with no
//! scored hours yields no summary at all — absence of data is not a
//! zero-risk day.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::services::risk::{HourlyRisk, Recommendation};

/// One calendar day's aggregate over its scored hours.
#[derive(Debug, Clone)]
pub struct DailySummary {
    pub date: NaiveDate,
    /// Maximum hourly risk score of the day.
    pub peak_risk: f64,
    /// Maximum mean wind (m/s).
    pub peak_wind: f64,
    /// Maximum gust (m/s).
    pub peak_gust: f64,
    /// Maximum precipitation rate (mm/h).
    pub peak_precip: f64,
    /// Minimum temperature (°C).
    pub min_temp: f64,
    /// Band of `peak_risk`.
    pub recommendation: Recommendation,
    /// Number of hours that contributed.
    pub hour_count: usize,
}

/// Aggregate one day's scored hours. Returns `None` for an empty slice.
pub fn aggregate_day(date: NaiveDate, hours: &[HourlyRisk]) -> Option<DailySummary> {
    let first = hours.first()?;

    let mut peak_risk = first.risk;
    let mut peak_wind = first.hour.wind_speed;
    let mut peak_gust = first.hour.wind_gusts;
    let mut peak_precip = first.hour.precipitation;
    let mut min_temp = first.hour.temperature;

    for h in &hours[1..] {
        peak_risk = peak_risk.max(h.risk);
        peak_wind = peak_wind.max(h.hour.wind_speed);
        peak_gust = peak_gust.max(h.hour.wind_gusts);
        peak_precip = peak_precip.max(h.hour.precipitation);
        min_temp = min_temp.min(h.hour.temperature);
    }

    Some(DailySummary {
        date,
        peak_risk,
        peak_wind,
        peak_gust,
        peak_precip,
        min_temp,
        recommendation: Recommendation::classify(peak_risk),
        hour_count: hours.len(),
    })
}

/// Group scored hours by UTC calendar day, preserving timestamp order
/// within each day.
pub fn group_by_day(hours: Vec<HourlyRisk>) -> BTreeMap<NaiveDate, Vec<HourlyRisk>> {
    let mut days: BTreeMap<NaiveDate, Vec<HourlyRisk>> = BTreeMap::new();
    for h in hours {
        days.entry(h.hour.timestamp.date_naive()).or_default().push(h);
    }
    days
}
