//! Hourly risk scoring for rope-access work.
//!
//! Pure functions from combined weather values + a threshold profile to a
//! 0–100 risk score and a GO / CAUTION / CANCEL band. Deterministic and
//! side-effect free: identical inputs always yield identical output.
//!
//! Per variable, severity follows a two-point piecewise scale: 0 at or below
//! the caution threshold, 100 at or beyond the cancel threshold, linear in
//! between. Temperature runs the other way — lower is worse. The hour's risk
//! is the *maximum* of the four severities: any one disqualifying condition
//! cancels work on its own.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::AppError;
use crate::services::ensemble::EnsembleHour;

/// Classification bands on the combined 0–100 risk score.
pub const CAUTION_BAND_START: f64 = 20.0;
pub const CANCEL_BAND_START: f64 = 50.0;

/// Weather limits for a site: a caution and a cancel threshold for each of
/// the four tracked variables. Consumed as a flat eight-field mapping.
///
/// Callers are expected to supply cancel at least as severe as caution per
/// variable; the engine does not reorder inconsistent pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ThresholdProfile {
    /// Mean wind caution threshold (m/s)
    pub wind_mean_caution: f64,
    /// Mean wind cancel threshold (m/s)
    pub wind_mean_cancel: f64,
    /// Gust caution threshold (m/s)
    pub gust_caution: f64,
    /// Gust cancel threshold (m/s)
    pub gust_cancel: f64,
    /// Precipitation caution threshold (mm/h)
    pub precip_caution: f64,
    /// Precipitation cancel threshold (mm/h)
    pub precip_cancel: f64,
    /// Minimum-temperature caution threshold (°C) — below this is cautionary
    pub temp_min_caution: f64,
    /// Minimum-temperature cancel threshold (°C) — at or below this cancels
    pub temp_min_cancel: f64,
}

impl Default for ThresholdProfile {
    /// The generic profile used for grid sweeps and for sites without one.
    fn default() -> Self {
        Self {
            wind_mean_caution: 10.0,
            wind_mean_cancel: 14.0,
            gust_caution: 15.0,
            gust_cancel: 20.0,
            precip_caution: 0.7,
            precip_cancel: 2.0,
            temp_min_caution: 1.0,
            temp_min_cancel: -2.0,
        }
    }
}

impl ThresholdProfile {
    /// Reject profiles containing non-finite limits before a run starts.
    pub fn validate(&self) -> Result<(), AppError> {
        let fields = [
            ("wind_mean_caution", self.wind_mean_caution),
            ("wind_mean_cancel", self.wind_mean_cancel),
            ("gust_caution", self.gust_caution),
            ("gust_cancel", self.gust_cancel),
            ("precip_caution", self.precip_caution),
            ("precip_cancel", self.precip_cancel),
            ("temp_min_caution", self.temp_min_caution),
            ("temp_min_cancel", self.temp_min_cancel),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(AppError::Validation(format!(
                    "Threshold '{}' must be a finite number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Go/no-go recommendation derived from a risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Go,
    Caution,
    Cancel,
}

impl Recommendation {
    /// Band a combined risk score: `<20 GO`, `<50 CAUTION`, else `CANCEL`.
    pub fn classify(risk: f64) -> Self {
        if risk < CAUTION_BAND_START {
            Recommendation::Go
        } else if risk < CANCEL_BAND_START {
            Recommendation::Caution
        } else {
            Recommendation::Cancel
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Go => "GO",
            Recommendation::Caution => "CAUTION",
            Recommendation::Cancel => "CANCEL",
        }
    }
}

/// Severity for a variable where larger values are worse (wind, gust,
/// precipitation). 0 at/below caution, 100 at/beyond cancel, linear between.
fn severity_ascending(value: f64, caution: f64, cancel: f64) -> f64 {
    if value >= cancel {
        return 100.0;
    }
    if value <= caution {
        return 0.0;
    }
    // caution < value < cancel implies cancel > caution, so the span is > 0.
    100.0 * (value - caution) / (cancel - caution)
}

/// Severity for a variable where smaller values are worse (temperature).
fn severity_descending(value: f64, caution: f64, cancel: f64) -> f64 {
    if value <= cancel {
        return 100.0;
    }
    if value >= caution {
        return 0.0;
    }
    100.0 * (caution - value) / (caution - cancel)
}

/// One scored hour: the combined weather plus its risk score and the profile
/// that produced it.
#[derive(Debug, Clone)]
pub struct HourlyRisk {
    pub hour: EnsembleHour,
    /// Combined risk score in [0, 100].
    pub risk: f64,
}

/// Score a single combined hour against a threshold profile.
///
/// The combined score is the maximum of the four per-variable severities.
pub fn score_hour(hour: &EnsembleHour, thresholds: &ThresholdProfile) -> HourlyRisk {
    let wind = severity_ascending(
        hour.wind_speed,
        thresholds.wind_mean_caution,
        thresholds.wind_mean_cancel,
    );
    let gust = severity_ascending(hour.wind_gusts, thresholds.gust_caution, thresholds.gust_cancel);
    let precip = severity_ascending(
        hour.precipitation,
        thresholds.precip_caution,
        thresholds.precip_cancel,
    );
    let temp = severity_descending(
        hour.temperature,
        thresholds.temp_min_caution,
        thresholds.temp_min_cancel,
    );

    HourlyRisk {
        hour: hour.clone(),
        risk: wind.max(gust).max(precip).max(temp),
    }
}

/// Score an ordered sequence of combined hours.
pub fn score_hours(hours: &[EnsembleHour], thresholds: &ThresholdProfile) -> Vec<HourlyRisk> {
    hours.iter().map(|h| score_hour(h, thresholds)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn calm_hour() -> EnsembleHour {
        EnsembleHour {
            timestamp: "2026-08-06T09:00:00Z".parse::<DateTime<Utc>>().unwrap(),
            wind_speed: 2.0,
            wind_gusts: 3.0,
            precipitation: 0.0,
            temperature: 15.0,
            wind_spread: 0.0,
            gust_spread: 0.0,
            precip_spread: 0.0,
            temp_spread: 0.0,
            model_count: 3,
        }
    }

    #[test]
    fn test_severity_boundary_exactness() {
        let t = ThresholdProfile::default();
        // Exactly at caution → 0; exactly at cancel → 100.
        assert_eq!(severity_ascending(t.wind_mean_caution, t.wind_mean_caution, t.wind_mean_cancel), 0.0);
        assert_eq!(severity_ascending(t.wind_mean_cancel, t.wind_mean_caution, t.wind_mean_cancel), 100.0);
        assert_eq!(severity_descending(t.temp_min_caution, t.temp_min_caution, t.temp_min_cancel), 0.0);
        assert_eq!(severity_descending(t.temp_min_cancel, t.temp_min_caution, t.temp_min_cancel), 100.0);
    }

    #[test]
    fn test_severity_linear_midpoint() {
        // Halfway between caution 10 and cancel 14 → 50.
        assert_eq!(severity_ascending(12.0, 10.0, 14.0), 50.0);
        // Temperature halfway between caution 1 and cancel -2 → 50.
        assert_eq!(severity_descending(-0.5, 1.0, -2.0), 50.0);
    }

    #[test]
    fn test_severity_clamps_outside_range() {
        assert_eq!(severity_ascending(0.0, 10.0, 14.0), 0.0);
        assert_eq!(severity_ascending(99.0, 10.0, 14.0), 100.0);
        assert_eq!(severity_descending(20.0, 1.0, -2.0), 0.0);
        assert_eq!(severity_descending(-30.0, 1.0, -2.0), 100.0);
    }

    #[test]
    fn test_severity_degenerate_equal_thresholds() {
        // caution == cancel: a step function, no interpolation span.
        assert_eq!(severity_ascending(9.9, 10.0, 10.0), 0.0);
        assert_eq!(severity_ascending(10.0, 10.0, 10.0), 100.0);
    }

    #[test]
    fn test_risk_is_max_of_severities() {
        let t = ThresholdProfile::default();
        let mut hour = calm_hour();
        // Wind halfway (50), gusts mild (0), heavy rain (100): max wins.
        hour.wind_speed = 12.0;
        hour.precipitation = 5.0;
        let scored = score_hour(&hour, &t);
        assert_eq!(scored.risk, 100.0);
    }

    #[test]
    fn test_risk_zero_for_calm_hour() {
        let scored = score_hour(&calm_hour(), &ThresholdProfile::default());
        assert_eq!(scored.risk, 0.0);
    }

    #[test]
    fn test_risk_monotonic_in_wind() {
        let t = ThresholdProfile::default();
        let mut prev = 0.0;
        for i in 0..40 {
            let mut hour = calm_hour();
            hour.wind_speed = i as f64 * 0.5;
            let r = score_hour(&hour, &t).risk;
            assert!(r >= prev, "risk decreased as wind rose: {} -> {}", prev, r);
            prev = r;
        }
    }

    #[test]
    fn test_risk_monotonic_as_temperature_falls() {
        let t = ThresholdProfile::default();
        let mut prev = 0.0;
        for i in 0..40 {
            let mut hour = calm_hour();
            hour.temperature = 10.0 - i as f64 * 0.5;
            let r = score_hour(&hour, &t).risk;
            assert!(r >= prev, "risk decreased as temperature fell");
            prev = r;
        }
    }

    #[test]
    fn test_classification_partition_exact() {
        assert_eq!(Recommendation::classify(0.0), Recommendation::Go);
        assert_eq!(Recommendation::classify(19.999), Recommendation::Go);
        assert_eq!(Recommendation::classify(20.0), Recommendation::Caution);
        assert_eq!(Recommendation::classify(49.999), Recommendation::Caution);
        assert_eq!(Recommendation::classify(50.0), Recommendation::Cancel);
        assert_eq!(Recommendation::classify(100.0), Recommendation::Cancel);
    }

    #[test]
    fn test_recommendation_as_str() {
        assert_eq!(Recommendation::Go.as_str(), "GO");
        assert_eq!(Recommendation::Caution.as_str(), "CAUTION");
        assert_eq!(Recommendation::Cancel.as_str(), "CANCEL");
    }

    #[test]
    fn test_default_profile_values() {
        let t = ThresholdProfile::default();
        assert_eq!(t.wind_mean_caution, 10.0);
        assert_eq!(t.wind_mean_cancel, 14.0);
        assert_eq!(t.gust_caution, 15.0);
        assert_eq!(t.gust_cancel, 20.0);
        assert_eq!(t.precip_caution, 0.7);
        assert_eq!(t.precip_cancel, 2.0);
        assert_eq!(t.temp_min_caution, 1.0);
        assert_eq!(t.temp_min_cancel, -2.0);
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let mut t = ThresholdProfile::default();
        t.gust_cancel = f64::NAN;
        assert!(matches!(t.validate(), Err(AppError::Validation(_))));

        let mut t = ThresholdProfile::default();
        t.precip_caution = f64::INFINITY;
        assert!(t.validate().is_err());

        assert!(ThresholdProfile::default().validate().is_ok());
    }

    #[test]
    fn test_score_hour_deterministic() {
        let t = ThresholdProfile::default();
        let mut hour = calm_hour();
        hour.wind_speed = 11.3;
        hour.temperature = 0.4;
        let a = score_hour(&hour, &t).risk;
        let b = score_hour(&hour, &t).risk;
        assert_eq!(a, b);
    }
}
