//! Shared numeric hygiene helpers.
//!
//! Provider payloads can contain nulls, NaN, or ±Inf; those must never reach
//! the combiner or the database. `sanitize` substitutes a neutral default per
//! variable:
//!
//! - wind / gust / precipitation: 0.0
//! - temperature: [`NEUTRAL_TEMP_C`] (10.0 °C)
//!
//! Stored values are rounded to 2 decimal places via `round2` so identical
//! forecasts compare equal across runs.

/// Neutral substitute for a missing or non-finite temperature (°C).
pub(crate) const NEUTRAL_TEMP_C: f64 = 10.0;

/// Replace a missing or non-finite value with a neutral default.
pub(crate) fn sanitize(v: Option<f64>, neutral: f64) -> f64 {
    match v {
        Some(x) if x.is_finite() => x,
        Some(x) => {
            tracing::warn!("sanitize received non-finite value {}, using {}", x, neutral);
            neutral
        }
        None => neutral,
    }
}

/// Round to 2 decimal places for storage.
pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_passes_finite() {
        assert_eq!(sanitize(Some(3.7), 0.0), 3.7);
    }

    #[test]
    fn test_sanitize_none() {
        assert_eq!(sanitize(None, 0.0), 0.0);
        assert_eq!(sanitize(None, NEUTRAL_TEMP_C), 10.0);
    }

    #[test]
    fn test_sanitize_nan() {
        assert_eq!(sanitize(Some(f64::NAN), NEUTRAL_TEMP_C), 10.0);
    }

    #[test]
    fn test_sanitize_infinity() {
        assert_eq!(sanitize(Some(f64::INFINITY), 0.0), 0.0);
        assert_eq!(sanitize(Some(f64::NEG_INFINITY), 0.0), 0.0);
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(3.14159), 3.14);
        assert_eq!(round2(3.146), 3.15);
    }

    #[test]
    fn test_round2_exact() {
        assert_eq!(round2(5.0), 5.0);
    }
}
