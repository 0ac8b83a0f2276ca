//! Multi-model ensemble combination.
//!
//! Merges N normalized provider series for the same location/window into one
//! weighted-mean hourly series, with a per-hour, per-variable spread (max −
//! min across contributing providers) as the uncertainty indicator.
//!
//! An hour's weighted mean only includes providers that returned data for
//! that hour; a provider absent at an hour shrinks that hour's membership
//! without failing anything. A provider that contributed zero hours overall
//! shrinks the whole window's membership the same way.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::services::provider::{ProviderRegistry, ProviderSeries};

/// One timestamp's combined result across all contributing providers.
#[derive(Debug, Clone)]
pub struct EnsembleHour {
    pub timestamp: DateTime<Utc>,
    /// Weighted-mean values.
    pub wind_speed: f64,
    pub wind_gusts: f64,
    pub precipitation: f64,
    pub temperature: f64,
    /// Inter-model disagreement (max − min) per variable; 0.0 when only one
    /// provider contributed.
    pub wind_spread: f64,
    pub gust_spread: f64,
    pub precip_spread: f64,
    pub temp_spread: f64,
    /// Number of providers that contributed to this hour.
    pub model_count: usize,
}

/// Provider → ensemble weight mapping.
///
/// Unlisted providers weigh 1.0, so the default is an equal-weight mean.
#[derive(Debug, Clone, Default)]
pub struct ProviderWeights {
    weights: HashMap<String, f64>,
}

impl ProviderWeights {
    pub fn from_registry(registry: &ProviderRegistry) -> Self {
        let weights = registry
            .ids()
            .into_iter()
            .map(|id| {
                let w = registry.weight_for(&id);
                (id, w)
            })
            .collect();
        Self { weights }
    }

    pub fn weight(&self, provider_id: &str) -> f64 {
        self.weights.get(provider_id).copied().unwrap_or(1.0)
    }
}

/// Per-hour accumulation of provider contributions.
struct HourContributions<'a> {
    // (provider_id, weight, values) — sorted by provider id before reduction
    // so the result does not depend on input series order.
    entries: Vec<(&'a str, f64, [f64; 4])>,
}

/// Combine provider series into an ensemble covering the union of timestamps
/// present in any input series.
///
/// For each timestamp: weighted mean = Σ(wᵢ·vᵢ) / Σwᵢ over providers present
/// at that timestamp; spread = max − min. Timestamps with zero contributors
/// cannot occur by construction (the union only contains observed hours),
/// but are dropped defensively if a weight sum degenerates to zero.
pub fn combine_series(series: &[ProviderSeries], weights: &ProviderWeights) -> Vec<EnsembleHour> {
    let mut by_hour: BTreeMap<DateTime<Utc>, HourContributions> = BTreeMap::new();

    for s in series {
        let weight = weights.weight(&s.provider_id);
        for hour in &s.hours {
            by_hour
                .entry(hour.timestamp)
                .or_insert_with(|| HourContributions {
                    entries: Vec::new(),
                })
                .entries
                .push((
                    s.provider_id.as_str(),
                    weight,
                    [
                        hour.wind_speed,
                        hour.wind_gusts,
                        hour.precipitation,
                        hour.temperature,
                    ],
                ));
        }
    }

    let mut combined = Vec::with_capacity(by_hour.len());

    for (timestamp, mut contributions) in by_hour {
        contributions.entries.sort_by(|a, b| a.0.cmp(b.0));

        let weight_sum: f64 = contributions.entries.iter().map(|(_, w, _)| w).sum();
        if weight_sum <= 0.0 {
            continue;
        }

        let mut means = [0.0f64; 4];
        let mut mins = [f64::INFINITY; 4];
        let mut maxs = [f64::NEG_INFINITY; 4];

        for (_, weight, values) in &contributions.entries {
            for k in 0..4 {
                means[k] += weight * values[k];
                mins[k] = mins[k].min(values[k]);
                maxs[k] = maxs[k].max(values[k]);
            }
        }
        for mean in &mut means {
            *mean /= weight_sum;
        }

        let model_count = contributions.entries.len();
        let spread = |k: usize| if model_count > 1 { maxs[k] - mins[k] } else { 0.0 };

        combined.push(EnsembleHour {
            timestamp,
            wind_speed: means[0],
            wind_gusts: means[1],
            precipitation: means[2],
            temperature: means[3],
            wind_spread: spread(0),
            gust_spread: spread(1),
            precip_spread: spread(2),
            temp_spread: spread(3),
            model_count,
        });
    }

    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::provider::ProviderHour;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn hour(time: &str, wind: f64, gust: f64, precip: f64, temp: f64) -> ProviderHour {
        ProviderHour {
            timestamp: ts(time),
            wind_speed: wind,
            wind_gusts: gust,
            precipitation: precip,
            temperature: temp,
        }
    }

    fn series(id: &str, hours: Vec<ProviderHour>) -> ProviderSeries {
        ProviderSeries {
            provider_id: id.to_string(),
            hours,
        }
    }

    #[test]
    fn test_single_provider_passes_through_with_zero_spread() {
        let input = vec![series(
            "ecmwf",
            vec![hour("2026-08-06T09:00:00Z", 8.0, 12.0, 0.3, 14.0)],
        )];
        let combined = combine_series(&input, &ProviderWeights::default());

        assert_eq!(combined.len(), 1);
        let h = &combined[0];
        assert_eq!(h.wind_speed, 8.0);
        assert_eq!(h.wind_gusts, 12.0);
        assert_eq!(h.precipitation, 0.3);
        assert_eq!(h.temperature, 14.0);
        assert_eq!(h.wind_spread, 0.0);
        assert_eq!(h.gust_spread, 0.0);
        assert_eq!(h.precip_spread, 0.0);
        assert_eq!(h.temp_spread, 0.0);
        assert_eq!(h.model_count, 1);
    }

    #[test]
    fn test_equal_weight_mean_and_spread() {
        let input = vec![
            series("ecmwf", vec![hour("2026-08-06T09:00:00Z", 6.0, 10.0, 0.0, 10.0)]),
            series("gfs", vec![hour("2026-08-06T09:00:00Z", 10.0, 14.0, 1.0, 6.0)]),
        ];
        let combined = combine_series(&input, &ProviderWeights::default());

        assert_eq!(combined.len(), 1);
        let h = &combined[0];
        assert_eq!(h.wind_speed, 8.0);
        assert_eq!(h.wind_gusts, 12.0);
        assert_eq!(h.precipitation, 0.5);
        assert_eq!(h.temperature, 8.0);
        assert_eq!(h.wind_spread, 4.0);
        assert_eq!(h.gust_spread, 4.0);
        assert_eq!(h.precip_spread, 1.0);
        assert_eq!(h.temp_spread, 4.0);
        assert_eq!(h.model_count, 2);
    }

    #[test]
    fn test_order_independence() {
        let a = series(
            "ecmwf",
            vec![
                hour("2026-08-06T09:00:00Z", 6.3, 10.1, 0.0, 10.4),
                hour("2026-08-06T10:00:00Z", 7.1, 11.0, 0.2, 11.0),
            ],
        );
        let b = series("gfs", vec![hour("2026-08-06T09:00:00Z", 9.9, 14.7, 0.8, 6.6)]);
        let c = series("icon", vec![hour("2026-08-06T10:00:00Z", 5.5, 9.0, 0.0, 12.1)]);

        let weights = ProviderWeights::default();
        let forward = combine_series(&[a.clone(), b.clone(), c.clone()], &weights);
        let reversed = combine_series(&[c, b, a], &weights);

        assert_eq!(forward.len(), reversed.len());
        for (x, y) in forward.iter().zip(reversed.iter()) {
            assert_eq!(x.timestamp, y.timestamp);
            assert_eq!(x.wind_speed, y.wind_speed);
            assert_eq!(x.wind_gusts, y.wind_gusts);
            assert_eq!(x.precipitation, y.precipitation);
            assert_eq!(x.temperature, y.temperature);
            assert_eq!(x.wind_spread, y.wind_spread);
            assert_eq!(x.model_count, y.model_count);
        }
    }

    #[test]
    fn test_union_of_timestamps_with_partial_membership() {
        // ecmwf covers 09–10, gfs only 10; 09 has one contributor, 10 has two.
        let input = vec![
            series(
                "ecmwf",
                vec![
                    hour("2026-08-06T09:00:00Z", 4.0, 6.0, 0.0, 12.0),
                    hour("2026-08-06T10:00:00Z", 6.0, 8.0, 0.0, 12.0),
                ],
            ),
            series("gfs", vec![hour("2026-08-06T10:00:00Z", 10.0, 12.0, 0.4, 8.0)]),
        ];
        let combined = combine_series(&input, &ProviderWeights::default());

        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0].model_count, 1);
        assert_eq!(combined[0].wind_spread, 0.0);
        assert_eq!(combined[1].model_count, 2);
        assert_eq!(combined[1].wind_speed, 8.0);
    }

    #[test]
    fn test_totally_failed_provider_reduces_membership() {
        // An empty series (total provider failure) contributes nothing but
        // does not disturb the rest of the ensemble.
        let input = vec![
            series("ecmwf", vec![hour("2026-08-06T09:00:00Z", 5.0, 7.0, 0.1, 9.0)]),
            series("ukmo", vec![]),
        ];
        let combined = combine_series(&input, &ProviderWeights::default());

        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].model_count, 1);
        assert_eq!(combined[0].wind_speed, 5.0);
    }

    #[test]
    fn test_weighted_mean_respects_weights() {
        let mut weights = ProviderWeights::default();
        weights.weights.insert("ecmwf".to_string(), 3.0);
        weights.weights.insert("gfs".to_string(), 1.0);

        let input = vec![
            series("ecmwf", vec![hour("2026-08-06T09:00:00Z", 4.0, 4.0, 0.0, 4.0)]),
            series("gfs", vec![hour("2026-08-06T09:00:00Z", 8.0, 8.0, 0.0, 8.0)]),
        ];
        let combined = combine_series(&input, &weights);

        // (3·4 + 1·8) / 4 = 5
        assert_eq!(combined[0].wind_speed, 5.0);
        // Spread ignores weights — it measures raw disagreement.
        assert_eq!(combined[0].wind_spread, 4.0);
    }

    #[test]
    fn test_output_sorted_by_timestamp() {
        let input = vec![series(
            "ecmwf",
            vec![
                hour("2026-08-06T12:00:00Z", 1.0, 1.0, 0.0, 10.0),
                hour("2026-08-06T09:00:00Z", 2.0, 2.0, 0.0, 10.0),
            ],
        )];
        let combined = combine_series(&input, &ProviderWeights::default());
        assert_eq!(combined[0].timestamp, ts("2026-08-06T09:00:00Z"));
        assert_eq!(combined[1].timestamp, ts("2026-08-06T12:00:00Z"));
    }
}
