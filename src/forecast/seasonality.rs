use augurs_seasons::PeriodogramDetector;

/// Fewest monthly values worth scanning for a seasonal cycle.
pub const MIN_PERIOD_SCAN_POINTS: usize = 24;

/// Periods below this share of the peak spectral power are ignored.
const POWER_FLOOR: f64 = 0.01;

/// Spectral candidates confirmed by autocorrelation.
const MAX_CANDIDATES: usize = 20;

/// Autocorrelation a candidate needs to count as a cycle.
const MIN_STRENGTH: f64 = 0.1;

/// A shorter period this close to the best strength wins over its multiples.
const HARMONIC_TOLERANCE: f64 = 0.05;

/// The dominant cycle found in a monthly series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeasonalPeriod {
    /// Cycle length in months.
    pub period: u32,
    /// Autocorrelation at `period`, clamped to `0.0..=1.0`.
    pub strength: f64,
}

/// Find the strongest seasonal cycle in `values`.
///
/// Candidates come from the periodogram, in order of spectral power, and are
/// ranked by autocorrelation at their own lag. Returns `None` for short or flat
/// series and when nothing clears the strength floor.
pub fn dominant_period(values: &[f64]) -> Option<SeasonalPeriod> {
    let n = values.len();
    if n < MIN_PERIOD_SCAN_POINTS {
        return None;
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    if variance < 1e-10 {
        return None;
    }

    let periodogram = PeriodogramDetector::builder()
        .min_period(2)
        .max_period((n / 2) as u32)
        .build()
        .periodogram(values);

    let peak = periodogram
        .powers
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    if !peak.is_finite() || peak <= 0.0 {
        return None;
    }

    let mut candidates: Vec<(u32, f64)> = periodogram
        .periods
        .iter()
        .zip(periodogram.powers.iter())
        .filter(|(_, &power)| power > peak * POWER_FLOOR)
        .map(|(&period, &power)| (period, power))
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    candidates.truncate(MAX_CANDIDATES);

    let periods: Vec<u32> = candidates.into_iter().map(|(period, _)| period).collect();
    strongest_candidate(values, &periods, mean, variance)
}

/// The candidate with the highest autocorrelation. Multiples of a cycle score
/// about as well as the cycle itself, so the shortest period within
/// `HARMONIC_TOLERANCE` of the best is taken.
fn strongest_candidate(
    values: &[f64],
    periods: &[u32],
    mean: f64,
    variance: f64,
) -> Option<SeasonalPeriod> {
    let scored: Vec<SeasonalPeriod> = periods
        .iter()
        .map(|&period| SeasonalPeriod {
            period,
            strength: autocorrelation(values, period as usize, mean, variance),
        })
        .filter(|candidate| candidate.strength > MIN_STRENGTH)
        .collect();

    let best = scored
        .iter()
        .map(|c| c.strength)
        .fold(f64::NEG_INFINITY, f64::max);
    scored
        .into_iter()
        .filter(|c| c.strength >= best - HARMONIC_TOLERANCE)
        .min_by_key(|c| c.period)
        .map(|chosen| SeasonalPeriod {
            strength: chosen.strength.clamp(0.0, 1.0),
            ..chosen
        })
}

fn autocorrelation(values: &[f64], lag: usize, mean: f64, variance: f64) -> f64 {
    if lag == 0 || lag >= values.len() {
        return 0.0;
    }
    let pairs = (values.len() - lag) as f64;
    values[..values.len() - lag]
        .iter()
        .zip(values[lag..].iter())
        .map(|(a, b)| (a - mean) * (b - mean))
        .sum::<f64>()
        / pairs
        / variance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monthly_cycle(years: usize) -> Vec<f64> {
        (0..years * 12)
            .map(|i| 18.0 + 9.0 * (2.0 * std::f64::consts::PI * i as f64 / 12.0).sin())
            .collect()
    }

    #[test]
    fn test_annual_cycle_found() {
        let found = dominant_period(&monthly_cycle(10)).unwrap();
        assert_eq!(found.period, 12);
        assert!(found.strength > 0.8, "strength {}", found.strength);
    }

    #[test]
    fn test_highest_autocorrelation_beats_spectral_order() {
        let values = monthly_cycle(10);
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        // Period 10 comes first but correlates far less than 12.
        let found = strongest_candidate(&values, &[10, 24, 12], mean, variance).unwrap();
        assert_eq!(found.period, 12);
        assert!(found.strength > 0.95, "strength {}", found.strength);
    }

    #[test]
    fn test_noisy_annual_cycle_found() {
        let values: Vec<f64> = (0..96)
            .map(|i| {
                let jitter = ((i * 7919) % 97) as f64 / 97.0 - 0.5;
                18.0 + 9.0 * (2.0 * std::f64::consts::PI * i as f64 / 12.0).cos() + jitter
            })
            .collect();
        assert_eq!(dominant_period(&values).map(|s| s.period), Some(12));
    }

    #[test]
    fn test_flat_series_has_no_period() {
        assert_eq!(dominant_period(&vec![21.5; 60]), None);
    }

    #[test]
    fn test_short_series_skipped() {
        assert_eq!(dominant_period(&monthly_cycle(1)), None);
    }

    #[test]
    fn test_autocorrelation_of_alternating_series() {
        let values: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!((autocorrelation(&values, 2, 0.0, 1.0) - 1.0).abs() < 1e-12);
        assert!((autocorrelation(&values, 1, 0.0, 1.0) + 1.0).abs() < 1e-12);
    }
}
