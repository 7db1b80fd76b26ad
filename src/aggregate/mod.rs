//! Year filtering, calendar aggregation and trailing smoothing.
//!
//! Every operation returns a new dataset; inputs are never modified.

pub mod summary;

use std::collections::BTreeMap;

use crate::common::error::{AnalysisError, Result};
use crate::common::types::{
    Granularity, Observation, ObservationDate, RegionDataset, TemperatureField,
};

/// Columns the dashboard smooths before plotting and forecasting.
pub const SMOOTHED_FIELDS: [TemperatureField; 3] = [
    TemperatureField::Average,
    TemperatureField::Max,
    TemperatureField::Min,
];

/// Keep rows whose year lies in `[min_year, max_year]`.
pub fn filter_by_year_range(
    dataset: &RegionDataset,
    min_year: i32,
    max_year: i32,
) -> Result<RegionDataset> {
    let rows: Vec<Observation> = dataset
        .observations()
        .iter()
        .filter(|o| o.date.year >= min_year && o.date.year <= max_year)
        .cloned()
        .collect();

    if rows.is_empty() {
        return Err(AnalysisError::EmptyResult(format!(
            "region {} has no rows between {} and {}",
            dataset.region(),
            min_year,
            max_year
        )));
    }

    log::debug!(
        "aggregate: {}: kept {} of {} rows in {}..={}",
        dataset.region(),
        rows.len(),
        dataset.len(),
        min_year,
        max_year
    );
    Ok(dataset.derived(dataset.granularity(), rows))
}

/// Collapse rows into one mean row per year or per (year, month).
///
/// `Granularity::Raw` returns the input unchanged. Output rows are sorted by
/// their calendar key and carry no station id.
pub fn aggregate(dataset: &RegionDataset, granularity: Granularity) -> Result<RegionDataset> {
    match (granularity, dataset.granularity()) {
        (Granularity::Raw, _) => return Ok(dataset.clone()),
        (Granularity::Month, Granularity::Year) => {
            return Err(AnalysisError::AggregationPolicy(format!(
                "region {} is already aggregated by year and cannot be split into months",
                dataset.region()
            )))
        }
        _ => {}
    }

    let mut groups: BTreeMap<(i32, Option<u32>), Accumulator> = BTreeMap::new();
    for obs in dataset.observations() {
        let month = match granularity {
            Granularity::Month => Some(obs.date.month.ok_or_else(|| {
                AnalysisError::AggregationPolicy(format!(
                    "region {} has rows without a MONTH; monthly aggregation needs one",
                    dataset.region()
                ))
            })?),
            _ => None,
        };
        groups
            .entry((obs.date.year, month))
            .or_default()
            .add(obs);
    }

    let rows = groups
        .into_iter()
        .map(|((year, month), acc)| acc.mean_row(dataset.region(), year, month))
        .collect::<Vec<_>>();

    log::debug!(
        "aggregate: {}: {} rows -> {} {} groups",
        dataset.region(),
        dataset.len(),
        rows.len(),
        granularity
    );
    Ok(dataset.derived(granularity, rows))
}

/// Running sums for one calendar group.
#[derive(Default)]
struct Accumulator {
    count: usize,
    sums: [f64; 5],
}

impl Accumulator {
    fn add(&mut self, obs: &Observation) {
        self.count += 1;
        for (sum, value) in self.sums.iter_mut().zip(obs.features()) {
            *sum += value;
        }
    }

    fn mean_row(&self, region: &str, year: i32, month: Option<u32>) -> Observation {
        let n = self.count as f64;
        Observation {
            station_id: None,
            region: region.to_string(),
            date: ObservationDate {
                year,
                month,
                day: None,
            },
            average: self.sums[0] / n,
            max: self.sums[1] / n,
            min: self.sums[2] / n,
            std: self.sums[3] / n,
            median: self.sums[4] / n,
        }
    }
}

/// Trailing moving average.
///
/// Point `i` averages `series[i + 1 - window ..= i]`, truncated at the start of
/// the series, so early points use the history that exists.
pub fn smooth(series: &[f64], window: usize) -> Result<Vec<f64>> {
    if window == 0 {
        return Err(AnalysisError::InvalidParameter(
            "smoothing window must be at least 1".to_string(),
        ));
    }
    if window == 1 {
        return Ok(series.to_vec());
    }

    let mut out = Vec::with_capacity(series.len());
    let mut running = 0.0;
    for (i, &value) in series.iter().enumerate() {
        running += value;
        if i >= window {
            running -= series[i - window];
        }
        let span = (i + 1).min(window);
        out.push(running / span as f64);
    }
    Ok(out)
}

/// Smooth the AVERAGE, MAX and MIN columns of a dataset in row order.
pub fn smooth_dataset(dataset: &RegionDataset, window: usize) -> Result<RegionDataset> {
    let mut rows = dataset.observations().to_vec();
    for field in SMOOTHED_FIELDS {
        let smoothed = smooth(&dataset.series(field), window)?;
        rows = rows
            .into_iter()
            .zip(smoothed)
            .map(|(obs, value)| obs.with_field(field, value))
            .collect();
    }
    Ok(dataset.derived(dataset.granularity(), rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn obs(year: i32, month: Option<u32>, day: Option<u32>, average: f64) -> Observation {
        Observation {
            station_id: Some("601000".to_string()),
            region: "ARID".to_string(),
            date: ObservationDate { year, month, day },
            average,
            max: average + 10.0,
            min: average - 10.0,
            std: 2.0,
            median: average,
        }
    }

    fn yearly_span(from: i32, to: i32) -> RegionDataset {
        let rows = (from..=to).map(|y| obs(y, None, None, y as f64 / 100.0)).collect();
        RegionDataset::from_observations("ARID", rows).unwrap()
    }

    // ==================== filter tests ====================

    #[test]
    fn test_filter_keeps_only_requested_years() {
        let ds = yearly_span(1950, 2020);
        let filtered = filter_by_year_range(&ds, 1980, 1990).unwrap();
        assert_eq!(filtered.len(), 11);
        assert!(filtered
            .observations()
            .iter()
            .all(|o| (1980..=1990).contains(&o.date.year)));
    }

    #[test]
    fn test_filter_outside_data_is_empty_result() {
        let ds = yearly_span(1950, 2020);
        let err = filter_by_year_range(&ds, 2100, 2105).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptyResult(_)), "got {:?}", err);
    }

    #[test]
    fn test_filter_inverted_range_is_empty_result() {
        let ds = yearly_span(1950, 2020);
        assert!(matches!(
            filter_by_year_range(&ds, 1990, 1980),
            Err(AnalysisError::EmptyResult(_))
        ));
    }

    // ==================== aggregation tests ====================

    #[test]
    fn test_raw_aggregation_is_identity() {
        let ds = yearly_span(2000, 2003);
        assert_eq!(aggregate(&ds, Granularity::Raw).unwrap(), ds);
    }

    #[test]
    fn test_year_aggregation_one_row_per_distinct_year() {
        let rows = vec![
            obs(2001, Some(1), Some(1), 10.0),
            obs(1999, Some(6), Some(2), 20.0),
            obs(2001, Some(7), Some(3), 30.0),
            obs(1999, Some(6), Some(4), 40.0),
            obs(2000, Some(2), Some(5), 50.0),
        ];
        let distinct: BTreeSet<i32> = rows.iter().map(|o| o.date.year).collect();
        let ds = RegionDataset::from_observations("ARID", rows).unwrap();

        let yearly = aggregate(&ds, Granularity::Year).unwrap();
        assert_eq!(yearly.len(), distinct.len());
        assert_eq!(yearly.granularity(), Granularity::Year);

        let years: Vec<i32> = yearly.observations().iter().map(|o| o.date.year).collect();
        assert_eq!(years, vec![1999, 2000, 2001], "output must be sorted by year");
        assert!((yearly.observations()[0].average - 30.0).abs() < 1e-12);
        assert!((yearly.observations()[2].max - 30.0).abs() < 1e-12);
        assert!(yearly.observations().iter().all(|o| o.station_id.is_none()));
    }

    #[test]
    fn test_month_aggregation_groups_by_year_and_month() {
        let rows = vec![
            obs(2000, Some(2), Some(1), 4.0),
            obs(2000, Some(1), Some(1), 1.0),
            obs(2000, Some(1), Some(2), 3.0),
            obs(1999, Some(12), Some(31), 7.0),
        ];
        let ds = RegionDataset::from_observations("ARID", rows).unwrap();
        let monthly = aggregate(&ds, Granularity::Month).unwrap();

        let keys: Vec<(i32, Option<u32>)> = monthly
            .observations()
            .iter()
            .map(|o| (o.date.year, o.date.month))
            .collect();
        assert_eq!(keys, vec![(1999, Some(12)), (2000, Some(1)), (2000, Some(2))]);
        assert!((monthly.observations()[1].average - 2.0).abs() < 1e-12);
        assert!(monthly.observations().iter().all(|o| o.date.day.is_none()));
    }

    #[test]
    fn test_month_aggregation_needs_month_column() {
        let ds = yearly_span(2000, 2002);
        let err = aggregate(&ds, Granularity::Month).unwrap_err();
        assert!(matches!(err, AnalysisError::AggregationPolicy(_)), "got {:?}", err);
    }

    #[test]
    fn test_year_rows_cannot_become_monthly() {
        let rows = vec![obs(2000, Some(1), Some(1), 1.0)];
        let ds = RegionDataset::from_observations("ARID", rows).unwrap();
        let yearly = aggregate(&ds, Granularity::Year).unwrap();
        assert!(matches!(
            aggregate(&yearly, Granularity::Month),
            Err(AnalysisError::AggregationPolicy(_))
        ));
    }

    // ==================== smoothing tests ====================

    #[test]
    fn test_smooth_window_one_is_identity() {
        let series = vec![3.5, -1.0, 7.25, 0.0, 12.0];
        assert_eq!(smooth(&series, 1).unwrap(), series);
    }

    #[test]
    fn test_smooth_uses_partial_windows_at_start() {
        let series = vec![2.0, 4.0, 6.0, 8.0, 10.0];
        let smoothed = smooth(&series, 3).unwrap();
        let expected = [2.0, 3.0, 4.0, 6.0, 8.0];
        for (got, want) in smoothed.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-12, "got {:?}", smoothed);
        }
    }

    #[test]
    fn test_smooth_window_longer_than_series() {
        let smoothed = smooth(&[1.0, 2.0, 3.0], 365).unwrap();
        assert!((smoothed[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_smooth_zero_window_rejected() {
        assert!(smooth(&[1.0], 0).is_err());
    }

    #[test]
    fn test_smooth_dataset_leaves_std_and_median() {
        let rows = vec![
            obs(2000, None, None, 10.0),
            obs(2001, None, None, 20.0),
        ];
        let ds = RegionDataset::from_observations("ARID", rows).unwrap();
        let smoothed = smooth_dataset(&ds, 2).unwrap();
        let second = &smoothed.observations()[1];
        assert!((second.average - 15.0).abs() < 1e-12);
        assert!((second.max - 25.0).abs() < 1e-12);
        assert!((second.min - 5.0).abs() < 1e-12);
        assert!((second.median - 20.0).abs() < 1e-12, "median is not smoothed");
    }
}
