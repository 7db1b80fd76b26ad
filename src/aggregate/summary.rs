use std::collections::{BTreeMap, BTreeSet};

use crate::cluster::ClusterAssignment;
use crate::common::error::{AnalysisError, Result};
use crate::common::types::{RegionDataset, TemperatureField};

/// Number of rows carrying each label, as `(label, count)` in label order.
///
/// Labels with no rows are reported with a count of zero.
pub fn cluster_distribution(assignment: &ClusterAssignment) -> Vec<(usize, usize)> {
    let mut counts = vec![0usize; assignment.cluster_count()];
    for &label in assignment.labels() {
        counts[label - 1] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| (i + 1, count))
        .collect()
}

/// Mean temperature per (month, year) cell.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyHeatmap {
    pub field: TemperatureField,
    /// Column keys, ascending.
    pub years: Vec<i32>,
    /// `cells[month - 1][year_index]`; `None` where no row fell in the cell.
    pub cells: Vec<Vec<Option<f64>>>,
}

impl MonthlyHeatmap {
    pub fn get(&self, month: u32, year: i32) -> Option<f64> {
        let col = self.years.binary_search(&year).ok()?;
        self.cells.get(month.checked_sub(1)? as usize)?.get(col).copied().flatten()
    }
}

/// Pivot `field` into a 12 × years grid of monthly means.
pub fn monthly_heatmap(dataset: &RegionDataset, field: TemperatureField) -> Result<MonthlyHeatmap> {
    let mut sums: BTreeMap<(u32, i32), (f64, usize)> = BTreeMap::new();
    let mut years = BTreeSet::new();

    for obs in dataset.observations() {
        let month = obs.date.month.ok_or_else(|| {
            AnalysisError::AggregationPolicy(format!(
                "region {} has rows without a MONTH; the heatmap needs monthly resolution",
                dataset.region()
            ))
        })?;
        let cell = sums.entry((month, obs.date.year)).or_insert((0.0, 0));
        cell.0 += obs.field(field);
        cell.1 += 1;
        years.insert(obs.date.year);
    }

    let years: Vec<i32> = years.into_iter().collect();
    let cells = (1..=12u32)
        .map(|month| {
            years
                .iter()
                .map(|&year| sums.get(&(month, year)).map(|(sum, n)| sum / *n as f64))
                .collect()
        })
        .collect();

    Ok(MonthlyHeatmap {
        field,
        years,
        cells,
    })
}
