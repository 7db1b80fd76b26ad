pub mod ward;

use crate::common::error::{AnalysisError, Result};
use crate::common::types::RegionDataset;

pub use ward::{linkage, Dendrogram, Merge};

/// Flat cluster label for every row of a dataset.
///
/// Labels are 1-based and lie in `1..=cluster_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    labels: Vec<usize>,
    cluster_count: usize,
}

impl ClusterAssignment {
    pub fn new(labels: Vec<usize>, cluster_count: usize) -> Result<Self> {
        if let Some(bad) = labels.iter().find(|&&l| l == 0 || l > cluster_count) {
            return Err(AnalysisError::InvalidParameter(format!(
                "cluster label {} outside 1..={}",
                bad, cluster_count
            )));
        }
        Ok(ClusterAssignment {
            labels,
            cluster_count,
        })
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Row indices carrying `label`, in row order.
    pub fn members(&self, label: usize) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == label)
            .map(|(i, _)| i)
            .collect()
    }
}

/// A dataset together with the assignment computed for its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteredDataset {
    dataset: RegionDataset,
    assignment: ClusterAssignment,
}

impl ClusteredDataset {
    pub fn new(dataset: RegionDataset, assignment: ClusterAssignment) -> Result<Self> {
        if dataset.len() != assignment.len() {
            return Err(AnalysisError::InvalidParameter(format!(
                "{} labels for {} rows in region {}",
                assignment.len(),
                dataset.len(),
                dataset.region()
            )));
        }
        Ok(ClusteredDataset {
            dataset,
            assignment,
        })
    }

    pub fn dataset(&self) -> &RegionDataset {
        &self.dataset
    }

    pub fn assignment(&self) -> &ClusterAssignment {
        &self.assignment
    }
}

/// Ward-cluster feature vectors into exactly `k` groups.
pub fn cluster_features<const D: usize>(points: &[[f64; D]], k: usize) -> Result<ClusterAssignment> {
    if points.len() < k {
        return Err(AnalysisError::insufficient(
            k,
            points.len(),
            "rows to form the requested clusters",
        ));
    }
    linkage(points)?.cut(k)
}

/// Cluster the rows of a region on their five temperature features.
pub fn cluster_dataset(dataset: &RegionDataset, k: usize) -> Result<ClusteredDataset> {
    let assignment = cluster_features(&dataset.features(), k)?;
    log::info!(
        "cluster: {}: {} rows into {} clusters",
        dataset.region(),
        dataset.len(),
        k
    );
    ClusteredDataset::new(dataset.clone(), assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Observation, ObservationDate};

    fn row(year: i32, base: f64) -> Observation {
        Observation {
            station_id: Some("600330".to_string()),
            region: "HYPER_ARID".to_string(),
            date: ObservationDate::year(year),
            average: base,
            max: base + 12.0,
            min: base - 9.0,
            std: 3.0,
            median: base + 0.5,
        }
    }

    #[test]
    fn test_two_distinct_groups_get_two_labels() {
        let rows = vec![
            row(1990, 10.0),
            row(1991, 30.0),
            row(1992, 10.5),
            row(1993, 30.4),
            row(1994, 9.8),
            row(1995, 29.9),
        ];
        let ds = RegionDataset::from_observations("HYPER_ARID", rows).unwrap();
        let clustered = cluster_dataset(&ds, 2).unwrap();
        let labels = clustered.assignment().labels();

        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[0], labels[4]);
        assert_eq!(labels[1], labels[3]);
        assert_eq!(labels[1], labels[5]);
        assert_ne!(labels[0], labels[1]);
        assert_eq!(labels[0], 1, "first row defines label 1");
    }

    #[test]
    fn test_clustering_is_deterministic() {
        let rows: Vec<Observation> = (0..30)
            .map(|i| row(1950 + i, ((i * 7) % 11) as f64))
            .collect();
        let ds = RegionDataset::from_observations("HYPER_ARID", rows).unwrap();
        let first = cluster_dataset(&ds, 2).unwrap();
        let second = cluster_dataset(&ds, 2).unwrap();
        assert_eq!(first.assignment(), second.assignment());
    }

    #[test]
    fn test_fewer_rows_than_clusters() {
        let ds = RegionDataset::from_observations("HYPER_ARID", vec![row(2000, 1.0)]).unwrap();
        let err = cluster_dataset(&ds, 2).unwrap_err();
        assert!(
            matches!(err, AnalysisError::InsufficientData { .. }),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_assignment_rejects_out_of_range_labels() {
        assert!(ClusterAssignment::new(vec![1, 3], 2).is_err());
        assert!(ClusterAssignment::new(vec![0, 1], 2).is_err());
        let ok = ClusterAssignment::new(vec![2, 1, 2], 2).unwrap();
        assert_eq!(ok.members(2), vec![0, 2]);
    }
}
