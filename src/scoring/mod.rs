//! Cluster-quality scores: distance baselines, Silhouette and Davies-Bouldin.
//!
//! A "mean pairwise distance" here is
//! the mean of the full square distance matrix, zero diagonal included. The
//! inter-cluster figure averages the whole matrix, same-cluster pairs too.

use crate::cluster::{ClusterAssignment, ClusteredDataset};
use crate::common::error::{AnalysisError, Result};

/// One row of the cluster score table.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterScoreReport {
    pub region: String,
    /// In [-1, 1]; higher is better.
    pub silhouette: f64,
    /// >= 0; lower is better.
    pub davies_bouldin: f64,
    pub inter_cluster_distance: f64,
    /// `None` when no cluster has two or more members.
    pub intra_cluster_distance: Option<f64>,
}

fn euclidean<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Sums gathered in one pass over every unordered pair of points.
struct PairwiseSums {
    /// Sum of d(i, j) over i < j.
    total: f64,
    /// `to_cluster[i][c]`: sum of distances from point i to members of cluster c+1.
    to_cluster: Vec<Vec<f64>>,
    /// Sum of d(i, j) over i < j inside each cluster.
    within: Vec<f64>,
    sizes: Vec<usize>,
}

impl PairwiseSums {
    fn compute<const D: usize>(points: &[[f64; D]], assignment: &ClusterAssignment) -> Self {
        let k = assignment.cluster_count();
        let labels = assignment.labels();
        let n = points.len();

        let mut sums = PairwiseSums {
            total: 0.0,
            to_cluster: vec![vec![0.0; k]; n],
            within: vec![0.0; k],
            sizes: vec![0; k],
        };
        for &label in labels {
            sums.sizes[label - 1] += 1;
        }

        for i in 0..n {
            let ci = labels[i] - 1;
            for j in i + 1..n {
                let cj = labels[j] - 1;
                let d = euclidean(&points[i], &points[j]);
                sums.total += d;
                sums.to_cluster[i][cj] += d;
                sums.to_cluster[j][ci] += d;
                if ci == cj {
                    sums.within[ci] += d;
                }
            }
        }
        sums
    }

    fn populated_clusters(&self) -> usize {
        self.sizes.iter().filter(|&&s| s > 0).count()
    }
}

fn check_lengths<const D: usize>(points: &[[f64; D]], assignment: &ClusterAssignment) -> Result<()> {
    if points.len() != assignment.len() {
        return Err(AnalysisError::InvalidParameter(format!(
            "{} feature vectors but {} labels",
            points.len(),
            assignment.len()
        )));
    }
    Ok(())
}

fn require_two_clusters(populated: usize, n: usize) -> Result<()> {
    if populated < 2 {
        return Err(AnalysisError::insufficient(
            2,
            populated,
            &format!("populated clusters among {} rows for quality scoring", n),
        ));
    }
    Ok(())
}

/// Mean of the full n × n distance matrix.
pub fn inter_cluster_distance<const D: usize>(points: &[[f64; D]]) -> f64 {
    let n = points.len();
    if n == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    for i in 0..n {
        for j in i + 1..n {
            total += euclidean(&points[i], &points[j]);
        }
    }
    2.0 * total / (n * n) as f64
}

/// Mean over clusters with two or more members of each cluster's mean distance matrix.
pub fn intra_cluster_distance<const D: usize>(
    points: &[[f64; D]],
    assignment: &ClusterAssignment,
) -> Result<Option<f64>> {
    check_lengths(points, assignment)?;
    Ok(intra_from_sums(&PairwiseSums::compute(points, assignment)))
}

fn intra_from_sums(sums: &PairwiseSums) -> Option<f64> {
    let per_cluster: Vec<f64> = sums
        .within
        .iter()
        .zip(sums.sizes.iter())
        .filter(|(_, &size)| size >= 2)
        .map(|(&within, &size)| 2.0 * within / (size * size) as f64)
        .collect();
    if per_cluster.is_empty() {
        None
    } else {
        Some(per_cluster.iter().sum::<f64>() / per_cluster.len() as f64)
    }
}

/// Mean Silhouette coefficient over all points.
///
/// A point alone in its cluster scores 0, as does a point whose own and
/// nearest-other mean distances are both zero.
pub fn silhouette_score<const D: usize>(
    points: &[[f64; D]],
    assignment: &ClusterAssignment,
) -> Result<f64> {
    check_lengths(points, assignment)?;
    let sums = PairwiseSums::compute(points, assignment);
    require_two_clusters(sums.populated_clusters(), points.len())?;
    Ok(silhouette_from_sums(&sums, assignment))
}

fn silhouette_from_sums(sums: &PairwiseSums, assignment: &ClusterAssignment) -> f64 {
    let labels = assignment.labels();
    let n = labels.len();

    let total: f64 = (0..n)
        .map(|i| {
            let own = labels[i] - 1;
            let own_size = sums.sizes[own];
            if own_size < 2 {
                return 0.0;
            }
            let a = sums.to_cluster[i][own] / (own_size - 1) as f64;
            let b = sums
                .sizes
                .iter()
                .enumerate()
                .filter(|&(c, &size)| c != own && size > 0)
                .map(|(c, &size)| sums.to_cluster[i][c] / size as f64)
                .fold(f64::INFINITY, f64::min);
            let denom = a.max(b);
            if denom > 0.0 && denom.is_finite() {
                ((b - a) / denom).clamp(-1.0, 1.0)
            } else {
                0.0
            }
        })
        .sum();

    total / n as f64
}

/// Davies-Bouldin index: mean over clusters of the worst centroid-separation ratio.
pub fn davies_bouldin_index<const D: usize>(
    points: &[[f64; D]],
    assignment: &ClusterAssignment,
) -> Result<f64> {
    check_lengths(points, assignment)?;
    let k = assignment.cluster_count();
    let labels = assignment.labels();

    let mut centroids = vec![[0.0; D]; k];
    let mut sizes = vec![0usize; k];
    for (point, &label) in points.iter().zip(labels) {
        sizes[label - 1] += 1;
        for (c, v) in centroids[label - 1].iter_mut().zip(point.iter()) {
            *c += v;
        }
    }
    let populated: Vec<usize> = (0..k).filter(|&c| sizes[c] > 0).collect();
    require_two_clusters(populated.len(), points.len())?;
    for &c in &populated {
        for v in centroids[c].iter_mut() {
            *v /= sizes[c] as f64;
        }
    }

    let mut dispersion = vec![0.0; k];
    for (point, &label) in points.iter().zip(labels) {
        dispersion[label - 1] += euclidean(point, &centroids[label - 1]);
    }
    for &c in &populated {
        dispersion[c] /= sizes[c] as f64;
    }

    const EPS: f64 = 1e-12;
    let all_tight = populated.iter().all(|&c| dispersion[c].abs() < EPS);
    let all_coincident = populated.iter().all(|&c| {
        populated
            .iter()
            .all(|&d| euclidean(&centroids[c], &centroids[d]) < EPS)
    });
    if all_tight || all_coincident {
        return Ok(0.0);
    }

    let worst_ratios: f64 = populated
        .iter()
        .map(|&c| {
            populated
                .iter()
                .filter(|&&d| d != c)
                .map(|&d| {
                    let separation = euclidean(&centroids[c], &centroids[d]);
                    if separation > 0.0 {
                        (dispersion[c] + dispersion[d]) / separation
                    } else {
                        0.0
                    }
                })
                .fold(0.0, f64::max)
        })
        .sum();

    Ok(worst_ratios / populated.len() as f64)
}

/// Score one region's clustering.
pub fn score_clusters<const D: usize>(
    region: &str,
    points: &[[f64; D]],
    assignment: &ClusterAssignment,
) -> Result<ClusterScoreReport> {
    check_lengths(points, assignment)?;
    let sums = PairwiseSums::compute(points, assignment);
    require_two_clusters(sums.populated_clusters(), points.len())?;

    let n = points.len();
    let report = ClusterScoreReport {
        region: region.to_string(),
        silhouette: silhouette_from_sums(&sums, assignment),
        davies_bouldin: davies_bouldin_index(points, assignment)?,
        inter_cluster_distance: 2.0 * sums.total / (n * n) as f64,
        intra_cluster_distance: intra_from_sums(&sums),
    };

    log::info!(
        "scoring: {}: silhouette={:.4} davies_bouldin={:.4} inter={:.4} intra={:?}",
        region,
        report.silhouette,
        report.davies_bouldin,
        report.inter_cluster_distance,
        report.intra_cluster_distance
    );
    Ok(report)
}

/// Score a clustered dataset on its five temperature features.
pub fn score_dataset(clustered: &ClusteredDataset) -> Result<ClusterScoreReport> {
    score_clusters(
        clustered.dataset().region(),
        &clustered.dataset().features(),
        clustered.assignment(),
    )
}
