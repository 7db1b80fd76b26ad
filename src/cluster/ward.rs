//! Ward agglomerative clustering.
//!
//! Distances between clusters are kept as squared Ward distances in a
//! condensed upper-triangular matrix and updated with the Lance-Williams
//! recurrence. Every slot caches its nearest active neighbour among the
//! higher-indexed slots, so a merge step only rescans the slots whose cached
//! neighbour was touched.

use crate::common::error::{AnalysisError, Result};

use super::ClusterAssignment;

/// One agglomeration step, in SciPy linkage-matrix convention.
///
/// Leaves are numbered `0..n`; the cluster created at step `s` is `n + s`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    /// Ward distance between the two merged clusters.
    pub height: f64,
    /// Number of leaves under the new cluster.
    pub size: usize,
}

/// Complete merge history of a Ward clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct Dendrogram {
    leaves: usize,
    merges: Vec<Merge>,
}

impl Dendrogram {
    pub fn leaves(&self) -> usize {
        self.leaves
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Cut the tree into exactly `k` flat clusters (maxclust criterion).
    ///
    /// Ward heights never decrease, so keeping the first `n - k` merges is the
    /// same as picking the threshold that leaves `k` groups. Labels `1..=k` are
    /// handed out in order of first appearance in row order.
    pub fn cut(&self, k: usize) -> Result<ClusterAssignment> {
        let n = self.leaves;
        if k == 0 {
            return Err(AnalysisError::InvalidParameter(
                "cluster count must be at least 1".to_string(),
            ));
        }
        if n < k {
            return Err(AnalysisError::insufficient(k, n, "rows to form the requested clusters"));
        }

        let mut sets = DisjointSet::new(n);
        let mut representative: Vec<usize> = (0..n).collect();
        for merge in &self.merges[..n - k] {
            let a = representative[merge.left];
            let b = representative[merge.right];
            sets.union(a, b);
            representative.push(a);
        }

        let mut label_of_root = vec![0usize; n];
        let mut next_label = 0;
        let mut labels = Vec::with_capacity(n);
        for leaf in 0..n {
            let root = sets.find(leaf);
            if label_of_root[root] == 0 {
                next_label += 1;
                label_of_root[root] = next_label;
            }
            labels.push(label_of_root[root]);
        }

        ClusterAssignment::new(labels, k)
    }
}

/// Build the full Ward dendrogram of `points`.
///
/// Ties between equally close pairs go to the lowest `(i, j)` slot pair, and
/// the merged cluster keeps the lower slot, so identical input produces an
/// identical tree.
pub fn linkage<const D: usize>(points: &[[f64; D]]) -> Result<Dendrogram> {
    let n = points.len();
    if points.iter().flatten().any(|v| !v.is_finite()) {
        return Err(AnalysisError::InvalidParameter(
            "feature vectors must be finite".to_string(),
        ));
    }

    let mut dist = CondensedMatrix::squared_euclidean(points);
    let mut active = vec![true; n];
    let mut size = vec![1usize; n];
    let mut node = (0..n).collect::<Vec<usize>>();
    let mut nearest = vec![NONE; n];
    let mut nearest_dist = vec![f64::INFINITY; n];
    for i in 0..n {
        refresh_nearest(i, &dist, &active, &mut nearest, &mut nearest_dist);
    }

    let mut merges = Vec::with_capacity(n.saturating_sub(1));
    for step in 0..n.saturating_sub(1) {
        let mut i = NONE;
        for slot in 0..n {
            if active[slot]
                && nearest[slot] != NONE
                && (i == NONE || nearest_dist[slot] < nearest_dist[i])
            {
                i = slot;
            }
        }
        let j = nearest[i];
        let d_ij = dist.get(i, j);
        let (n_i, n_j) = (size[i] as f64, size[j] as f64);

        for k in (0..n).filter(|&k| active[k] && k != i && k != j) {
            let n_k = size[k] as f64;
            let updated = ((n_i + n_k) * dist.get(i, k) + (n_j + n_k) * dist.get(j, k)
                - n_k * d_ij)
                / (n_i + n_j + n_k);
            dist.set(i, k, updated.max(0.0));
        }

        merges.push(Merge {
            left: node[i].min(node[j]),
            right: node[i].max(node[j]),
            height: d_ij.sqrt(),
            size: size[i] + size[j],
        });
        active[j] = false;
        size[i] += size[j];
        node[i] = n + step;

        for k in 0..i {
            if !active[k] {
                continue;
            }
            if nearest[k] == i || nearest[k] == j {
                refresh_nearest(k, &dist, &active, &mut nearest, &mut nearest_dist);
            } else {
                let d = dist.get(k, i);
                if d < nearest_dist[k] || (d == nearest_dist[k] && i < nearest[k]) {
                    nearest[k] = i;
                    nearest_dist[k] = d;
                }
            }
        }
        for k in i + 1..j {
            if active[k] && nearest[k] == j {
                refresh_nearest(k, &dist, &active, &mut nearest, &mut nearest_dist);
            }
        }
        refresh_nearest(i, &dist, &active, &mut nearest, &mut nearest_dist);
    }

    log::debug!("cluster: built ward dendrogram over {} points", n);
    Ok(Dendrogram { leaves: n, merges })
}

const NONE: usize = usize::MAX;

/// Recompute the nearest active higher-indexed neighbour of slot `i`.
fn refresh_nearest(
    i: usize,
    dist: &CondensedMatrix,
    active: &[bool],
    nearest: &mut [usize],
    nearest_dist: &mut [f64],
) {
    nearest[i] = NONE;
    nearest_dist[i] = f64::INFINITY;
    for j in i + 1..active.len() {
        if active[j] {
            let d = dist.get(i, j);
            if nearest[i] == NONE || d < nearest_dist[i] {
                nearest[i] = j;
                nearest_dist[i] = d;
            }
        }
    }
}

/// Symmetric matrix with an implicit zero diagonal, stored as its upper triangle.
struct CondensedMatrix {
    n: usize,
    values: Vec<f64>,
}

impl CondensedMatrix {
    fn squared_euclidean<const D: usize>(points: &[[f64; D]]) -> Self {
        let n = points.len();
        let mut values = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in i + 1..n {
                values.push(
                    points[i]
                        .iter()
                        .zip(points[j].iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum(),
                );
            }
        }
        CondensedMatrix { n, values }
    }

    fn index(&self, i: usize, j: usize) -> usize {
        let (a, b) = if i < j { (i, j) } else { (j, i) };
        a * self.n - a * (a + 1) / 2 + (b - a - 1)
    }

    fn get(&self, i: usize, j: usize) -> f64 {
        self.values[self.index(i, j)]
    }

    fn set(&mut self, i: usize, j: usize, value: f64) {
        let idx = self.index(i, j);
        self.values[idx] = value;
    }
}

struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        DisjointSet {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}
