//! Clustering quality metrics.
//!
//! Internal measures score a partition from the data alone; [`ari`] compares a
//! partition against reference labels.
//!
//! # Metrics Overview
//!
//! | Metric | Range | Best | Notes |
//! |--------|-------|------|-------|
//! | [`inertia`] | [0, ∞) | 0 | Centroid methods only |
//! | [`silhouette`] | [-1, 1] | 1 | O(n²) pairwise distances |
//! | [`calinski_harabasz`] | [0, ∞) | ∞ | Between / within dispersion ratio |
//! | [`ari`] | [-1, 1] | 1 | Needs reference labels |
//!
//! Silhouette and Calinski-Harabasz are only defined when
//! `2 <= n_clusters < n_samples`; outside that range both return 0.0.
//! Calinski-Harabasz also returns 0.0 when every cluster collapses onto its
//! centroid, where the ratio is unbounded.
//!
//! # References
//!
//! - Rousseeuw (1987). "Silhouettes: a graphical aid to the interpretation
//!   and validation of cluster analysis"
//! - Caliński & Harabasz (1974). "A dendrite method for cluster analysis"
//! - Hubert & Arabie (1985). "Comparing partitions" (ARI)

use std::collections::{BTreeMap, HashMap};

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::cluster::SegmentLabel;

/// Quality scores of one segmentation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Strategy that produced the run.
    pub algorithm: String,
    /// Rows clustered.
    pub n_samples: usize,
    /// Distinct segments in the final labels.
    pub n_clusters: usize,
    /// Points flagged as outliers before reassignment (density methods).
    pub n_outliers: usize,
    /// Within-cluster sum of squares (centroid methods).
    pub inertia: Option<f64>,
    /// Mean silhouette coefficient.
    pub silhouette: f64,
    /// Calinski-Harabasz index.
    pub calinski_harabasz: f64,
}

impl EvaluationMetrics {
    /// Score labels over `data` with the guarded internal metrics.
    pub fn score(algorithm: &str, data: &Array2<f64>, labels: &[SegmentLabel]) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            n_samples: labels.len(),
            n_clusters: n_clusters(labels),
            n_outliers: 0,
            inertia: None,
            silhouette: silhouette(data, labels),
            calinski_harabasz: calinski_harabasz(data, labels),
        }
    }
}

/// Euclidean distance.
#[inline]
pub fn euclidean(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    squared_euclidean(a, b).sqrt()
}

/// Squared Euclidean distance.
#[inline]
pub fn squared_euclidean(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Number of distinct non-negative labels.
pub fn n_clusters(labels: &[SegmentLabel]) -> usize {
    let mut seen: Vec<SegmentLabel> = labels.iter().copied().filter(|l| *l >= 0).collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}

/// Mean of the rows carrying each label.
pub fn label_means(data: &Array2<f64>, labels: &[SegmentLabel]) -> BTreeMap<SegmentLabel, Array1<f64>> {
    let mut sums: BTreeMap<SegmentLabel, (Array1<f64>, usize)> = BTreeMap::new();
    for (row, &label) in data.rows().into_iter().zip(labels) {
        if label < 0 {
            continue;
        }
        let entry = sums
            .entry(label)
            .or_insert_with(|| (Array1::zeros(data.ncols()), 0));
        entry.0 += &row;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(l, (sum, count))| (l, sum / count as f64))
        .collect()
}

/// Within-cluster sum of squared distances to the given centroids.
pub fn inertia(data: &Array2<f64>, labels: &[SegmentLabel], centroids: &Array2<f64>) -> f64 {
    data.rows()
        .into_iter()
        .zip(labels)
        .filter(|(_, l)| **l >= 0)
        .map(|(row, &l)| squared_euclidean(row, centroids.row(l as usize)))
        .sum()
}

fn defined_for(labels: &[SegmentLabel]) -> bool {
    let k = n_clusters(labels);
    k >= 2 && k < labels.len()
}

/// Mean silhouette coefficient; 0.0 when fewer than 2 or as many clusters as rows.
pub fn silhouette(data: &Array2<f64>, labels: &[SegmentLabel]) -> f64 {
    if !defined_for(labels) {
        return 0.0;
    }
    let n = labels.len();
    let mut sizes: HashMap<SegmentLabel, usize> = HashMap::new();
    for &l in labels {
        *sizes.entry(l).or_insert(0) += 1;
    }

    let mut total = 0.0;
    for i in 0..n {
        let mut sums: HashMap<SegmentLabel, f64> = HashMap::new();
        for j in 0..n {
            if i != j {
                *sums.entry(labels[j]).or_insert(0.0) += euclidean(data.row(i), data.row(j));
            }
        }
        let own = labels[i];
        let own_size = sizes[&own];
        if own_size <= 1 {
            // Singleton clusters score 0.
            continue;
        }
        let a = sums.get(&own).copied().unwrap_or(0.0) / (own_size - 1) as f64;
        let b = sums
            .iter()
            .filter(|(l, _)| **l != own)
            .map(|(l, s)| s / sizes[l] as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 && b.is_finite() {
            total += (b - a) / denom;
        }
    }
    total / n as f64
}

/// Calinski-Harabasz index; 0.0 when fewer than 2 or as many clusters as rows.
pub fn calinski_harabasz(data: &Array2<f64>, labels: &[SegmentLabel]) -> f64 {
    if !defined_for(labels) {
        return 0.0;
    }
    let n = labels.len() as f64;
    let k = n_clusters(labels) as f64;
    let Some(overall) = data.mean_axis(ndarray::Axis(0)) else {
        return 0.0;
    };
    let means = label_means(data, labels);

    let mut between = 0.0;
    let mut within = 0.0;
    for (row, l) in data.rows().into_iter().zip(labels) {
        if *l < 0 {
            continue;
        }
        let c = &means[l];
        within += squared_euclidean(row, c.view());
    }
    for (l, c) in &means {
        let size = labels.iter().filter(|x| *x == l).count() as f64;
        between += size * squared_euclidean(c.view(), overall.view());
    }
    if within == 0.0 {
        return 0.0;
    }
    (between / (k - 1.0)) / (within / (n - k))
}

/// Adjusted Rand Index between two labelings.
///
/// ARI is the corrected-for-chance version of the Rand Index: 0 for random
/// agreement, 1 for identical partitions (up to relabeling).
pub fn ari(pred: &[SegmentLabel], truth: &[SegmentLabel]) -> f64 {
    if pred.len() != truth.len() || pred.is_empty() {
        return 0.0;
    }

    let mut joint: HashMap<(SegmentLabel, SegmentLabel), usize> = HashMap::new();
    for (&p, &t) in pred.iter().zip(truth) {
        *joint.entry((p, t)).or_insert(0) += 1;
    }
    let mut row_sums = HashMap::new();
    let mut col_sums = HashMap::new();
    for (&(p, t), &count) in &joint {
        *row_sums.entry(p).or_insert(0usize) += count;
        *col_sums.entry(t).or_insert(0usize) += count;
    }

    let sum_comb_ij: f64 = joint.values().map(|&c| comb2(c) as f64).sum();
    let sum_comb_a: f64 = row_sums.values().map(|&a| comb2(a) as f64).sum();
    let sum_comb_b: f64 = col_sums.values().map(|&b| comb2(b) as f64).sum();
    let comb_n = comb2(pred.len()) as f64;

    let expected = sum_comb_a * sum_comb_b / comb_n;
    let max_index = (sum_comb_a + sum_comb_b) / 2.0;
    let denom = max_index - expected;
    if denom.abs() < 1e-10 {
        return 1.0;
    }
    (sum_comb_ij - expected) / denom
}

fn comb2(n: usize) -> usize {
    if n < 2 {
        0
    } else {
        n * (n - 1) / 2
    }
}
