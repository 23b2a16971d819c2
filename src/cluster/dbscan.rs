//! DBSCAN: Density-Based Spatial Clustering of Applications with Noise.
//!
//! # The Algorithm (Ester et al., 1996)
//!
//! DBSCAN groups points by neighborhood density. Unlike k-means, it:
//!
//! - Discovers clusters of arbitrary shape
//! - Determines the number of clusters from the data
//! - Identifies noise points (outliers)
//!
//! ## Core Concepts
//!
//! - **Epsilon (ε)**: Maximum distance between two points to be neighbors.
//! - **MinPts**: Minimum points within ε (the point itself included) for a
//!   point to be "core".
//! - **Border point**: Within ε of a core point but not core itself.
//! - **Noise point**: Neither core nor border.
//!
//! ## Choosing ε
//!
//! When ε is not given it is read off the sorted k-distance curve
//! (k = MinPts): the first index where the discrete second difference turns
//! negative marks the knee. Curves without a knee fall back to the 90th
//! percentile.
//!
//! ## Segments, not noise
//!
//! Every record must end up in a segment, so after the density pass noise
//! points are moved to the nearest cluster centroid. The pre-reassignment
//! noise count is kept in the metrics. A batch with no dense region at all
//! becomes a single segment.
//!
//! ## Complexity
//!
//! O(n²) time for the naive region queries, O(n) extra space.
//!
//! ## References
//!
//! Ester et al. (1996). "A Density-Based Algorithm for Discovering Clusters
//! in Large Spatial Databases with Noise." KDD-96.

use std::collections::BTreeMap;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use super::features::FeatureScaler;
use super::traits::{Assignment, SegmentationStrategy, Segmentation};
use super::{nearest_centroid, SegmentLabel, OUTLIER};
use crate::error::{Error, Result};
use crate::metrics::{euclidean, inertia, label_means, EvaluationMetrics};
use crate::record::FeatureRecord;

/// Smallest ε the estimator will return.
const MIN_EPS: f64 = 1e-9;

/// Percentile used when the k-distance curve has no knee.
const FALLBACK_PERCENTILE: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DbscanFit {
    scaler: FeatureScaler,
    eps: f64,
    centroids: Array2<f64>,
    n_outliers: usize,
}

/// DBSCAN segmentation strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dbscan {
    /// Neighborhood radius; estimated per fit when `None`.
    eps: Option<f64>,
    /// Minimum points for core point classification.
    min_samples: usize,
    #[serde(default)]
    fitted: Option<DbscanFit>,
}

impl Default for Dbscan {
    fn default() -> Self {
        Self::new()
    }
}

impl Dbscan {
    /// Create an unfit DBSCAN with estimated ε and `min_samples = 5`.
    pub fn new() -> Self {
        Self {
            eps: None,
            min_samples: 5,
            fitted: None,
        }
    }

    /// Fix epsilon (neighborhood radius).
    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = Some(eps);
        self
    }

    /// Set minimum points for core classification.
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// ε used by the current fit.
    pub fn fitted_eps(&self) -> Option<f64> {
        self.fitted.as_ref().map(|f| f.eps)
    }

    /// Noise points found by the current fit, before reassignment.
    pub fn n_outliers(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.n_outliers)
    }

    /// Find all neighbors within epsilon, excluding the point itself.
    fn region_query(data: &Array2<f64>, point_idx: usize, eps: f64) -> Vec<usize> {
        let point = data.row(point_idx);
        data.rows()
            .into_iter()
            .enumerate()
            .filter(|(idx, other)| *idx != point_idx && euclidean(point, *other) <= eps)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Density pass: cluster ids `0..` or [`OUTLIER`].
    fn density_labels(&self, data: &Array2<f64>, eps: f64) -> Vec<SegmentLabel> {
        let n = data.nrows();
        let mut labels = vec![OUTLIER; n];
        let mut visited = vec![false; n];
        let mut cluster_id: SegmentLabel = 0;

        for point_idx in 0..n {
            if visited[point_idx] {
                continue;
            }
            visited[point_idx] = true;

            let neighbors = Self::region_query(data, point_idx, eps);
            if neighbors.len() + 1 < self.min_samples {
                // Noise for now; may become a border point later.
                continue;
            }

            labels[point_idx] = cluster_id;
            let mut to_process = neighbors;
            while let Some(idx) = to_process.pop() {
                if labels[idx] == OUTLIER {
                    labels[idx] = cluster_id;
                }
                if visited[idx] {
                    continue;
                }
                visited[idx] = true;

                let next = Self::region_query(data, idx, eps);
                if next.len() + 1 >= self.min_samples {
                    to_process.extend(next.into_iter().filter(|nn| !visited[*nn]));
                }
            }
            cluster_id += 1;
        }
        labels
    }

    fn fit_ref(&self) -> Result<&DbscanFit> {
        self.fitted
            .as_ref()
            .ok_or(Error::NotFitted { component: "dbscan" })
    }
}

/// Estimate ε from the knee of the sorted k-distance curve.
///
/// `k` is clamped to `[1, n - 1]`. Returns [`MIN_EPS`] for fewer than two
/// rows.
pub fn estimate_eps(data: &Array2<f64>, k: usize) -> f64 {
    let n = data.nrows();
    if n < 2 {
        return MIN_EPS;
    }
    let k = k.clamp(1, n - 1);

    let mut kdist: Vec<f64> = (0..n)
        .map(|i| {
            let mut d: Vec<f64> = (0..n)
                .filter(|&j| j != i)
                .map(|j| euclidean(data.row(i), data.row(j)))
                .collect();
            d.sort_by(f64::total_cmp);
            d[k - 1]
        })
        .collect();
    kdist.sort_by(f64::total_cmp);

    let knee = (1..kdist.len().saturating_sub(1))
        .find(|&i| kdist[i + 1] - 2.0 * kdist[i] + kdist[i - 1] < 0.0)
        .map(|i| kdist[i]);

    let eps = knee.unwrap_or_else(|| percentile(&kdist, FALLBACK_PERCENTILE));
    eps.max(MIN_EPS)
}

/// Linearly interpolated percentile of sorted values.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let pos = q * (len - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

impl SegmentationStrategy for Dbscan {
    fn name(&self) -> &'static str {
        "dbscan"
    }

    fn description(&self) -> &'static str {
        "DBSCAN: groups candidates by density, reassigning outliers to the nearest group"
    }

    fn segment(&mut self, records: &[FeatureRecord], _target: usize) -> Result<Segmentation> {
        if self.min_samples == 0 {
            return Err(Error::InvalidParameter {
                name: "min_samples",
                message: "must be at least 1",
            });
        }
        if let Some(eps) = self.eps {
            if !(eps > 0.0 && eps.is_finite()) {
                return Err(Error::InvalidParameter {
                    name: "eps",
                    message: "must be positive and finite",
                });
            }
        }

        let (scaler, data) = FeatureScaler::fit(records)?;
        let eps = match self.eps {
            Some(eps) => eps,
            None => {
                let eps = estimate_eps(&data, self.min_samples);
                tracing::debug!(eps, min_samples = self.min_samples, "estimated dbscan eps");
                eps
            }
        };

        let mut labels = self.density_labels(&data, eps);
        let n_outliers = labels.iter().filter(|l| **l == OUTLIER).count();

        let centroids = if n_outliers == labels.len() {
            tracing::warn!(
                n_rows = labels.len(),
                eps,
                "dbscan found no dense region; using a single segment"
            );
            labels.iter_mut().for_each(|l| *l = 0);
            data.mean_axis(Axis(0))
                .map(|m| m.insert_axis(Axis(0)))
                .ok_or(Error::EmptyCorpus)?
        } else {
            // Labels are contiguous from 0, so the map order is row order.
            let means = label_means(&data, &labels);
            let mut centroids = Array2::zeros((means.len(), data.ncols()));
            for (l, mean) in &means {
                centroids.row_mut(*l as usize).assign(mean);
            }
            for (i, label) in labels.iter_mut().enumerate() {
                if *label == OUTLIER {
                    *label = nearest_centroid(data.row(i), &centroids).0 as SegmentLabel;
                }
            }
            centroids
        };

        let mut metrics = EvaluationMetrics::score(self.name(), &data, &labels);
        metrics.n_outliers = n_outliers;

        tracing::info!(
            n_rows = labels.len(),
            n_clusters = metrics.n_clusters,
            n_outliers,
            eps,
            "dbscan segmentation complete"
        );
        tracing::debug!(inertia = inertia(&data, &labels, &centroids), "dbscan spread");

        self.fitted = Some(DbscanFit {
            scaler,
            eps,
            centroids,
            n_outliers,
        });
        Ok(Segmentation { labels, metrics })
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn feature_columns(&self) -> Result<&[String]> {
        Ok(self.fit_ref()?.scaler.columns())
    }

    fn centroids(&self) -> Result<BTreeMap<SegmentLabel, Vec<f64>>> {
        let fit = self.fit_ref()?;
        Ok(fit
            .centroids
            .rows()
            .into_iter()
            .enumerate()
            .map(|(k, c)| (k as SegmentLabel, c.to_vec()))
            .collect())
    }

    fn assign(&self, record: &FeatureRecord) -> Result<Assignment> {
        let fit = self.fit_ref()?;
        let point = fit.scaler.transform(record);
        let (k, distance) = nearest_centroid(point.view(), &fit.centroids);
        Ok(Assignment {
            label: k as SegmentLabel,
            distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn records(points: &[[f64; 2]]) -> Vec<FeatureRecord> {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| FeatureRecord::new(i).with("x", p[0]).with("y", p[1]))
            .collect()
    }

    #[test]
    fn test_dbscan_two_clusters() {
        let data = records(&[
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [0.1, 0.1],
            [0.05, 0.05],
            [5.0, 5.0],
            [5.1, 5.0],
            [5.0, 5.1],
            [5.1, 5.1],
            [5.05, 5.05],
        ]);

        let mut dbscan = Dbscan::new().with_eps(0.3).with_min_samples(3);
        let run = dbscan.segment(&data, 0).unwrap();
        let labels = run.labels;

        assert_eq!(labels.len(), 10);
        assert!(labels[1..5].iter().all(|l| *l == labels[0]));
        assert!(labels[6..10].iter().all(|l| *l == labels[5]));
        assert_ne!(labels[0], labels[5]);
        assert_eq!(run.metrics.n_outliers, 0);
    }

    #[test]
    fn noise_is_reassigned_to_nearest_segment() {
        let data = records(&[
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [0.1, 0.1],
            [5.0, 5.0],
            [5.1, 5.0],
            [5.0, 5.1],
            [5.1, 5.1],
            [8.0, 8.0],
        ]);

        let mut dbscan = Dbscan::new().with_eps(0.3).with_min_samples(3);
        let run = dbscan.segment(&data, 7).unwrap();

        assert!(run.labels.iter().all(|l| *l >= 0));
        assert_eq!(run.labels[8], run.labels[4]);
        assert_eq!(run.metrics.n_outliers, 1);
        assert_eq!(run.metrics.n_clusters, 2);
        assert_eq!(dbscan.n_outliers(), Some(1));
    }

    #[test]
    fn all_noise_collapses_to_one_segment() {
        let data = records(&[[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0]]);
        let mut dbscan = Dbscan::new().with_eps(0.1).with_min_samples(3);
        let run = dbscan.segment(&data, 3).unwrap();

        assert_eq!(run.labels, vec![0, 0, 0, 0]);
        assert_eq!(run.metrics.n_outliers, 4);
        assert_eq!(dbscan.centroids().unwrap().len(), 1);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let data = records(&[[0.0, 0.0], [1.0, 1.0]]);
        assert!(Dbscan::new().with_eps(0.0).segment(&data, 1).is_err());
        assert!(Dbscan::new().with_min_samples(0).segment(&data, 1).is_err());
    }

    #[test]
    fn eps_estimate_is_positive_and_finds_gap() {
        let data = array![[0.0], [0.1], [0.2], [0.3], [10.0]];
        let eps = estimate_eps(&data, 1);
        assert!(eps >= 0.1 - 1e-12 && eps < 10.0, "eps = {eps}");

        let same = array![[1.0], [1.0], [1.0]];
        assert_eq!(estimate_eps(&same, 2), MIN_EPS);
        assert_eq!(estimate_eps(&array![[1.0]], 5), MIN_EPS);
    }

    #[test]
    fn percentile_interpolates() {
        assert_eq!(percentile(&[0.0, 10.0], 0.9), 9.0);
        assert_eq!(percentile(&[4.0], 0.9), 4.0);
    }

    #[test]
    fn estimated_eps_recorded_on_fit() {
        let points: Vec<[f64; 2]> = (0..20)
            .map(|i| if i < 10 { [i as f64 * 0.01, 0.0] } else { [5.0 + i as f64 * 0.01, 5.0] })
            .collect();
        let mut dbscan = Dbscan::new().with_min_samples(3);
        let run = dbscan.segment(&records(&points), 0).unwrap();
        assert!(dbscan.fitted_eps().unwrap() > 0.0);
        assert!(run.labels.iter().all(|l| *l >= 0));
    }
}
