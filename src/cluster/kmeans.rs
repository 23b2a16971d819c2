//! K-means segmentation.
//!
//! Partitions rows into exactly k clusters by minimizing **within-cluster sum
//! of squares** (WCSS, reported as inertia):
//!
//! ```text
//! WCSS = Σₖ Σᵢ∈Cₖ ||xᵢ - μₖ||²
//! ```
//!
//! # Lloyd's Algorithm
//!
//! 1. Initialize k centroids via k-means++
//! 2. **Assign**: each point to its nearest centroid
//! 3. **Update**: each centroid to the mean of its points
//! 4. Repeat until the centroids stop moving
//!
//! WCSS never increases between iterations, so the loop converges, but only
//! to a local optimum. The fit therefore runs `n_init` seeded restarts and
//! keeps the one with the lowest WCSS.
//!
//! ## K-means++ Initialization
//!
//! 1. Choose the first centroid uniformly at random
//! 2. Choose each next centroid with probability proportional to D(x)²
//!    (squared distance to the nearest existing centroid)
//!
//! Provides an O(log k) approximation to the optimal WCSS in expectation.

use std::collections::BTreeMap;

use ndarray::Array2;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::features::FeatureScaler;
use super::traits::{Assignment, SegmentationStrategy, Segmentation};
use super::{nearest_centroid, SegmentLabel};
use crate::error::{Error, Result};
use crate::metrics::{inertia, EvaluationMetrics};
use crate::record::FeatureRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct KMeansFit {
    scaler: FeatureScaler,
    centroids: Array2<f64>,
    inertia: f64,
}

/// K-means segmentation strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeans {
    /// Maximum Lloyd iterations per restart.
    max_iter: usize,
    /// Convergence tolerance on total squared centroid shift.
    tol: f64,
    /// Seeded restarts.
    n_init: usize,
    /// Random seed.
    seed: u64,
    #[serde(default)]
    fitted: Option<KMeansFit>,
}

impl Default for KMeans {
    fn default() -> Self {
        Self::new()
    }
}

impl KMeans {
    /// Create an unfit K-means strategy.
    pub fn new() -> Self {
        Self {
            max_iter: 300,
            tol: 1e-4,
            n_init: 10,
            seed: 42,
            fitted: None,
        }
    }

    /// Set maximum iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set the number of restarts.
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init.max(1);
        self
    }

    /// Set random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Inertia of the current fit.
    pub fn inertia(&self) -> Option<f64> {
        self.fitted.as_ref().map(|f| f.inertia)
    }

    /// Initialize centroids using k-means++.
    fn init_centroids(data: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
        let n = data.nrows();
        let mut centroids = Array2::zeros((k, data.ncols()));

        let first = rng.random_range(0..n);
        centroids.row_mut(0).assign(&data.row(first));

        for i in 1..k {
            let distances: Vec<f64> = data
                .rows()
                .into_iter()
                .map(|point| {
                    (0..i)
                        .map(|c| {
                            point
                                .iter()
                                .zip(centroids.row(c).iter())
                                .map(|(a, b)| (a - b).powi(2))
                                .sum::<f64>()
                        })
                        .fold(f64::MAX, f64::min)
                })
                .collect();

            // Sample proportional to squared distance
            let total: f64 = distances.iter().sum();
            if total == 0.0 {
                let idx = rng.random_range(0..n);
                centroids.row_mut(i).assign(&data.row(idx));
                continue;
            }

            let threshold = rng.random::<f64>() * total;
            let mut cumsum = 0.0;
            let mut selected = n - 1;
            for (j, &d) in distances.iter().enumerate() {
                cumsum += d;
                if cumsum >= threshold && d > 0.0 {
                    selected = j;
                    break;
                }
            }
            centroids.row_mut(i).assign(&data.row(selected));
        }

        centroids
    }

    fn assign_all(data: &Array2<f64>, centroids: &Array2<f64>, labels: &mut [usize]) {
        #[cfg(feature = "parallel")]
        labels.par_iter_mut().enumerate().for_each(|(i, label)| {
            *label = nearest_centroid(data.row(i), centroids).0;
        });

        #[cfg(not(feature = "parallel"))]
        for (i, label) in labels.iter_mut().enumerate() {
            *label = nearest_centroid(data.row(i), centroids).0;
        }
    }

    /// One Lloyd run from a k-means++ start.
    fn lloyd(&self, data: &Array2<f64>, k: usize, rng: &mut StdRng) -> (Vec<usize>, Array2<f64>) {
        let n = data.nrows();
        let d = data.ncols();
        let mut centroids = Self::init_centroids(data, k, rng);
        let mut labels = vec![0usize; n];

        for iter in 0..self.max_iter {
            Self::assign_all(data, &centroids, &mut labels);

            let mut new_centroids = Array2::zeros((k, d));
            let mut counts = vec![0usize; k];
            for (i, &c) in labels.iter().enumerate() {
                let mut row = new_centroids.row_mut(c);
                row += &data.row(i);
                counts[c] += 1;
            }
            for c in 0..k {
                if counts[c] > 0 {
                    new_centroids
                        .row_mut(c)
                        .mapv_inplace(|v| v / counts[c] as f64);
                } else {
                    // Empty cluster: reinitialize randomly
                    let idx = rng.random_range(0..n);
                    new_centroids.row_mut(c).assign(&data.row(idx));
                }
            }

            let shift: f64 = centroids
                .iter()
                .zip(new_centroids.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            centroids = new_centroids;

            if shift < self.tol {
                tracing::debug!(iter, shift, "k-means converged");
                break;
            }
        }

        // Final assignment against the final centroids.
        Self::assign_all(data, &centroids, &mut labels);
        (labels, centroids)
    }

    fn fit_ref(&self) -> Result<&KMeansFit> {
        self.fitted
            .as_ref()
            .ok_or(Error::NotFitted { component: "kmeans" })
    }
}

impl SegmentationStrategy for KMeans {
    fn name(&self) -> &'static str {
        "kmeans"
    }

    fn description(&self) -> &'static str {
        "K-Means: partitions candidates into k groups around centroids"
    }

    fn segment(&mut self, records: &[FeatureRecord], k: usize) -> Result<Segmentation> {
        let (scaler, data) = FeatureScaler::fit(records)?;
        let n = data.nrows();
        if k == 0 || k > n {
            return Err(Error::InvalidClusterCount {
                requested: k,
                n_items: n,
            });
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut best: Option<(f64, Vec<usize>, Array2<f64>)> = None;
        for _ in 0..self.n_init.max(1) {
            let (labels, centroids) = self.lloyd(&data, k, &mut rng);
            let signed: Vec<SegmentLabel> = labels.iter().map(|&l| l as SegmentLabel).collect();
            let wcss = inertia(&data, &signed, &centroids);
            if best.as_ref().map_or(true, |(b, _, _)| wcss < *b) {
                best = Some((wcss, labels, centroids));
            }
        }
        let Some((wcss, labels, centroids)) = best else {
            return Err(Error::EmptyCorpus);
        };

        let labels: Vec<SegmentLabel> = labels.into_iter().map(|l| l as SegmentLabel).collect();
        let mut metrics = EvaluationMetrics::score(self.name(), &data, &labels);
        metrics.inertia = Some(wcss);

        tracing::info!(
            n_rows = n,
            k,
            inertia = wcss,
            silhouette = metrics.silhouette,
            "k-means segmentation complete"
        );

        self.fitted = Some(KMeansFit {
            scaler,
            centroids,
            inertia: wcss,
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
    use std::collections::HashSet;

    fn records(points: &[[f64; 2]]) -> Vec<FeatureRecord> {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| FeatureRecord::new(i).with("x", p[0]).with("y", p[1]))
            .collect()
    }

    #[test]
    fn test_kmeans_basic() {
        let data = records(&[[0.0, 0.0], [0.1, 0.1], [10.0, 10.0], [10.1, 10.1]]);
        let mut kmeans = KMeans::new().with_seed(42);
        let labels = kmeans.segment(&data, 2).unwrap().labels;

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
    }

    #[test]
    fn test_kmeans_all_points_assigned() {
        let points: Vec<[f64; 2]> = (0..50).map(|i| [i as f64 * 0.1, (i % 5) as f64]).collect();
        let mut kmeans = KMeans::new().with_seed(123);
        let labels = kmeans.segment(&records(&points), 5).unwrap().labels;

        assert_eq!(labels.len(), points.len());
        for &label in &labels {
            assert!((0..5).contains(&label), "label {} out of range", label);
        }
    }

    #[test]
    fn test_kmeans_k_equals_n() {
        let data = records(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
        let mut kmeans = KMeans::new().with_seed(42);
        let labels = kmeans.segment(&data, 3).unwrap().labels;

        let unique: HashSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_kmeans_deterministic_with_seed() {
        let data = records(&[[0.0, 0.0], [0.1, 0.1], [10.0, 10.0], [10.1, 10.1]]);
        let a = KMeans::new().with_seed(42).segment(&data, 2).unwrap();
        let b = KMeans::new().with_seed(42).segment(&data, 2).unwrap();
        assert_eq!(a.labels, b.labels, "same seed should give same result");
    }

    #[test]
    fn test_kmeans_invalid_k() {
        let data = records(&[[0.0, 0.0], [1.0, 1.0]]);
        assert!(KMeans::new().segment(&data, 5).is_err());
        assert!(KMeans::new().segment(&data, 0).is_err());
        assert!(matches!(KMeans::new().segment(&[], 2), Err(Error::EmptyCorpus)));
    }

    #[test]
    fn predict_matches_fit_labels() {
        let data = records(&[[0.0, 0.0], [0.1, 0.1], [10.0, 10.0], [10.1, 10.1]]);
        let mut kmeans = KMeans::new().with_seed(7);
        let labels = kmeans.segment(&data, 2).unwrap().labels;
        for (r, l) in data.iter().zip(&labels) {
            assert_eq!(kmeans.predict_one(r).unwrap(), *l);
        }
        let probe = FeatureRecord::new(99).with("x", 9.9).with("y", 10.2);
        assert_eq!(kmeans.predict_one(&probe).unwrap(), labels[2]);
    }

    #[test]
    fn unfit_strategy_refuses_profile_and_predict() {
        let kmeans = KMeans::new();
        let r = FeatureRecord::new(1).with("x", 1.0);
        assert!(matches!(kmeans.predict_one(&r), Err(Error::NotFitted { .. })));
        assert!(matches!(kmeans.profile(&[r], &[0]), Err(Error::NotFitted { .. })));
    }

    #[test]
    fn missing_feature_predicts_at_column_mean() {
        // Both sides share the same spread of y, so only x separates them.
        let data = records(&[
            [0.0, 0.0],
            [0.0, 5.0],
            [0.0, 10.0],
            [10.0, 0.0],
            [10.0, 5.0],
            [10.0, 10.0],
        ]);
        let mut kmeans = KMeans::new().with_seed(1).with_n_init(10);
        let labels = kmeans.segment(&data, 2).unwrap().labels;
        assert_eq!(labels[0], labels[2]);
        assert_eq!(labels[3], labels[5]);
        assert_ne!(labels[0], labels[3]);

        // y missing -> 0 after scaling, the column mean, which both
        // centroids share.
        let right = FeatureRecord::new(6).with("x", 10.0);
        let a = kmeans.assign(&right).unwrap();
        assert_eq!(a.label, labels[3]);
        assert!(a.distance < 1e-9, "distance {}", a.distance);

        let left = FeatureRecord::new(7).with("x", 0.0);
        assert_eq!(kmeans.predict_one(&left).unwrap(), labels[0]);
    }
}
