//! Segmentation strategies: interchangeable clustering algorithms behind one contract.
//!
//! Every strategy takes a batch of [`FeatureRecord`](crate::record::FeatureRecord)s,
//! keeps only the numeric columns (identifiers and timestamps excluded by
//! name), standard-scales them, and partitions the rows into labeled segments.
//! After a fit the same scaling is applied to single records for
//! [`predict_one`](SegmentationStrategy::predict_one).
//!
//! ## Algorithms
//!
//! ### K-means
//!
//! Assign each point to the nearest centroid, move each centroid to the mean
//! of its points, repeat. Minimizes within-cluster sum of squares:
//!
//! ```text
//! J = Σ_k Σ_{x ∈ C_k} ||x - μ_k||²
//! ```
//!
//! Assumes roughly spherical, similarly sized clusters and a known k.
//!
//! ### Hierarchical (Agglomerative)
//!
//! Start with every point as its own cluster and repeatedly merge the two
//! closest. The merge history forms a **dendrogram**, cut here to exactly k
//! clusters.
//!
//! | Linkage | Distance | Effect |
//! |---------|----------|--------|
//! | Single | min(pairwise) | Chaining; elongated clusters |
//! | Complete | max(pairwise) | Compact, spherical clusters |
//! | Average | mean(pairwise) | Balanced compromise |
//! | Ward | Variance increase | Minimizes within-cluster variance |
//!
//! ### DBSCAN
//!
//! Density-based: points with enough neighbors inside radius ε seed
//! clusters, everything reachable from them joins, the rest is noise. The
//! cluster count comes from the data; k is ignored. Noise points are
//! reassigned to the nearest cluster centroid after the fit.
//!
//! ## Usage
//!
//! ```rust
//! use cohort::cluster::{KMeans, SegmentationStrategy};
//! use cohort::record::FeatureRecord;
//!
//! let records: Vec<FeatureRecord> = [(0.0, 0.0), (0.1, 0.1), (10.0, 10.0), (10.1, 10.1)]
//!     .iter()
//!     .enumerate()
//!     .map(|(i, (x, y))| FeatureRecord::new(i).with("x", *x).with("y", *y))
//!     .collect();
//!
//! let mut kmeans = KMeans::new().with_seed(42);
//! let run = kmeans.segment(&records, 2).unwrap();
//! assert_eq!(run.labels[0], run.labels[1]);
//! assert_ne!(run.labels[0], run.labels[2]);
//! ```

mod dbscan;
mod dendrogram;
mod features;
mod hierarchical;
mod kmeans;
mod strategy;
mod traits;

pub use dbscan::{estimate_eps, Dbscan};
pub use dendrogram::{Dendrogram, Merge};
pub use features::FeatureScaler;
pub use hierarchical::{Hierarchical, Linkage};
pub use kmeans::KMeans;
pub use strategy::{Algorithm, Strategy, StrategyConfig};
pub use traits::{Assignment, SegmentationStrategy, Segmentation};

/// Segment label: `0..k`, or [`OUTLIER`].
pub type SegmentLabel = i32;

/// Label of points no cluster claims (density methods only).
pub const OUTLIER: SegmentLabel = -1;

use ndarray::{Array2, ArrayView1};

use crate::metrics::squared_euclidean;

/// Index and distance of the nearest centroid row; ties go to the lowest index.
pub(crate) fn nearest_centroid(point: ArrayView1<'_, f64>, centroids: &Array2<f64>) -> (usize, f64) {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (k, c) in centroids.rows().into_iter().enumerate() {
        let d = squared_euclidean(point, c);
        if d < best_dist {
            best_dist = d;
            best = k;
        }
    }
    (best, best_dist.sqrt())
}
