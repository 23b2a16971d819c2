//! Dimensionality reduction via Laplacian eigenmaps.
//!
//! High-dimensional embeddings are projected onto the low-frequency
//! eigenvectors of a k-nearest-neighbor graph Laplacian, which preserves local
//! neighborhood structure (the manifold) rather than global variance.
//!
//! # Algorithm
//!
//! ```text
//! 1. k = clamp(n_neighbors, 1, n - 1)
//! 2. σᵢ = distance from xᵢ to its k-th nearest neighbor
//! 3. Wᵢⱼ = exp(-||xᵢ - xⱼ||² / (σᵢ σⱼ))  for j ∈ kNN(i), symmetrized by max
//! 4. L_sym = I - D^{-1/2} W D^{-1/2}
//! 5. Take eigenvectors 1..=m of L_sym (skip the trivial one), yᵢ = uᵢ / √dᵢ
//! ```
//!
//! The neighbor graph is only defined when every point has at least one other
//! point to connect to, so fitting needs two rows and the neighbor count is
//! clamped to `n - 1`.
//!
//! # Out-of-sample transform
//!
//! A new row is placed at the kernel-weighted mean of the embedding
//! coordinates of its k nearest fitted points. This needs no refit and works
//! on a single row.

use faer::{Mat, Side};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::euclidean;
use crate::record::FeatureMatrix;

/// Smallest edge weight kept in the graph, so every degree stays positive.
const MIN_WEIGHT: f64 = 1e-12;

/// Reducer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerConfig {
    /// Output width.
    pub n_components: usize,
    /// Neighbor count for the graph (clamped at fit time).
    pub n_neighbors: usize,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            n_components: 50,
            n_neighbors: 15,
        }
    }
}

/// Clamp a neighbor count to what a corpus of `n_rows` supports.
pub fn clamp_neighbors(requested: usize, n_rows: usize) -> usize {
    requested.min(n_rows.saturating_sub(1)).max(1)
}

/// Column names of a reduced matrix.
pub fn reduced_columns(n_components: usize) -> Vec<String> {
    (0..n_components).map(|i| format!("dim_{i}")).collect()
}

/// Unfitted spectral reducer.
#[derive(Debug, Clone, Default)]
pub struct SpectralReducer {
    config: ReducerConfig,
}

/// Fitted reducer state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedReducer {
    input_columns: Vec<String>,
    n_components: usize,
    n_neighbors: usize,
    training: Array2<f64>,
    bandwidth: Vec<f64>,
    embedding: Array2<f64>,
}

impl SpectralReducer {
    /// Create a reducer.
    pub fn new(config: ReducerConfig) -> Self {
        Self { config }
    }

    /// Fit on a representative corpus.
    pub fn fit(&self, matrix: &FeatureMatrix) -> Result<FittedReducer> {
        let n = matrix.n_rows();
        if n == 0 {
            return Err(Error::EmptyCorpus);
        }
        if n < 2 {
            return Err(Error::CorpusTooSmall {
                n_rows: n,
                required: 2,
            });
        }
        if self.config.n_components == 0 {
            return Err(Error::InvalidParameter {
                name: "n_components",
                message: "must be at least 1",
            });
        }

        let k = clamp_neighbors(self.config.n_neighbors, n);
        if k != self.config.n_neighbors {
            tracing::warn!(
                requested = self.config.n_neighbors,
                clamped = k,
                n_rows = n,
                "neighbor count clamped to corpus size"
            );
        }

        let data = matrix.data();
        let mut dist = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in (i + 1)..n {
                let d = euclidean(data.row(i), data.row(j));
                dist[[i, j]] = d;
                dist[[j, i]] = d;
            }
        }

        let neighbors: Vec<Vec<usize>> = (0..n)
            .map(|i| nearest(dist.row(i).iter().copied(), Some(i), k))
            .collect();
        let bandwidth: Vec<f64> = (0..n)
            .map(|i| bandwidth_from(neighbors[i].iter().map(|&j| dist[[i, j]])))
            .collect();

        let mut w = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for &j in &neighbors[i] {
                let weight = kernel(dist[[i, j]], bandwidth[i], bandwidth[j]);
                let cur = w[[i, j]].max(weight);
                w[[i, j]] = cur;
                w[[j, i]] = cur;
            }
        }
        let degree: Vec<f64> = (0..n).map(|i| w.row(i).sum()).collect();
        let inv_sqrt: Vec<f64> = degree.iter().map(|d| 1.0 / d.sqrt()).collect();

        let laplacian = Mat::<f64>::from_fn(n, n, |i, j| {
            let off = w[[i, j]] * inv_sqrt[i] * inv_sqrt[j];
            if i == j {
                1.0 - off
            } else {
                -off
            }
        });
        let evd = laplacian.selfadjoint_eigendecomposition(Side::Lower);
        let values = evd.s().column_vector();
        let vectors = evd.u();

        // Ascending eigenvalue, index breaks ties.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| values.read(a).total_cmp(&values.read(b)).then(a.cmp(&b)));

        let m = self.config.n_components.min(n - 1);
        if m < self.config.n_components {
            tracing::debug!(
                available = m,
                n_components = self.config.n_components,
                "corpus supports fewer components; padding with zeros"
            );
        }
        let mut embedding = Array2::<f64>::zeros((n, self.config.n_components));
        for (c, &col) in order.iter().skip(1).take(m).enumerate() {
            let mut coords: Vec<f64> = (0..n).map(|i| vectors.read(i, col) * inv_sqrt[i]).collect();
            // Largest-magnitude entry positive, for a reproducible sign.
            let pivot = coords
                .iter()
                .copied()
                .fold(0.0f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
            if pivot < 0.0 {
                for v in &mut coords {
                    *v = -*v;
                }
            }
            for (i, v) in coords.into_iter().enumerate() {
                embedding[[i, c]] = v;
            }
        }

        tracing::info!(
            n_rows = n,
            input_width = matrix.n_cols(),
            n_components = self.config.n_components,
            n_neighbors = k,
            "fitted spectral reducer"
        );

        Ok(FittedReducer {
            input_columns: matrix.columns().to_vec(),
            n_components: self.config.n_components,
            n_neighbors: k,
            training: data.clone(),
            bandwidth,
            embedding,
        })
    }
}

impl FittedReducer {
    /// Output width.
    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Neighbor count actually used at fit time.
    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    /// Fit-time input columns.
    pub fn input_columns(&self) -> &[String] {
        &self.input_columns
    }

    /// Embedding coordinates of the fit corpus.
    pub fn embedding(&self) -> &Array2<f64> {
        &self.embedding
    }

    /// Project one row.
    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.training.ncols() {
            return Err(Error::DimensionMismatch {
                expected: self.training.ncols(),
                found: row.len(),
            });
        }
        let row = ndarray::ArrayView1::from(row);
        let dists: Vec<f64> = self
            .training
            .rows()
            .into_iter()
            .map(|t| euclidean(row, t))
            .collect();
        let nn = nearest(dists.iter().copied(), None, self.n_neighbors);
        let sigma = bandwidth_from(nn.iter().map(|&j| dists[j]));

        let mut out = vec![0.0; self.n_components];
        let mut total = 0.0;
        for &j in &nn {
            let w = (-dists[j] * dists[j] / (sigma * self.bandwidth[j])).exp();
            total += w;
            for (c, o) in out.iter_mut().enumerate() {
                *o += w * self.embedding[[j, c]];
            }
        }
        if total > 0.0 {
            for o in &mut out {
                *o /= total;
            }
        } else if let Some(&j) = nn.first() {
            // Far outside the fitted manifold: snap to the nearest point.
            out = self.embedding.row(j).to_vec();
        }
        Ok(out)
    }

    /// Project a matrix whose columns match the fit-time schema.
    pub fn transform(&self, matrix: &FeatureMatrix) -> Result<FeatureMatrix> {
        matrix.ensure_columns(&self.input_columns)?;
        let rows = (0..matrix.n_rows())
            .map(|i| self.transform_row(&matrix.row(i).to_vec()))
            .collect::<Result<Vec<_>>>()?;
        FeatureMatrix::from_rows(
            reduced_columns(self.n_components),
            matrix.ids().to_vec(),
            &rows,
        )
    }
}

/// Indices of the `k` smallest distances, excluding `skip`; ties by index.
fn nearest(dists: impl Iterator<Item = f64>, skip: Option<usize>, k: usize) -> Vec<usize> {
    let mut idx: Vec<(usize, f64)> = dists
        .enumerate()
        .filter(|(j, _)| Some(*j) != skip)
        .collect();
    idx.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    idx.into_iter().take(k).map(|(j, _)| j).collect()
}

/// Distance to the farthest of the given neighbors, or the mean positive
/// distance when that is zero (duplicate points).
fn bandwidth_from(dists: impl Iterator<Item = f64>) -> f64 {
    let dists: Vec<f64> = dists.collect();
    let kth = dists.iter().copied().fold(0.0, f64::max);
    if kth > 0.0 {
        return kth;
    }
    let positive: Vec<f64> = dists.into_iter().filter(|d| *d > 0.0).collect();
    if positive.is_empty() {
        1.0
    } else {
        positive.iter().sum::<f64>() / positive.len() as f64
    }
}

fn kernel(d: f64, sigma_i: f64, sigma_j: f64) -> f64 {
    (-d * d / (sigma_i * sigma_j)).exp().max(MIN_WEIGHT)
}
