//! Hierarchical (agglomerative) segmentation.
//!
//! Bottom-up clustering that builds a **dendrogram** by iteratively
//! merging the closest clusters, then cuts it to exactly k segments.
//!
//! # Linkage Methods
//!
//! | Linkage | Formula | Effect |
//! |---------|---------|--------|
//! | Single | min(d(a,b)) for a∈A, b∈B | Chaining; elongated clusters |
//! | Complete | max(d(a,b)) | Compact, spherical clusters |
//! | Average | mean(d(a,b)) | Balanced compromise |
//! | Ward | Δ variance | Minimizes within-cluster variance |
//!
//! ## Ward's Method
//!
//! Ward linkage minimizes the increase in total within-cluster variance
//! when merging clusters A and B:
//!
//! ```text
//! Δ(A,B) = (nₐ × nᵦ)/(nₐ + nᵦ) × ||μₐ - μᵦ||²
//! ```
//!
//! # Prediction
//!
//! A dendrogram has no notion of "new point", so a record is given the
//! segment of its nearest training row. The reported distance is to that
//! segment's mean, which keeps confidence comparable with centroid methods.
//!
//! O(n²) memory for the condensed distance matrix.

use std::collections::BTreeMap;

use kodama::{linkage as kodama_linkage, Method as KodamaMethod};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::dendrogram::Dendrogram;
use super::features::FeatureScaler;
use super::traits::{Assignment, SegmentationStrategy, Segmentation};
use super::SegmentLabel;
use crate::error::{Error, Result};
use crate::metrics::{euclidean, inertia, label_means, squared_euclidean, EvaluationMetrics};
use crate::record::FeatureRecord;

/// Linkage method for hierarchical clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Linkage {
    /// Single linkage: minimum distance between clusters.
    Single,
    /// Complete linkage: maximum distance between clusters.
    Complete,
    /// Average linkage: mean distance between clusters.
    Average,
    /// Ward's method: minimize within-cluster variance.
    #[default]
    Ward,
}

impl From<Linkage> for KodamaMethod {
    fn from(linkage: Linkage) -> Self {
        match linkage {
            Linkage::Single => KodamaMethod::Single,
            Linkage::Complete => KodamaMethod::Complete,
            Linkage::Average => KodamaMethod::Average,
            Linkage::Ward => KodamaMethod::Ward,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct HierarchicalFit {
    scaler: FeatureScaler,
    training: Array2<f64>,
    labels: Vec<SegmentLabel>,
    centroids: Array2<f64>,
}

/// Agglomerative segmentation strategy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Hierarchical {
    linkage: Linkage,
    #[serde(default)]
    fitted: Option<HierarchicalFit>,
}

impl Hierarchical {
    /// Create an unfit strategy with Ward linkage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set linkage method.
    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    /// Linkage in use.
    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    /// Build the full dendrogram over scaled rows.
    pub fn dendrogram(&self, data: &Array2<f64>) -> Result<Dendrogram> {
        let n = data.nrows();
        if n == 0 {
            return Err(Error::EmptyCorpus);
        }
        let mut dendro = Dendrogram::new(n);
        if n == 1 {
            return Ok(dendro);
        }

        // Condensed dissimilarity matrix (upper triangle, row-major).
        let mut condensed = Vec::with_capacity((n * (n - 1)) / 2);
        for row in 0..(n - 1) {
            for col in (row + 1)..n {
                condensed.push(euclidean(data.row(row), data.row(col)));
            }
        }

        // kodama labels leaves 0..n-1; merge i creates cluster n+i.
        let dend = kodama_linkage(&mut condensed, n, self.linkage.into());
        for step in dend.steps() {
            dendro.add_merge(step.cluster1, step.cluster2, step.dissimilarity, step.size);
        }
        Ok(dendro)
    }

    fn fit_ref(&self) -> Result<&HierarchicalFit> {
        self.fitted
            .as_ref()
            .ok_or(Error::NotFitted { component: "hierarchical" })
    }
}

impl SegmentationStrategy for Hierarchical {
    fn name(&self) -> &'static str {
        "hierarchical"
    }

    fn description(&self) -> &'static str {
        "Hierarchical: merges candidates bottom-up and cuts the tree at k groups"
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

        let dendro = self.dendrogram(&data)?;
        let labels: Vec<SegmentLabel> = dendro
            .cut_to_k(k)?
            .into_iter()
            .map(|l| l as SegmentLabel)
            .collect();

        let means = label_means(&data, &labels);
        let mut centroids = Array2::zeros((means.len(), data.ncols()));
        for (l, mean) in &means {
            centroids.row_mut(*l as usize).assign(mean);
        }

        let mut metrics = EvaluationMetrics::score(self.name(), &data, &labels);
        metrics.inertia = Some(inertia(&data, &labels, &centroids));

        tracing::info!(
            n_rows = n,
            k,
            linkage = ?self.linkage,
            silhouette = metrics.silhouette,
            "hierarchical segmentation complete"
        );

        self.fitted = Some(HierarchicalFit {
            scaler,
            training: data,
            labels: labels.clone(),
            centroids,
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

        let mut nearest = 0;
        let mut best = f64::INFINITY;
        for (i, row) in fit.training.rows().into_iter().enumerate() {
            let d = squared_euclidean(point.view(), row);
            if d < best {
                best = d;
                nearest = i;
            }
        }
        let label = fit.labels[nearest];
        let distance = euclidean(point.view(), fit.centroids.row(label as usize));
        Ok(Assignment { label, distance })
    }
}
