//! Segmentation context: one strategy plus the results of its last run.
//!
//! The context is the single entry point for batch segmentation. It owns the
//! active [`Strategy`], runs segment + profile as one step, keeps the last
//! run's batch, labels, profiles and metrics together, and persists the
//! fitted strategy with its profiles as one versioned JSON blob.
//!
//! A failed run leaves the context exactly as it was, including the
//! strategy's fitted state.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::{SegmentLabel, SegmentationStrategy, Strategy};
use crate::error::{Error, Result};
use crate::metrics::EvaluationMetrics;
use crate::profile::SegmentProfile;
use crate::record::FeatureRecord;

/// Version written by [`SegmentationContext::save_model`].
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Everything produced by one successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationRun {
    pub records: Vec<FeatureRecord>,
    pub labels: Vec<SegmentLabel>,
    pub profiles: BTreeMap<SegmentLabel, SegmentProfile>,
    pub metrics: EvaluationMetrics,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelBlob {
    format_version: u32,
    strategy: Strategy,
    metrics: Option<EvaluationMetrics>,
    profiles: BTreeMap<SegmentLabel, SegmentProfile>,
    timestamp: Option<DateTime<Utc>>,
}

/// Strategy holder with run bookkeeping and persistence.
#[derive(Debug, Clone, Default)]
pub struct SegmentationContext {
    strategy: Strategy,
    last: Option<SegmentationRun>,
    /// Loaded from disk; has no batch.
    restored: Option<Restored>,
}

#[derive(Debug, Clone)]
struct Restored {
    profiles: BTreeMap<SegmentLabel, SegmentProfile>,
    metrics: Option<EvaluationMetrics>,
    timestamp: Option<DateTime<Utc>>,
}

impl SegmentationContext {
    /// Context with the default K-means strategy (seed 42).
    pub fn new() -> Self {
        Self::default()
    }

    /// Context with the given strategy.
    pub fn with_strategy(strategy: impl Into<Strategy>) -> Self {
        Self {
            strategy: strategy.into(),
            ..Self::default()
        }
    }

    /// Swap the algorithm. Results of earlier runs are kept.
    pub fn set_strategy(&mut self, strategy: impl Into<Strategy>) {
        let strategy = strategy.into();
        tracing::info!(algorithm = strategy.name(), "segmentation strategy set");
        self.strategy = strategy;
    }

    /// Active strategy.
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Last successful run, if any.
    pub fn last_run(&self) -> Option<&SegmentationRun> {
        self.last.as_ref()
    }

    /// Profiles of the last run, or of the loaded model.
    pub fn profiles(&self) -> Option<&BTreeMap<SegmentLabel, SegmentProfile>> {
        match (&self.last, &self.restored) {
            (Some(run), _) => Some(&run.profiles),
            (None, Some(restored)) => Some(&restored.profiles),
            (None, None) => None,
        }
    }

    /// Metrics of the last run, or of the loaded model.
    pub fn metrics(&self) -> Option<&EvaluationMetrics> {
        match (&self.last, &self.restored) {
            (Some(run), _) => Some(&run.metrics),
            (None, Some(restored)) => restored.metrics.as_ref(),
            (None, None) => None,
        }
    }

    /// When the current results were produced.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match (&self.last, &self.restored) {
            (Some(run), _) => Some(run.timestamp),
            (None, Some(restored)) => restored.timestamp,
            (None, None) => None,
        }
    }

    /// Segment and profile `records`, replacing the last run on success.
    pub fn run_segmentation(&mut self, records: &[FeatureRecord], k: usize) -> Result<&SegmentationRun> {
        let backup = self.strategy.clone();
        let outcome = self.strategy.segment(records, k).and_then(|segmentation| {
            let profiles = self.strategy.profile(records, &segmentation.labels)?;
            Ok((segmentation, profiles))
        });

        let (segmentation, profiles) = match outcome {
            Ok(done) => done,
            Err(e) => {
                self.strategy = backup;
                tracing::warn!(error = %e, n_rows = records.len(), k, "segmentation run failed");
                return Err(e);
            }
        };

        tracing::info!(
            algorithm = self.strategy.name(),
            n_rows = records.len(),
            n_segments = profiles.len(),
            "segmentation run complete"
        );

        self.restored = None;
        Ok(self.last.insert(SegmentationRun {
            records: records.to_vec(),
            labels: segmentation.labels,
            profiles,
            metrics: segmentation.metrics,
            timestamp: Utc::now(),
        }))
    }

    /// Segment of one record under the current fit.
    pub fn predict_segment(&self, record: &FeatureRecord) -> Result<SegmentLabel> {
        if self.last.is_none() && self.restored.is_none() {
            return Err(Error::NotFitted {
                component: "segmentation context",
            });
        }
        self.strategy.predict_one(record)
    }

    /// Serialize the fitted strategy, metrics and profiles.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let (profiles, metrics, timestamp) = match (&self.last, &self.restored) {
            (Some(run), _) => (run.profiles.clone(), Some(run.metrics.clone()), Some(run.timestamp)),
            (None, Some(r)) => (r.profiles.clone(), r.metrics.clone(), r.timestamp),
            (None, None) => (BTreeMap::new(), None, None),
        };
        let blob = ModelBlob {
            format_version: MODEL_FORMAT_VERSION,
            strategy: self.strategy.clone(),
            metrics,
            profiles,
            timestamp,
        };
        serde_json::to_vec_pretty(&blob).map_err(|e| Error::Serialization {
            field: "segmentation model".to_string(),
            message: e.to_string(),
        })
    }

    /// Restore from [`to_bytes`](Self::to_bytes) output. `self` is unchanged
    /// on error.
    pub fn from_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let blob = decode(bytes).map_err(|message| Error::persistence("<memory>", message))?;
        self.restore(blob);
        Ok(())
    }

    fn restore(&mut self, blob: ModelBlob) {
        self.strategy = blob.strategy;
        self.last = None;
        self.restored = Some(Restored {
            profiles: blob.profiles,
            metrics: blob.metrics,
            timestamp: blob.timestamp,
        });
    }

    /// Write the model blob to `path` atomically.
    pub fn save_model(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        write_atomic(path, &bytes)?;
        tracing::info!(path = %path.display(), algorithm = self.strategy.name(), "segmentation model saved");
        Ok(())
    }

    /// Replace the strategy and results with the blob at `path`.
    pub fn load_model(&mut self, path: &Path) -> Result<()> {
        let bytes = fs::read(path).map_err(|e| Error::persistence(path, e))?;
        let blob = decode(&bytes).map_err(|message| Error::persistence(path, message))?;
        self.restore(blob);
        tracing::info!(path = %path.display(), algorithm = self.strategy.name(), "segmentation model loaded");
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> std::result::Result<ModelBlob, String> {
    let blob: ModelBlob = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    if blob.format_version != MODEL_FORMAT_VERSION {
        return Err(format!(
            "unsupported format version {} (expected {MODEL_FORMAT_VERSION})",
            blob.format_version
        ));
    }
    Ok(blob)
}

/// Write to a sibling temp file, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let io_err = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    {
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }
    fs::rename(&tmp, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Dbscan, Hierarchical};

    fn blobs() -> Vec<FeatureRecord> {
        (0..8)
            .map(|i| {
                let base = if i < 4 { 0.0 } else { 10.0 };
                FeatureRecord::new(i)
                    .with("x", base + i as f64 * 0.1)
                    .with("y", base - i as f64 * 0.1)
                    .with("city", if i < 4 { "lyon" } else { "nice" })
            })
            .collect()
    }

    #[test]
    fn run_replaces_results_together() {
        let mut ctx = SegmentationContext::new();
        let run = ctx.run_segmentation(&blobs(), 2).unwrap();
        assert_eq!(run.labels.len(), 8);
        assert_eq!(run.profiles.len(), 2);
        assert_eq!(run.metrics.algorithm, "kmeans");
        assert!(ctx.predict_segment(&blobs()[0]).is_ok());
    }

    #[test]
    fn failed_run_leaves_context_untouched() {
        let mut ctx = SegmentationContext::new();
        let first = ctx.run_segmentation(&blobs(), 2).unwrap().clone();
        let strategy_before = ctx.strategy().clone();

        let err = ctx.run_segmentation(&blobs(), 50).unwrap_err();
        assert!(matches!(err, Error::InvalidClusterCount { .. }));
        assert_eq!(ctx.last_run(), Some(&first));
        assert_eq!(ctx.strategy(), &strategy_before);
    }

    #[test]
    fn predict_requires_a_run() {
        let ctx = SegmentationContext::new();
        assert!(matches!(
            ctx.predict_segment(&blobs()[0]),
            Err(Error::NotFitted { .. })
        ));
    }

    #[test]
    fn swapping_strategy_keeps_results() {
        let mut ctx = SegmentationContext::new();
        let _ = ctx.run_segmentation(&blobs(), 2).unwrap();
        ctx.set_strategy(Hierarchical::new());
        assert!(ctx.last_run().is_some());
        let run = ctx.run_segmentation(&blobs(), 2).unwrap();
        assert_eq!(run.metrics.algorithm, "hierarchical");

        ctx.set_strategy(Dbscan::new().with_min_samples(2));
        let run = ctx.run_segmentation(&blobs(), 99).unwrap();
        assert!(run.labels.iter().all(|l| *l >= 0));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let mut ctx = SegmentationContext::new();
        let labels = ctx.run_segmentation(&blobs(), 2).unwrap().labels.clone();
        ctx.save_model(&path).unwrap();

        let mut loaded = SegmentationContext::new();
        loaded.load_model(&path).unwrap();
        for (r, l) in blobs().iter().zip(&labels) {
            assert_eq!(loaded.predict_segment(r).unwrap(), *l);
        }
        assert_eq!(loaded.profiles(), ctx.profiles());
        assert_eq!(loaded.metrics(), ctx.metrics());
        assert_eq!(loaded.timestamp(), ctx.timestamp());
    }

    #[test]
    fn bad_blobs_fail_with_persistence_and_change_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = SegmentationContext::new();
        let _ = ctx.run_segmentation(&blobs(), 2).unwrap();
        let before = ctx.strategy().clone();

        let missing = dir.path().join("missing.json");
        assert!(matches!(ctx.load_model(&missing), Err(Error::Persistence { .. })));

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, b"{not json").unwrap();
        assert!(matches!(ctx.load_model(&corrupt), Err(Error::Persistence { .. })));
        assert!(matches!(ctx.from_bytes(b"{not json"), Err(Error::Persistence { .. })));

        let future = dir.path().join("future.json");
        let mut blob: serde_json::Value = serde_json::from_slice(&ctx.to_bytes().unwrap()).unwrap();
        blob["format_version"] = serde_json::json!(99);
        fs::write(&future, serde_json::to_vec(&blob).unwrap()).unwrap();
        assert!(matches!(ctx.load_model(&future), Err(Error::Persistence { .. })));
        let err = ctx.from_bytes(&serde_json::to_vec(&blob).unwrap()).unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));
        assert!(err.to_string().contains("unsupported format version"), "{err}");

        assert_eq!(ctx.strategy(), &before);
        assert!(ctx.last_run().is_some());
    }
}
