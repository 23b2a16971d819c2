//! Segmentation strategy trait.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::metrics::EvaluationMetrics;
use crate::profile::{profile_segments, SegmentProfile, DEFAULT_TOP_N};
use crate::record::FeatureRecord;

use super::SegmentLabel;

/// Output of [`SegmentationStrategy::segment`].
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    /// One label per input record, in input order.
    pub labels: Vec<SegmentLabel>,
    /// Quality of the run.
    pub metrics: EvaluationMetrics,
}

/// Segment assignment of a single record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    /// Assigned segment.
    pub label: SegmentLabel,
    /// Euclidean distance to the segment centroid, in scaled feature space.
    pub distance: f64,
}

/// A clustering algorithm with a fixed fit / profile / predict contract.
///
/// Lifecycle: a new instance is unfit. [`segment`](Self::segment) fits it;
/// calling it again refits and discards the previous state. Profiling and
/// prediction are only valid once fitted.
pub trait SegmentationStrategy {
    /// Short algorithm name.
    fn name(&self) -> &'static str;

    /// One-line description for reporting.
    fn description(&self) -> &'static str;

    /// Fit on `records` and return one label per record.
    ///
    /// `target_segment_count` is exact for partition methods and ignored by
    /// density methods.
    fn segment(
        &mut self,
        records: &[FeatureRecord],
        target_segment_count: usize,
    ) -> Result<Segmentation>;

    /// Whether a fit has completed.
    fn is_fitted(&self) -> bool;

    /// Numeric columns selected at fit time.
    fn feature_columns(&self) -> Result<&[String]>;

    /// Per-segment centroid in scaled feature space.
    fn centroids(&self) -> Result<BTreeMap<SegmentLabel, Vec<f64>>>;

    /// Assign one record without refitting. Missing features count as 0
    /// after scaling.
    fn assign(&self, record: &FeatureRecord) -> Result<Assignment>;

    /// Label of one record without refitting.
    fn predict_one(&self, record: &FeatureRecord) -> Result<SegmentLabel> {
        self.assign(record).map(|a| a.label)
    }

    /// Describe each segment of a labeled batch.
    fn profile(
        &self,
        records: &[FeatureRecord],
        labels: &[SegmentLabel],
    ) -> Result<BTreeMap<SegmentLabel, SegmentProfile>> {
        let columns = self.feature_columns()?;
        profile_segments(records, labels, columns, DEFAULT_TOP_N)
    }
}
