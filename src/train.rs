//! Offline training: fit every artifact the service loads.
//!
//! ```text
//! records ─► preprocessor fit ─► item text ─► embedding ─► reducer fit
//!                                                              │
//!        profile table ◄─ profiles ◄─ segmentation ◄─ reduced rows
//! ```
//!
//! Inference embeds one free-text item and follows the same path from the
//! embedding on, so training embeds exactly the text an item would carry:
//! its configured text fields plus its skills.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::cluster::{SegmentationStrategy, Strategy};
use crate::config::CohortConfig;
use crate::context::SegmentationContext;
use crate::embed::{embed_matrix, load_embedder};
use crate::error::{Error, Result};
use crate::metrics::EvaluationMetrics;
use crate::preprocess::{skills_text, FeaturePreprocessor};
use crate::profile::{characteristic_distances, ProfileTable};
use crate::record::{EntityId, FeatureRecord, FieldValue};
use crate::reduce::SpectralReducer;
use crate::store::FsModelStore;

/// What a training run produced.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub n_records: usize,
    pub n_rejected: usize,
    pub n_segments: usize,
    pub n_components: usize,
    pub n_neighbors: usize,
    pub metrics: EvaluationMetrics,
    pub artifacts: Vec<PathBuf>,
}

/// Text embedded for one record: the text fields, then the skills.
pub fn item_text(record: &FeatureRecord, text_fields: &[String], skills_field: &str) -> String {
    text_fields
        .iter()
        .filter_map(|f| match record.get(f) {
            FieldValue::Category(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
        .chain(Some(skills_text(record, skills_field)).filter(|s| !s.is_empty()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reduced coordinates plus the source record's categorical and list fields,
/// so profiles can describe segments in source terms.
fn with_descriptive_fields(mut reduced: FeatureRecord, source: &FeatureRecord) -> FeatureRecord {
    for (name, value) in &source.fields {
        if matches!(value, FieldValue::Category(_) | FieldValue::List(_)) {
            let _ = reduced.fields.insert(name.clone(), value.clone());
        }
    }
    reduced
}

/// Fit preprocessor, reducer, strategy and profiles, and save them.
pub fn train_models(
    records: &[FeatureRecord],
    config: &CohortConfig,
    store: &FsModelStore,
) -> Result<TrainingSummary> {
    if records.is_empty() {
        return Err(Error::EmptyCorpus);
    }
    tracing::info!(n_records = records.len(), model_dir = %store.dir().display(), "training started");

    let preprocessor = FeaturePreprocessor::new(config.preprocess.clone()).fit(records)?;
    let prepared = preprocessor.transform(records)?;
    let n_rejected = prepared.rejected.len();

    let by_id: HashMap<&EntityId, &FeatureRecord> = records.iter().map(|r| (&r.id, r)).collect();
    let kept: Vec<&FeatureRecord> = prepared
        .matrix
        .ids()
        .iter()
        .filter_map(|id| by_id.get(id).copied())
        .collect();
    let skills_field = &config.preprocess.skills_field;
    let texts: Vec<String> = kept
        .iter()
        .map(|r| item_text(r, &config.train.text_fields, skills_field))
        .collect();

    let embedder = load_embedder(&config.embedding)?;
    let embedded = embed_matrix(embedder.as_ref(), prepared.matrix.ids(), &texts)?;

    let reducer = SpectralReducer::new(config.reducer.clone()).fit(&embedded)?;
    let reduced = reducer.transform(&embedded)?;

    let segment_records: Vec<FeatureRecord> = reduced
        .to_records()
        .into_iter()
        .zip(&kept)
        .map(|(r, source)| with_descriptive_fields(r, source))
        .collect();

    let n = segment_records.len();
    let mut k = config.strategy.n_segments;
    if k > n {
        tracing::warn!(requested = k, n_rows = n, "fewer records than segments; using one per record");
        k = n;
    }

    let mut context = SegmentationContext::with_strategy(Strategy::from_config(&config.strategy));
    let run = context.run_segmentation(&segment_records, k)?.clone();

    let distances = characteristic_distances(context.strategy(), &run.records, &run.labels)?;
    let table = ProfileTable::from_segments(
        &run.profiles,
        &distances,
        &config.train.industry_field,
        skills_field,
    );

    let artifacts = vec![
        store.save_preprocessor(&preprocessor)?,
        store.save_reducer(&reducer)?,
        store.save_strategy(context.strategy())?,
        store.save_profiles(&table)?,
    ];

    tracing::info!(
        n_records = n,
        n_rejected,
        n_segments = run.profiles.len(),
        algorithm = context.strategy().name(),
        silhouette = run.metrics.silhouette,
        "training complete"
    );

    Ok(TrainingSummary {
        n_records: n,
        n_rejected,
        n_segments: run.profiles.len(),
        n_components: reducer.n_components(),
        n_neighbors: reducer.n_neighbors(),
        metrics: run.metrics,
        artifacts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_text_joins_fields_then_skills() {
        let record = FeatureRecord::new(1)
            .with("title", " Data Engineer ")
            .with("description", "")
            .with("skills", vec!["sql", "spark"]);
        let fields = vec!["title".to_string(), "description".to_string()];
        assert_eq!(item_text(&record, &fields, "skills"), "Data Engineer sql spark");
        assert_eq!(item_text(&FeatureRecord::new(2), &fields, "skills"), "");
    }

    #[test]
    fn segmentation_record_keeps_only_descriptive_fields() {
        let source = FeatureRecord::new(7)
            .with("industry", "retail")
            .with("skills", vec!["sql"])
            .with("years", 4.0);
        let r = with_descriptive_fields(FeatureRecord::new(7).with("dim_0", 0.5), &source);
        assert_eq!(r.get("dim_0"), &FieldValue::Number(0.5));
        assert_eq!(r.get("industry"), &FieldValue::Category("retail".into()));
        assert!(r.get("years").is_missing());
    }

    #[test]
    fn empty_corpus_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsModelStore::new(dir.path());
        assert!(matches!(
            train_models(&[], &CohortConfig::default(), &store),
            Err(Error::EmptyCorpus)
        ));
    }
}
