//! Application state and request-scoped inference.
//!
//! [`SegmentationService`] is built once at startup and passed around; it
//! holds every loaded model behind one `RwLock<Arc<LoadedModels>>`. Readers
//! clone the `Arc` and work on that snapshot, so a concurrent
//! [`reload`](SegmentationService::reload) never tears a request: the new
//! models are loaded completely, then swapped in with one pointer write.
//!
//! # Degraded modes
//!
//! | Missing | Behavior |
//! |---------|----------|
//! | embedding | `infer` fails with [`Error::EmbeddingUnavailable`] |
//! | reducer | unreduced embedding is used, with a warning |
//! | strategy | null assignment, default primitives |
//! | profiles | assignment without profile primitives |

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cluster::{SegmentationStrategy, Strategy};
use crate::config::CohortConfig;
use crate::embed::{embedding_columns, load_embedder, Embedder};
use crate::error::{Error, Result};
use crate::health::{ComponentHealth, HealthReport, EMBEDDING_COMPONENT};
use crate::profile::{assignment_confidence, AudienceProfile, ProfileTable};
use crate::record::FeatureRecord;
use crate::reduce::{reduced_columns, FittedReducer};
use crate::store::FsModelStore;

/// One audience attribute derived from a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudiencePrimitive {
    pub category: String,
    pub value: String,
    pub confidence: Option<f64>,
}

impl AudiencePrimitive {
    fn new(category: &str, value: impl Into<String>, confidence: Option<f64>) -> Self {
        Self {
            category: category.to_string(),
            value: value.into(),
            confidence,
        }
    }
}

/// Response of [`SegmentationService::infer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudienceInference {
    pub derived_audience_primitives: Vec<AudiencePrimitive>,
    pub assigned_cluster_id: Option<String>,
    pub cluster_assignment_confidence: Option<f64>,
}

impl AudienceInference {
    /// Response when no segment can be assigned.
    pub fn degraded() -> Self {
        Self {
            derived_audience_primitives: default_primitives(),
            assigned_cluster_id: None,
            cluster_assignment_confidence: None,
        }
    }
}

/// Primitives served when no fitted segmentation is available.
pub fn default_primitives() -> Vec<AudiencePrimitive> {
    vec![
        AudiencePrimitive::new("industry", "general", None),
        AudiencePrimitive::new("interest", "career growth", None),
        AudiencePrimitive::new("interest", "job opportunities", None),
    ]
}

/// Primitives of a profile, each carrying the assignment confidence.
pub fn profile_primitives(profile: &AudienceProfile, confidence: f64) -> Vec<AudiencePrimitive> {
    let c = Some(confidence);
    profile
        .industry
        .iter()
        .map(|i| AudiencePrimitive::new("industry", i.clone(), c))
        .chain(profile.skills.iter().map(|s| AudiencePrimitive::new("skill", s.clone(), c)))
        .chain(profile.keywords.iter().map(|k| AudiencePrimitive::new("interest", k.clone(), c)))
        .collect()
}

/// Everything loaded from configuration and the model store.
#[derive(Debug)]
pub struct LoadedModels {
    pub embedder: Option<Arc<dyn Embedder>>,
    embedding_error: Option<String>,
    pub reducer: Option<FittedReducer>,
    pub strategy: Option<Strategy>,
    pub profiles: ProfileTable,
    pub health: HealthReport,
}

impl LoadedModels {
    /// Load every component; failures are recorded, never returned.
    pub fn load(config: &CohortConfig) -> Self {
        let store = FsModelStore::new(&config.store.model_dir);
        let mut health = HealthReport::new();

        let (embedder, embedding_error) = match load_embedder(&config.embedding) {
            Ok(e) => {
                health.add(ComponentHealth::loaded(EMBEDDING_COMPONENT));
                (Some(e), None)
            }
            Err(e) => {
                tracing::error!(error = %e, "embedding stage failed to load");
                health.add(ComponentHealth::failed(EMBEDDING_COMPONENT, e.to_string()));
                (None, Some(e.to_string()))
            }
        };

        let reducer = match store.load_reducer() {
            Ok(r) => {
                health.add(ComponentHealth::loaded("reducer"));
                Some(r)
            }
            Err(e) => {
                tracing::warn!(error = %e, "reducer not loaded; inference will use raw embeddings");
                health.add(ComponentHealth::degraded("reducer", e.to_string()));
                None
            }
        };

        let strategy = match store.load_strategy() {
            Ok(s) => {
                health.add(ComponentHealth::loaded("strategy"));
                Some(s)
            }
            Err(e) => {
                tracing::warn!(error = %e, "strategy not loaded; inference is degraded");
                health.add(ComponentHealth::failed("strategy", e.to_string()));
                None
            }
        };

        let profiles = match store.load_profiles() {
            Ok(p) if p.is_empty() => {
                health.add(ComponentHealth::degraded("profiles", "profile table is empty"));
                p
            }
            Ok(p) => {
                health.add(ComponentHealth::loaded("profiles"));
                p
            }
            Err(e) => {
                tracing::warn!(error = %e, "profile table not loaded");
                health.add(ComponentHealth::failed("profiles", e.to_string()));
                ProfileTable::new()
            }
        };

        tracing::info!(healthy = health.is_healthy(), "models loaded");
        Self {
            embedder,
            embedding_error,
            reducer,
            strategy,
            profiles,
            health,
        }
    }
}

/// Shared application state.
#[derive(Debug)]
pub struct SegmentationService {
    config: CohortConfig,
    models: RwLock<Arc<LoadedModels>>,
}

impl SegmentationService {
    /// Load all models. Never fails; check [`health`](Self::health).
    pub fn start(config: CohortConfig) -> Self {
        let models = LoadedModels::load(&config);
        Self {
            config,
            models: RwLock::new(Arc::new(models)),
        }
    }

    /// Reload from the store and swap atomically.
    pub fn reload(&self) -> HealthReport {
        let fresh = Arc::new(LoadedModels::load(&self.config));
        let report = fresh.health.clone();
        *self.models.write() = fresh;
        report
    }

    /// Current models; unaffected by later reloads.
    pub fn snapshot(&self) -> Arc<LoadedModels> {
        self.models.read().clone()
    }

    pub fn health(&self) -> HealthReport {
        self.snapshot().health.clone()
    }

    pub fn config(&self) -> &CohortConfig {
        &self.config
    }

    /// Assign a free-text item to a segment and derive its audience.
    pub fn infer(&self, text: &str) -> Result<AudienceInference> {
        infer_with(&self.snapshot(), text)
    }
}

/// [`SegmentationService::infer`] against a given snapshot.
pub fn infer_with(models: &LoadedModels, text: &str) -> Result<AudienceInference> {
    let Some(embedder) = &models.embedder else {
        return Err(Error::EmbeddingUnavailable {
            reason: models
                .embedding_error
                .clone()
                .unwrap_or_else(|| "embedding model not loaded".to_string()),
        });
    };
    let embedding: Vec<f64> = embedder.embed(text).into_iter().map(f64::from).collect();

    let Some(strategy) = &models.strategy else {
        tracing::warn!("no fitted strategy; returning default audience");
        return Ok(AudienceInference::degraded());
    };

    let (names, features) = match &models.reducer {
        Some(reducer) => match reducer.transform_row(&embedding) {
            Ok(reduced) => (reduced_columns(reduced.len()), reduced),
            Err(e) => {
                tracing::warn!(error = %e, "reducer rejected input; using raw embedding");
                (embedding_columns(embedding.len()), embedding)
            }
        },
        None => {
            tracing::warn!("no reducer loaded; using raw embedding");
            (embedding_columns(embedding.len()), embedding)
        }
    };

    let mut record = FeatureRecord::new("query");
    for (name, value) in names.into_iter().zip(features) {
        record = record.with(name, value);
    }

    // Columns are matched by name; a strategy fitted on another width or
    // stage cannot score the item.
    let columns = strategy.feature_columns()?;
    let scorable = columns.iter().filter(|c| record.fields.contains_key(*c)).count();
    if scorable != columns.len() || columns.len() != record.fields.len() {
        let err = Error::DimensionMismatch {
            expected: columns.len(),
            found: scorable,
        };
        tracing::warn!(error = %err, "strategy cannot score this input; returning default audience");
        return Ok(AudienceInference::degraded());
    }
    let assignment = strategy.assign(&record)?;
    let profile = models.profiles.get(assignment.label);
    let confidence =
        assignment_confidence(assignment.distance, profile.and_then(|p| p.characteristic_distance));

    tracing::debug!(
        label = assignment.label,
        distance = assignment.distance,
        confidence,
        "item assigned"
    );

    Ok(AudienceInference {
        derived_audience_primitives: profile
            .map(|p| profile_primitives(p, confidence))
            .unwrap_or_default(),
        assigned_cluster_id: Some(assignment.label.to_string()),
        cluster_assignment_confidence: Some(confidence),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{ComponentState, HealthStatus};

    fn config_in(dir: &std::path::Path) -> CohortConfig {
        let mut config = CohortConfig::default();
        config.store.model_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn empty_store_is_healthy_but_degraded_components() {
        let dir = tempfile::tempdir().unwrap();
        let service = SegmentationService::start(config_in(dir.path()));
        let health = service.health();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.state_of("reducer"), Some(ComponentState::Degraded));
        assert_eq!(health.state_of("strategy"), Some(ComponentState::Failed));

        let response = service.infer("rust developer").unwrap();
        assert_eq!(response, AudienceInference::degraded());
    }

    #[test]
    fn bad_embedding_config_fails_inference() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.embedding.model = "nonexistent".to_string();
        let service = SegmentationService::start(config);
        assert_eq!(service.health().status, HealthStatus::Degraded);
        assert!(matches!(
            service.infer("anything"),
            Err(Error::EmbeddingUnavailable { .. })
        ));
    }

    #[test]
    fn degraded_response_serializes_nulls() {
        let json = serde_json::to_value(AudienceInference::degraded()).unwrap();
        assert!(json["assigned_cluster_id"].is_null());
        assert!(json["cluster_assignment_confidence"].is_null());
        assert!(json["derived_audience_primitives"][0]["confidence"].is_null());
    }

    #[test]
    fn profile_primitives_carry_confidence() {
        let profile = AudienceProfile {
            name: "Data".into(),
            industry: Some("tech".into()),
            skills: vec!["sql".into(), "python".into()],
            keywords: vec!["remote".into()],
            ..AudienceProfile::default()
        };
        let primitives = profile_primitives(&profile, 0.8);
        let categories: Vec<&str> = primitives.iter().map(|p| p.category.as_str()).collect();
        assert_eq!(categories, vec!["industry", "skill", "skill", "interest"]);
        assert!(primitives.iter().all(|p| p.confidence == Some(0.8)));
    }

    #[test]
    fn wide_embeddings_are_scored_by_column_name() {
        use crate::cluster::KMeans;
        use crate::embed::{embed_matrix, HashedEmbedder};
        use crate::record::EntityId;

        let embedder: Arc<dyn Embedder> = Arc::new(HashedEmbedder::new(12, 7).unwrap());
        let texts: Vec<String> = ["sql spark", "patient care", "retail sales", "python pipelines"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let ids: Vec<EntityId> = (0..texts.len()).map(EntityId::from).collect();
        let matrix = embed_matrix(embedder.as_ref(), &ids, &texts).unwrap();
        let records = matrix.to_records();

        let mut kmeans = KMeans::new().with_seed(5);
        let labels = kmeans.segment(&records, 2).unwrap().labels;
        let models = LoadedModels {
            embedder: Some(embedder),
            embedding_error: None,
            reducer: None,
            strategy: Some(kmeans.into()),
            profiles: ProfileTable::new(),
            health: HealthReport::new(),
        };

        for (text, label) in texts.iter().zip(&labels) {
            let response = infer_with(&models, text).unwrap();
            assert_eq!(response.assigned_cluster_id, Some(label.to_string()));
        }
    }

    #[test]
    fn snapshot_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let service = SegmentationService::start(config_in(dir.path()));
        let before = service.snapshot();
        let _ = service.reload();
        assert!(!Arc::ptr_eq(&before, &service.snapshot()));
        assert!(before.embedder.is_some());
    }
}
