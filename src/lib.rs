//! # cohort
//!
//! Audience segmentation: candidate and job-ad records are embedded, reduced
//! to a low-dimensional manifold, clustered by an interchangeable strategy,
//! and described by segment profiles with a confidence score per assignment.
//!
//! | Stage | Module |
//! |-------|--------|
//! | Tabular preprocessing (impute, scale, one-hot, TF-IDF) | [`preprocess`] |
//! | Text embedding | [`embed`] |
//! | Laplacian eigenmaps reduction | [`reduce`] |
//! | K-means / hierarchical / DBSCAN | [`cluster`] |
//! | Segment + profile as one step, save/load | [`context`] |
//! | Segment profiles and confidence | [`profile`] |
//! | Silhouette, Calinski-Harabasz, inertia | [`metrics`] |
//! | Model directory and record source | [`store`] |
//! | Loaded models, inference, health | [`service`], [`health`] |
//! | Offline fit of every artifact | [`train`] |

pub mod cluster;
pub mod config;
pub mod context;
pub mod embed;
/// Error types used across `cohort`.
pub mod error;
pub mod health;
pub mod metrics;
pub mod preprocess;
pub mod profile;
pub mod record;
pub mod reduce;
pub mod service;
pub mod store;
pub mod train;

pub use cluster::{
    Algorithm, Dbscan, Hierarchical, KMeans, Linkage, SegmentLabel, SegmentationStrategy,
    Strategy, StrategyConfig, OUTLIER,
};
pub use config::CohortConfig;
pub use context::SegmentationContext;
pub use embed::{load_embedder, Embedder, HashedEmbedder};
pub use error::{Error, Result};
pub use health::{HealthReport, HealthStatus};
pub use metrics::EvaluationMetrics;
pub use preprocess::{FeaturePreprocessor, FittedPreprocessor};
pub use profile::{assignment_confidence, AudienceProfile, ProfileTable, SegmentProfile};
pub use record::{EntityId, FeatureMatrix, FeatureRecord, FieldValue};
pub use reduce::{FittedReducer, SpectralReducer};
pub use service::{AudienceInference, SegmentationService};
pub use store::{FeatureSource, FsModelStore, JsonFeatureSource};
pub use train::{train_models, TrainingSummary};
