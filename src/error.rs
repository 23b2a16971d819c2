use std::path::PathBuf;

use thiserror::Error;

/// Result alias for `cohort`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the segmentation pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// A fit was attempted on zero rows.
    #[error("cannot fit on an empty corpus")]
    EmptyCorpus,

    /// A fit needs more rows than were supplied.
    #[error("corpus too small: {n_rows} rows, at least {required} required")]
    CorpusTooSmall {
        /// Rows supplied.
        n_rows: usize,
        /// Minimum rows for the fit.
        required: usize,
    },

    /// No usable numeric columns remain after excluding identifiers and timestamps.
    #[error("no usable numeric feature columns")]
    NoFeatureColumns,

    /// Profile or prediction requested before a fit.
    #[error("{component} is not fitted; run segmentation first")]
    NotFitted {
        /// Component that was queried.
        component: &'static str,
    },

    /// No fitted reducer is available.
    #[error("dimensionality reducer unavailable: {reason}")]
    ReducerUnavailable {
        /// Why it could not be loaded.
        reason: String,
    },

    /// No fitted strategy is available.
    #[error("segmentation strategy unavailable: {reason}")]
    StrategyUnavailable {
        /// Why it could not be loaded.
        reason: String,
    },

    /// The embedding model failed to load; nothing downstream can run.
    #[error("embedding model unavailable: {reason}")]
    EmbeddingUnavailable {
        /// Why it could not be loaded.
        reason: String,
    },

    /// A persisted blob is missing, corrupt, or of an unknown version.
    #[error("failed to load {path}: {message}")]
    Persistence {
        /// Blob location.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// A value could not be represented in the serialized form.
    #[error("cannot serialize {field}: {message}")]
    Serialization {
        /// Field that failed.
        field: String,
        /// What went wrong.
        message: String,
    },

    /// Column set differs from the fit-time schema.
    #[error("schema mismatch: expected columns {expected:?}, found {found:?}")]
    SchemaMismatch {
        /// Fit-time columns.
        expected: Vec<String>,
        /// Columns supplied.
        found: Vec<String>,
    },

    /// Vector width differs from the expected width.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Found dimension.
        found: usize,
    },

    /// Invalid number of clusters requested.
    #[error("cannot create {requested} clusters from {n_items} items")]
    InvalidClusterCount {
        /// Requested count.
        requested: usize,
        /// Number of items.
        n_items: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: &'static str,
    },

    /// Configuration could not be read or parsed.
    #[error("invalid configuration {path}: {message}")]
    Config {
        /// Config file.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Filesystem failure outside of blob loading.
    #[error("i/o error at {path}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Build a [`Error::Persistence`] from any displayable cause.
    pub(crate) fn persistence(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        Error::Persistence {
            path: path.into(),
            message: cause.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_structured_fields() {
        let err = Error::InvalidClusterCount {
            requested: 5,
            n_items: 2,
        };
        assert_eq!(err.to_string(), "cannot create 5 clusters from 2 items");

        let err = Error::NotFitted {
            component: "kmeans",
        };
        assert!(err.to_string().contains("kmeans"));
    }
}
