//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file)
//! is a valid configuration:
//!
//! ```toml
//! [embedding]
//! dim = 256
//!
//! [strategy]
//! algorithm = "hierarchical"
//! n_segments = 8
//!
//! [store]
//! model_dir = "/var/lib/cohort/models"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cluster::StrategyConfig;
use crate::embed::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::preprocess::PreprocessConfig;
use crate::reduce::ReducerConfig;

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the fitted artifacts and profile table.
    pub model_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
        }
    }
}

/// `[train]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Free-text fields embedded together with the skills.
    pub text_fields: Vec<String>,
    /// Categorical field naming a segment's industry.
    pub industry_field: String,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            text_fields: vec!["title".to_string(), "description".to_string()],
            industry_field: "industry".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortConfig {
    pub preprocess: PreprocessConfig,
    pub embedding: EmbeddingConfig,
    pub reducer: ReducerConfig,
    pub strategy: StrategyConfig,
    pub store: StoreConfig,
    pub train: TrainConfig,
}

impl CohortConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| Error::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
