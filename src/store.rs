//! The two narrow interfaces to the outside world: a persisted-model store
//! and a tabular feature source.
//!
//! # Model directory
//!
//! | File | Kind | Missing or bad |
//! |------|------|----------------|
//! | `fitted_reducer.json` | `reducer` | [`Error::ReducerUnavailable`] |
//! | `fitted_kmeans.json` | `strategy` | [`Error::StrategyUnavailable`] |
//! | `fitted_preprocessor.json` | `preprocessor` | [`Error::Persistence`] |
//! | `cluster_profiles.json` | plain [`ProfileTable`] | [`Error::Persistence`] |
//!
//! Fitted artifacts are wrapped in an envelope naming their kind and format
//! version, so a file copied into the wrong slot is refused instead of
//! misread.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cluster::{SegmentationStrategy, Strategy};
use crate::context::write_atomic;
use crate::error::{Error, Result};
use crate::preprocess::FittedPreprocessor;
use crate::profile::ProfileTable;
use crate::record::{EntityId, FeatureRecord, FieldValue};
use crate::reduce::FittedReducer;

/// Envelope version written by this crate.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

pub const REDUCER_FILE: &str = "fitted_reducer.json";
pub const STRATEGY_FILE: &str = "fitted_kmeans.json";
pub const PREPROCESSOR_FILE: &str = "fitted_preprocessor.json";
pub const PROFILES_FILE: &str = "cluster_profiles.json";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    format_version: u32,
    kind: String,
    payload: T,
}

/// Model artifacts in one directory.
#[derive(Debug, Clone)]
pub struct FsModelStore {
    dir: PathBuf,
}

impl FsModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn save_artifact<T: Serialize>(&self, file: &str, kind: &str, payload: &T) -> Result<PathBuf> {
        let path = self.path(file);
        let envelope = Envelope {
            format_version: ARTIFACT_FORMAT_VERSION,
            kind: kind.to_string(),
            payload,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|e| Error::Serialization {
            field: kind.to_string(),
            message: e.to_string(),
        })?;
        write_atomic(&path, &bytes)?;
        tracing::info!(path = %path.display(), kind, "artifact saved");
        Ok(path)
    }

    /// Load an artifact; the error is a plain message for the caller to wrap.
    fn load_artifact<T: DeserializeOwned>(&self, file: &str, kind: &str) -> std::result::Result<T, String> {
        let path = self.path(file);
        let bytes = fs::read(&path).map_err(|e| format!("{}: {e}", path.display()))?;
        let envelope: Envelope<Value> =
            serde_json::from_slice(&bytes).map_err(|e| format!("{}: {e}", path.display()))?;
        if envelope.kind != kind {
            return Err(format!(
                "{}: holds a `{}` artifact, expected `{kind}`",
                path.display(),
                envelope.kind
            ));
        }
        if envelope.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(format!(
                "{}: unsupported format version {}",
                path.display(),
                envelope.format_version
            ));
        }
        serde_json::from_value(envelope.payload).map_err(|e| format!("{}: {e}", path.display()))
    }

    pub fn save_reducer(&self, reducer: &FittedReducer) -> Result<PathBuf> {
        self.save_artifact(REDUCER_FILE, "reducer", reducer)
    }

    pub fn load_reducer(&self) -> Result<FittedReducer> {
        self.load_artifact(REDUCER_FILE, "reducer")
            .map_err(|reason| Error::ReducerUnavailable { reason })
    }

    /// Save a fitted strategy. An unfit strategy cannot serve inference and
    /// is refused.
    pub fn save_strategy(&self, strategy: &Strategy) -> Result<PathBuf> {
        if !strategy.is_fitted() {
            return Err(Error::NotFitted {
                component: "segmentation strategy",
            });
        }
        self.save_artifact(STRATEGY_FILE, "strategy", strategy)
    }

    pub fn load_strategy(&self) -> Result<Strategy> {
        let strategy: Strategy = self
            .load_artifact(STRATEGY_FILE, "strategy")
            .map_err(|reason| Error::StrategyUnavailable { reason })?;
        if !strategy.is_fitted() {
            return Err(Error::StrategyUnavailable {
                reason: format!("{}: strategy is not fitted", self.path(STRATEGY_FILE).display()),
            });
        }
        Ok(strategy)
    }

    pub fn save_preprocessor(&self, preprocessor: &FittedPreprocessor) -> Result<PathBuf> {
        self.save_artifact(PREPROCESSOR_FILE, "preprocessor", preprocessor)
    }

    pub fn load_preprocessor(&self) -> Result<FittedPreprocessor> {
        let path = self.path(PREPROCESSOR_FILE);
        self.load_artifact(PREPROCESSOR_FILE, "preprocessor")
            .map_err(|message| Error::Persistence { path, message })
    }

    pub fn save_profiles(&self, profiles: &ProfileTable) -> Result<PathBuf> {
        let path = self.path(PROFILES_FILE);
        write_atomic(&path, profiles.to_json()?.as_bytes())?;
        tracing::info!(path = %path.display(), n_profiles = profiles.len(), "profile table saved");
        Ok(path)
    }

    pub fn load_profiles(&self) -> Result<ProfileTable> {
        ProfileTable::load(&self.path(PROFILES_FILE))
    }
}

/// Tabular source of candidate records.
pub trait FeatureSource {
    fn fetch(&self) -> Result<Vec<FeatureRecord>>;
}

impl FeatureSource for Vec<FeatureRecord> {
    fn fetch(&self) -> Result<Vec<FeatureRecord>> {
        Ok(self.clone())
    }
}

/// JSON array of flat objects, one per record.
///
/// Numbers become [`FieldValue::Number`], strings [`FieldValue::Category`],
/// arrays of strings [`FieldValue::List`] and nulls [`FieldValue::Missing`].
/// Objects without a usable id, or with nested values, are skipped with a
/// warning.
#[derive(Debug, Clone)]
pub struct JsonFeatureSource {
    path: PathBuf,
    id_field: String,
}

impl JsonFeatureSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            id_field: "id".to_string(),
        }
    }

    /// Field holding the entity id.
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Parse records from a JSON string.
    pub fn parse(&self, json: &str) -> Result<Vec<FeatureRecord>> {
        let rows: Vec<serde_json::Map<String, Value>> =
            serde_json::from_str(json).map_err(|e| Error::persistence(&self.path, e))?;
        let mut records = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            match record_from_object(row, &self.id_field) {
                Ok(record) => records.push(record),
                Err(reason) => tracing::warn!(index, %reason, "skipping source row"),
            }
        }
        Ok(records)
    }
}

impl FeatureSource for JsonFeatureSource {
    fn fetch(&self) -> Result<Vec<FeatureRecord>> {
        let json = fs::read_to_string(&self.path).map_err(|source| Error::Io {
            path: self.path.clone(),
            source,
        })?;
        let records = self.parse(&json)?;
        tracing::info!(path = %self.path.display(), n_records = records.len(), "records fetched");
        Ok(records)
    }
}

fn record_from_object(mut row: serde_json::Map<String, Value>, id_field: &str) -> std::result::Result<FeatureRecord, String> {
    let id = match row.remove(id_field) {
        Some(Value::Number(n)) => match n.as_i64() {
            Some(n) => EntityId::Num(n),
            None => EntityId::Text(n.to_string()),
        },
        Some(Value::String(s)) if !s.is_empty() => EntityId::Text(s),
        _ => return Err(format!("missing id field `{id_field}`")),
    };

    let mut record = FeatureRecord::new(id);
    for (name, value) in row {
        let value = match value {
            Value::Null => FieldValue::Missing,
            Value::Number(n) => n.as_f64().map_or(FieldValue::Missing, FieldValue::Number),
            Value::String(s) => FieldValue::Category(s),
            Value::Bool(b) => FieldValue::Category(b.to_string()),
            Value::Array(items) => FieldValue::List(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(s),
                        other => Err(format!("field `{name}` has non-string item {other}")),
                    })
                    .collect::<std::result::Result<_, _>>()?,
            ),
            Value::Object(_) => return Err(format!("field `{name}` is a nested object")),
        };
        let _ = record.fields.insert(name, value);
    }
    Ok(record)
}
