//! Feature preprocessing: heterogeneous records to a clean numeric matrix.
//!
//! Three column families are handled:
//!
//! | Family | Imputation | Encoding |
//! |--------|------------|----------|
//! | Numeric | column median | standard scaling |
//! | Categorical | `"unknown"` | one-hot, unseen -> all zeros |
//! | Skills (list of strings) | empty text | TF-IDF over a capped vocabulary |
//!
//! All statistics come from the fit corpus only; transform applies them as-is,
//! which is what makes "fit offline, apply online" work.
//!
//! TF-IDF weighting uses the smoothed inverse document frequency
//!
//! ```text
//! idf(t) = ln((1 + n) / (1 + df(t))) + 1
//! ```
//!
//! and each row is L2-normalized.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::{is_identifier_or_timestamp, EntityId, FeatureMatrix, FeatureRecord, FieldValue};

/// Placeholder category for missing categorical values.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Column roles for preprocessing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureSchema {
    /// Numeric columns.
    pub numeric: Vec<String>,
    /// Categorical columns.
    pub categorical: Vec<String>,
    /// List-of-strings skills column.
    pub skills: Option<String>,
}

impl FeatureSchema {
    /// Infer column roles from a corpus.
    ///
    /// A field is numeric when every present value coerces to a number,
    /// categorical when its values are scalars otherwise. The skills field is
    /// used when any record carries it. Identifier and timestamp fields and
    /// other list-valued fields are left out.
    pub fn infer(records: &[FeatureRecord], skills_field: &str) -> Self {
        let names: BTreeSet<&str> = records
            .iter()
            .flat_map(|r| r.fields.keys().map(String::as_str))
            .collect();

        let mut schema = FeatureSchema::default();
        for name in names {
            if name == skills_field {
                schema.skills = Some(name.to_string());
                continue;
            }
            if is_identifier_or_timestamp(name) {
                continue;
            }
            let present: Vec<&FieldValue> = records
                .iter()
                .map(|r| r.get(name))
                .filter(|v| !v.is_missing())
                .collect();
            if present.is_empty() || present.iter().any(|v| matches!(v, FieldValue::List(_))) {
                continue;
            }
            if present.iter().all(|v| v.as_number().is_some()) {
                schema.numeric.push(name.to_string());
            } else {
                schema.categorical.push(name.to_string());
            }
        }
        schema
    }
}

/// Preprocessor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Explicit schema; inferred from the fit corpus when `None`.
    pub schema: Option<FeatureSchema>,
    /// Name of the skills field used during inference.
    pub skills_field: String,
    /// Vocabulary cap for the skills TF-IDF.
    pub max_tfidf_terms: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            schema: None,
            skills_field: "skills".to_string(),
            max_tfidf_terms: 100,
        }
    }
}

/// Why a record was dropped from a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Id already seen earlier in the batch.
    DuplicateId,
    /// A list where a scalar was expected.
    UnexpectedList {
        /// Offending field.
        field: String,
    },
    /// A number where the skills list was expected.
    UnexpectedScalar {
        /// Offending field.
        field: String,
    },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::DuplicateId => write!(f, "duplicate id"),
            RejectReason::UnexpectedList { field } => write!(f, "list value in scalar field '{field}'"),
            RejectReason::UnexpectedScalar { field } => {
                write!(f, "numeric value in list field '{field}'")
            }
        }
    }
}

/// A record excluded from the output matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    /// Entity id.
    pub id: EntityId,
    /// Reason.
    pub reason: RejectReason,
}

/// Result of transforming a batch.
#[derive(Debug, Clone)]
pub struct PreprocessOutput {
    /// One row per retained record, in input order.
    pub matrix: FeatureMatrix,
    /// Joined skills per retained record, parallel to matrix rows.
    pub skills_text: Vec<String>,
    /// Records that were dropped.
    pub rejected: Vec<RejectedRecord>,
}

/// Unfitted preprocessor.
#[derive(Debug, Clone, Default)]
pub struct FeaturePreprocessor {
    config: PreprocessConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NumericStats {
    name: String,
    median: f64,
    mean: f64,
    scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CategoricalEncoding {
    name: String,
    categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TfIdfVocabulary {
    field: String,
    terms: Vec<String>,
    idf: Vec<f64>,
}

/// Fitted preprocessing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPreprocessor {
    schema: FeatureSchema,
    numeric: Vec<NumericStats>,
    categorical: Vec<CategoricalEncoding>,
    tfidf: Option<TfIdfVocabulary>,
    columns: Vec<String>,
}

impl FeaturePreprocessor {
    /// Create with the given configuration.
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Fit imputation, scaling, encoding and vocabulary on a corpus.
    pub fn fit(&self, records: &[FeatureRecord]) -> Result<FittedPreprocessor> {
        let schema = self
            .config
            .schema
            .clone()
            .unwrap_or_else(|| FeatureSchema::infer(records, &self.config.skills_field));

        let (kept, rejected) = partition_records(records, &schema);
        if !rejected.is_empty() {
            tracing::warn!(rejected = rejected.len(), "records rejected during preprocessor fit");
        }
        if kept.is_empty() {
            return Err(Error::EmptyCorpus);
        }

        let numeric = schema
            .numeric
            .iter()
            .map(|name| fit_numeric(name, &kept))
            .collect::<Vec<_>>();

        let categorical = schema
            .categorical
            .iter()
            .map(|name| {
                let categories: BTreeSet<String> =
                    kept.iter().map(|r| category_of(r, name)).collect();
                CategoricalEncoding {
                    name: name.clone(),
                    categories: categories.into_iter().collect(),
                }
            })
            .collect::<Vec<_>>();

        let tfidf = schema.skills.as_ref().map(|field| {
            let docs: Vec<String> = kept.iter().map(|r| skills_text(r, field)).collect();
            fit_tfidf(field, &docs, self.config.max_tfidf_terms)
        });

        let mut columns: Vec<String> = numeric.iter().map(|s| s.name.clone()).collect();
        for enc in &categorical {
            columns.extend(enc.categories.iter().map(|c| format!("{}={}", enc.name, c)));
        }
        if let Some(v) = &tfidf {
            columns.extend(v.terms.iter().map(|t| format!("{}:{}", v.field, t)));
        }

        tracing::info!(
            n_rows = kept.len(),
            numeric = numeric.len(),
            categorical = categorical.len(),
            vocabulary = tfidf.as_ref().map_or(0, |v| v.terms.len()),
            width = columns.len(),
            "fitted feature preprocessor"
        );

        Ok(FittedPreprocessor {
            schema,
            numeric,
            categorical,
            tfidf,
            columns,
        })
    }
}

impl FittedPreprocessor {
    /// Output column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Schema used at fit time.
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Transform a batch. Rejected records are reported, not fatal.
    pub fn transform(&self, records: &[FeatureRecord]) -> Result<PreprocessOutput> {
        let (kept, rejected) = partition_records(records, &self.schema);
        for r in &rejected {
            tracing::warn!(id = %r.id, reason = %r.reason, "record excluded from feature matrix");
        }

        let width = self.columns.len();
        let mut data = Array2::<f64>::zeros((kept.len(), width));
        let mut ids = Vec::with_capacity(kept.len());
        let mut texts = Vec::with_capacity(kept.len());

        for (i, record) in kept.iter().enumerate() {
            let mut col = 0;
            for stats in &self.numeric {
                let v = record.get(&stats.name).as_number().unwrap_or(stats.median);
                data[[i, col]] = (v - stats.mean) / stats.scale;
                col += 1;
            }
            for enc in &self.categorical {
                let value = category_of(record, &enc.name);
                if let Ok(pos) = enc.categories.binary_search(&value) {
                    data[[i, col + pos]] = 1.0;
                }
                col += enc.categories.len();
            }
            let text = self
                .schema
                .skills
                .as_ref()
                .map(|field| skills_text(record, field))
                .unwrap_or_default();
            if let Some(vocab) = &self.tfidf {
                for (j, w) in vocab.weights(&text) {
                    data[[i, col + j]] = w;
                }
            }
            ids.push(record.id.clone());
            texts.push(text);
        }

        // Ids were deduplicated by `partition_records`.
        let matrix = FeatureMatrix::new(self.columns.clone(), ids, data)?;

        Ok(PreprocessOutput {
            matrix,
            skills_text: texts,
            rejected,
        })
    }
}

impl TfIdfVocabulary {
    /// Non-zero (column, weight) pairs for a document, L2-normalized.
    fn weights(&self, text: &str) -> Vec<(usize, f64)> {
        let mut tf: HashMap<usize, f64> = HashMap::new();
        for token in tokenize(text) {
            if let Ok(j) = self.terms.binary_search(&token) {
                *tf.entry(j).or_insert(0.0) += 1.0;
            }
        }
        let mut out: Vec<(usize, f64)> = tf.into_iter().map(|(j, c)| (j, c * self.idf[j])).collect();
        let norm = out.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, w) in &mut out {
                *w /= norm;
            }
        }
        out.sort_by_key(|(j, _)| *j);
        out
    }
}

/// Join a record's skills with single spaces. Absent or empty -> "".
pub fn skills_text(record: &FeatureRecord, field: &str) -> String {
    match record.get(field) {
        FieldValue::List(items) => items
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        FieldValue::Category(s) => s.trim().to_string(),
        FieldValue::Number(_) | FieldValue::Missing => String::new(),
    }
}

/// Lowercase word tokens of at least two characters.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

fn category_of(record: &FeatureRecord, name: &str) -> String {
    record
        .get(name)
        .as_category()
        .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string())
}

fn fit_numeric(name: &str, records: &[&FeatureRecord]) -> NumericStats {
    let mut present: Vec<f64> = records
        .iter()
        .filter_map(|r| r.get(name).as_number())
        .collect();
    let median = median(&mut present);
    let imputed: Vec<f64> = records
        .iter()
        .map(|r| r.get(name).as_number().unwrap_or(median))
        .collect();
    let n = imputed.len() as f64;
    let mean = imputed.iter().sum::<f64>() / n;
    let var = imputed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    NumericStats {
        name: name.to_string(),
        median,
        mean,
        scale: if std > 0.0 { std } else { 1.0 },
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn fit_tfidf(field: &str, docs: &[String], max_terms: usize) -> TfIdfVocabulary {
    let mut df: BTreeMap<String, usize> = BTreeMap::new();
    for doc in docs {
        let unique: HashSet<String> = tokenize(doc).into_iter().collect();
        for term in unique {
            *df.entry(term).or_insert(0) += 1;
        }
    }

    // Highest document frequency first; alphabetical among ties.
    let mut ranked: Vec<(String, usize)> = df.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(max_terms);
    ranked.sort_by(|a, b| a.0.cmp(&b.0));

    let n = docs.len() as f64;
    let idf = ranked
        .iter()
        .map(|(_, d)| ((1.0 + n) / (1.0 + *d as f64)).ln() + 1.0)
        .collect();
    TfIdfVocabulary {
        field: field.to_string(),
        terms: ranked.into_iter().map(|(t, _)| t).collect(),
        idf,
    }
}

fn check_record(record: &FeatureRecord, schema: &FeatureSchema) -> Option<RejectReason> {
    for name in schema.numeric.iter().chain(&schema.categorical) {
        if matches!(record.get(name), FieldValue::List(_)) {
            return Some(RejectReason::UnexpectedList { field: name.clone() });
        }
    }
    if let Some(field) = &schema.skills {
        if matches!(record.get(field), FieldValue::Number(_)) {
            return Some(RejectReason::UnexpectedScalar {
                field: field.clone(),
            });
        }
    }
    None
}

fn partition_records<'a>(
    records: &'a [FeatureRecord],
    schema: &FeatureSchema,
) -> (Vec<&'a FeatureRecord>, Vec<RejectedRecord>) {
    let mut seen: HashSet<&EntityId> = HashSet::with_capacity(records.len());
    let mut kept = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for record in records {
        let reason = if seen.contains(&record.id) {
            Some(RejectReason::DuplicateId)
        } else {
            check_record(record, schema)
        };
        match reason {
            Some(reason) => rejected.push(RejectedRecord {
                id: record.id.clone(),
                reason,
            }),
            None => {
                let _ = seen.insert(&record.id);
                kept.push(record);
            }
        }
    }
    (kept, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<FeatureRecord> {
        vec![
            FeatureRecord::new(1)
                .with("experience_years", 2.0)
                .with("location", "berlin")
                .with("skills", vec!["rust", "sql"]),
            FeatureRecord::new(2)
                .with("experience_years", 10.0)
                .with("location", "paris")
                .with("skills", vec!["python", "sql"]),
            FeatureRecord::new(3)
                .with("experience_years", FieldValue::Missing)
                .with("location", FieldValue::Missing)
                .with("skills", vec!["rust", "kubernetes"]),
            FeatureRecord::new(4)
                .with("experience_years", "6")
                .with("location", "berlin")
                .with("created_at", "2024-01-01"),
        ]
    }

    #[test]
    fn schema_inference_skips_identifiers() {
        let schema = FeatureSchema::infer(&corpus(), "skills");
        assert_eq!(schema.numeric, vec!["experience_years".to_string()]);
        assert_eq!(schema.categorical, vec!["location".to_string()]);
        assert_eq!(schema.skills.as_deref(), Some("skills"));
    }

    #[test]
    fn fit_on_empty_corpus_fails() {
        let res = FeaturePreprocessor::default().fit(&[]);
        assert!(matches!(res, Err(Error::EmptyCorpus)));
    }

    #[test]
    fn empty_transform_yields_zero_rows() {
        let fitted = FeaturePreprocessor::default().fit(&corpus()).unwrap();
        let out = fitted.transform(&[]).unwrap();
        assert_eq!(out.matrix.n_rows(), 0);
        assert_eq!(out.matrix.n_cols(), fitted.columns().len());
    }

    #[test]
    fn numeric_median_imputation_and_scaling() {
        let fitted = FeaturePreprocessor::default().fit(&corpus()).unwrap();
        let out = fitted.transform(&corpus()).unwrap();
        let col: Vec<f64> = out.matrix.data().column(0).to_vec();
        // Median of {2, 10, 6} is 6, so record 3 imputes to the same value as record 4.
        assert!((col[2] - col[3]).abs() < 1e-12);
        let mean = col.iter().sum::<f64>() / col.len() as f64;
        assert!(mean.abs() < 1e-9);
    }

    #[test]
    fn unseen_category_encodes_as_zeros() {
        let fitted = FeaturePreprocessor::default().fit(&corpus()).unwrap();
        let probe = FeatureRecord::new(9).with("location", "tokyo");
        let out = fitted.transform(&[probe]).unwrap();
        let row = out.matrix.row(0);
        for (name, v) in fitted.columns().iter().zip(row.iter()) {
            if name.starts_with("location=") {
                assert_eq!(*v, 0.0, "{name}");
            }
        }
    }

    #[test]
    fn missing_skills_field_gives_empty_text_and_keeps_row() {
        let fitted = FeaturePreprocessor::default().fit(&corpus()).unwrap();
        let out = fitted.transform(&corpus()).unwrap();
        assert_eq!(out.matrix.n_rows(), 4);
        assert_eq!(out.skills_text[3], "");
        assert_eq!(out.skills_text[0], "rust sql");
    }

    #[test]
    fn vocabulary_cap_and_oov_terms() {
        let pre = FeaturePreprocessor::new(PreprocessConfig {
            max_tfidf_terms: 2,
            ..Default::default()
        });
        let fitted = pre.fit(&corpus()).unwrap();
        let terms: Vec<&String> = fitted
            .columns()
            .iter()
            .filter(|c| c.starts_with("skills:"))
            .collect();
        // rust and sql both appear twice; the cap keeps those two.
        assert_eq!(terms, vec!["skills:rust", "skills:sql"]);

        let out = fitted.transform(&[FeatureRecord::new(5).with("skills", vec!["cobol"])]).unwrap();
        let n_numeric = fitted.columns().len() - 2;
        assert!(out.matrix.row(0).iter().skip(n_numeric).all(|v| *v == 0.0));
    }

    #[test]
    fn rejected_records_do_not_shift_survivors() {
        let fitted = FeaturePreprocessor::default().fit(&corpus()).unwrap();
        let batch = vec![
            FeatureRecord::new(1).with("experience_years", 1.0),
            FeatureRecord::new(2).with("location", vec!["a", "b"]),
            FeatureRecord::new(1).with("experience_years", 3.0),
            FeatureRecord::new(3).with("experience_years", 4.0),
        ];
        let out = fitted.transform(&batch).unwrap();
        assert_eq!(out.rejected.len(), 2);
        assert_eq!(out.matrix.ids(), &[EntityId::from(1), EntityId::from(3)]);
        assert_eq!(out.skills_text.len(), 2);
    }

    #[test]
    fn transform_is_idempotent() {
        let fitted = FeaturePreprocessor::default().fit(&corpus()).unwrap();
        let a = fitted.transform(&corpus()).unwrap();
        let b = fitted.transform(&corpus()).unwrap();
        assert_eq!(a.matrix, b.matrix);
        assert_eq!(a.skills_text, b.skills_text);
    }

    #[test]
    fn fitted_state_roundtrips_through_json() {
        let fitted = FeaturePreprocessor::default().fit(&corpus()).unwrap();
        let json = serde_json::to_string(&fitted).unwrap();
        let back: FittedPreprocessor = serde_json::from_str(&json).unwrap();
        assert_eq!(fitted, back);
    }
}
