//! Raw records and the numeric feature matrix built from them.
//!
//! A [`FeatureRecord`] is one entity's attributes as read from the feature
//! source. A [`FeatureMatrix`] is the fixed-width numeric view used by the
//! reducer and the clustering strategies. The matrix keeps the entity id of
//! every row so that dropped records never shift the surviving ones.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque entity identifier, numeric or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    /// Numeric id.
    Num(i64),
    /// String id.
    Text(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Num(n) => write!(f, "{n}"),
            EntityId::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        EntityId::Num(n)
    }
}

impl From<i32> for EntityId {
    fn from(n: i32) -> Self {
        EntityId::Num(i64::from(n))
    }
}

impl From<usize> for EntityId {
    fn from(n: usize) -> Self {
        EntityId::Num(n as i64)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId::Text(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        EntityId::Text(s)
    }
}

/// One raw attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Numeric value.
    Number(f64),
    /// Categorical (or unparsed) string value.
    Category(String),
    /// List of strings, e.g. skills.
    List(Vec<String>),
    /// No value.
    Missing,
}

static MISSING: FieldValue = FieldValue::Missing;

impl FieldValue {
    /// Coerce to a finite number. Strings are parsed; anything else is `None`.
    pub fn as_number(&self) -> Option<f64> {
        let v = match self {
            FieldValue::Number(v) => *v,
            FieldValue::Category(s) => s.trim().parse::<f64>().ok()?,
            FieldValue::List(_) | FieldValue::Missing => return None,
        };
        v.is_finite().then_some(v)
    }

    /// String form of a scalar value.
    pub fn as_category(&self) -> Option<String> {
        match self {
            FieldValue::Category(s) if !s.is_empty() => Some(s.clone()),
            FieldValue::Number(v) if v.is_finite() => Some(v.to_string()),
            _ => None,
        }
    }

    /// True for [`FieldValue::Missing`].
    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Category(s.to_string())
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        FieldValue::List(v)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(v: Vec<&str>) -> Self {
        FieldValue::List(v.into_iter().map(str::to_string).collect())
    }
}

/// One entity's raw attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Entity identifier, unique within a batch.
    pub id: EntityId,
    /// Named attribute values.
    pub fields: BTreeMap<String, FieldValue>,
}

impl FeatureRecord {
    /// Create a record with no fields.
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        let _ = self.fields.insert(name.into(), value.into());
        self
    }

    /// Field value, [`FieldValue::Missing`] when absent.
    pub fn get(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&MISSING)
    }
}

/// Whether a column name denotes an identifier or timestamp.
///
/// Such columns never carry clustering signal and are skipped when numeric
/// features are selected.
pub fn is_identifier_or_timestamp(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    matches!(
        name.as_str(),
        "id" | "uuid" | "timestamp" | "date" | "created" | "updated"
    ) || name.ends_with("_id")
        || name.ends_with("_uuid")
        || name.ends_with("_at")
        || name.ends_with("_date")
        || name.ends_with("_timestamp")
}

/// Fixed-width numeric rows with column names and per-row entity ids.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    ids: Vec<EntityId>,
    data: Array2<f64>,
    index: HashMap<EntityId, usize>,
}

impl FeatureMatrix {
    /// Build a matrix; `ids.len()` must equal the row count and ids must be unique.
    pub fn new(columns: Vec<String>, ids: Vec<EntityId>, data: Array2<f64>) -> Result<Self> {
        if data.ncols() != columns.len() {
            return Err(Error::DimensionMismatch {
                expected: columns.len(),
                found: data.ncols(),
            });
        }
        if data.nrows() != ids.len() {
            return Err(Error::DimensionMismatch {
                expected: ids.len(),
                found: data.nrows(),
            });
        }
        let mut index = HashMap::with_capacity(ids.len());
        for (row, id) in ids.iter().enumerate() {
            if index.insert(id.clone(), row).is_some() {
                return Err(Error::InvalidParameter {
                    name: "ids",
                    message: "entity ids must be unique",
                });
            }
        }
        Ok(Self {
            columns,
            ids,
            data,
            index,
        })
    }

    /// Build from row vectors.
    pub fn from_rows(columns: Vec<String>, ids: Vec<EntityId>, rows: &[Vec<f64>]) -> Result<Self> {
        let d = columns.len();
        let mut flat = Vec::with_capacity(rows.len() * d);
        for row in rows {
            if row.len() != d {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    found: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }
        let data = Array2::from_shape_vec((rows.len(), d), flat).map_err(|_| {
            Error::DimensionMismatch {
                expected: d,
                found: rows.first().map_or(0, Vec::len),
            }
        })?;
        Self::new(columns, ids, data)
    }

    /// A zero-row matrix with the given columns.
    pub fn empty(columns: Vec<String>) -> Self {
        let d = columns.len();
        Self {
            columns,
            ids: Vec::new(),
            data: Array2::zeros((0, d)),
            index: HashMap::new(),
        }
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Row entity ids, in row order.
    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    /// Underlying data.
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.data.ncols()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    /// Row by position.
    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.data.row(i)
    }

    /// Row position of an entity.
    pub fn position(&self, id: &EntityId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Row of an entity.
    pub fn row_of(&self, id: &EntityId) -> Option<ArrayView1<'_, f64>> {
        self.position(id).map(|i| self.data.row(i))
    }

    /// Fail unless the column set equals `expected` exactly (names and order).
    pub fn ensure_columns(&self, expected: &[String]) -> Result<()> {
        if self.columns != expected {
            return Err(Error::SchemaMismatch {
                expected: expected.to_vec(),
                found: self.columns.clone(),
            });
        }
        Ok(())
    }

    /// Concatenate columns of two matrices over the same ids in the same order.
    pub fn hstack(&self, other: &FeatureMatrix) -> Result<FeatureMatrix> {
        if self.ids != other.ids {
            return Err(Error::DimensionMismatch {
                expected: self.n_rows(),
                found: other.n_rows(),
            });
        }
        let data = ndarray::concatenate(Axis(1), &[self.data.view(), other.data.view()])
            .map_err(|_| Error::DimensionMismatch {
                expected: self.n_rows(),
                found: other.n_rows(),
            })?;
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        FeatureMatrix::new(columns, self.ids.clone(), data)
    }

    /// Row `i` as a record with one numeric field per column.
    pub fn record_at(&self, i: usize) -> FeatureRecord {
        let fields = self
            .columns
            .iter()
            .zip(self.data.row(i).iter())
            .map(|(c, &v)| (c.clone(), FieldValue::Number(v)))
            .collect();
        FeatureRecord {
            id: self.ids[i].clone(),
            fields,
        }
    }

    /// All rows as records, in row order.
    pub fn to_records(&self) -> Vec<FeatureRecord> {
        (0..self.n_rows()).map(|i| self.record_at(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercion_parses_numeric_strings_and_rejects_garbage() {
        assert_eq!(FieldValue::from(" 4.5 ").as_number(), Some(4.5));
        assert_eq!(FieldValue::from("senior").as_number(), None);
        assert_eq!(FieldValue::Number(f64::NAN).as_number(), None);
        assert_eq!(FieldValue::Missing.as_number(), None);
    }

    #[test]
    fn absent_field_reads_as_missing() {
        let r = FeatureRecord::new(1).with("age", 30.0);
        assert!(r.get("skills").is_missing());
        assert_eq!(r.get("age").as_number(), Some(30.0));
    }

    #[test]
    fn identifier_convention() {
        for name in ["id", "candidate_id", "created_at", "hire_date", "UUID"] {
            assert!(is_identifier_or_timestamp(name), "{name}");
        }
        for name in ["age", "salary", "valid", "idle_time"] {
            assert!(!is_identifier_or_timestamp(name), "{name}");
        }
    }

    #[test]
    fn matrix_keeps_id_index() {
        let m = FeatureMatrix::from_rows(
            vec!["a".into(), "b".into()],
            vec![EntityId::from(7), EntityId::from("x")],
            &[vec![1.0, 2.0], vec![3.0, 4.0]],
        )
        .unwrap();
        assert_eq!(m.position(&EntityId::from("x")), Some(1));
        assert_eq!(m.row_of(&EntityId::from(7)).unwrap()[1], 2.0);
        assert!(m.position(&EntityId::from(99)).is_none());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let res = FeatureMatrix::from_rows(
            vec!["a".into()],
            vec![EntityId::from(1), EntityId::from(1)],
            &[vec![1.0], vec![2.0]],
        );
        assert!(res.is_err());
    }

    #[test]
    fn hstack_requires_same_ids() {
        let a = FeatureMatrix::from_rows(vec!["a".into()], vec![1.into()], &[vec![1.0]]).unwrap();
        let b = FeatureMatrix::from_rows(vec!["b".into()], vec![1.into()], &[vec![2.0]]).unwrap();
        let c = FeatureMatrix::from_rows(vec!["c".into()], vec![2.into()], &[vec![3.0]]).unwrap();

        let ab = a.hstack(&b).unwrap();
        assert_eq!(ab.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(ab.row(0).to_vec(), vec![1.0, 2.0]);
        assert!(a.hstack(&c).is_err());
    }

    #[test]
    fn schema_check_is_exact() {
        let m = FeatureMatrix::empty(vec!["a".into(), "b".into()]);
        assert!(m.ensure_columns(&["a".into(), "b".into()]).is_ok());
        assert!(matches!(
            m.ensure_columns(&["b".into(), "a".into()]),
            Err(Error::SchemaMismatch { .. })
        ));
    }
}
