//! Numeric column selection and standard scaling shared by all strategies.

use std::collections::BTreeSet;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::record::{is_identifier_or_timestamp, FeatureRecord, FieldValue};

/// Fitted column selection plus zero-mean / unit-variance scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    columns: Vec<String>,
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl FeatureScaler {
    /// Numeric columns of a batch: every present value is a number.
    pub fn numeric_columns(records: &[FeatureRecord]) -> Vec<String> {
        let names: BTreeSet<&str> = records
            .iter()
            .flat_map(|r| r.fields.keys().map(String::as_str))
            .collect();
        names
            .into_iter()
            .filter(|name| !is_identifier_or_timestamp(name))
            .filter(|name| {
                let mut any = false;
                for r in records {
                    match r.get(name) {
                        FieldValue::Number(v) if v.is_finite() => any = true,
                        FieldValue::Missing => {}
                        _ => return false,
                    }
                }
                any
            })
            .map(str::to_string)
            .collect()
    }

    /// Select numeric columns, mean-impute, scale. Returns the scaled matrix.
    pub fn fit(records: &[FeatureRecord]) -> Result<(Self, Array2<f64>)> {
        if records.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        let columns = Self::numeric_columns(records);
        if columns.is_empty() {
            return Err(Error::NoFeatureColumns);
        }

        let n = records.len();
        let mut mean = Vec::with_capacity(columns.len());
        let mut scale = Vec::with_capacity(columns.len());
        for name in &columns {
            let present: Vec<f64> = records
                .iter()
                .filter_map(|r| r.get(name).as_number())
                .collect();
            let m = present.iter().sum::<f64>() / present.len() as f64;
            // Imputed rows sit at the mean and add nothing to the variance.
            let var = present.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n as f64;
            let std = var.sqrt();
            mean.push(m);
            scale.push(if std > 0.0 { std } else { 1.0 });
        }

        let scaler = Self {
            columns,
            mean,
            scale,
        };
        let data = scaler.transform_all(records);
        Ok((scaler, data))
    }

    /// Selected columns.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Scale one record; missing or non-numeric values become 0.
    pub fn transform(&self, record: &FeatureRecord) -> Array1<f64> {
        self.columns
            .iter()
            .enumerate()
            .map(|(j, name)| {
                record
                    .get(name)
                    .as_number()
                    .map_or(0.0, |v| (v - self.mean[j]) / self.scale[j])
            })
            .collect()
    }

    /// Scale a batch.
    pub fn transform_all(&self, records: &[FeatureRecord]) -> Array2<f64> {
        let mut data = Array2::zeros((records.len(), self.columns.len()));
        for (i, record) in records.iter().enumerate() {
            data.row_mut(i).assign(&self.transform(record));
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_numeric_and_skips_identifiers() {
        let records = vec![
            FeatureRecord::new(1)
                .with("candidate_id", 10.0)
                .with("age", 30.0)
                .with("city", "lyon")
                .with("score", FieldValue::Missing),
            FeatureRecord::new(2)
                .with("candidate_id", 11.0)
                .with("age", 40.0)
                .with("city", "nice")
                .with("score", 5.0),
        ];
        assert_eq!(
            FeatureScaler::numeric_columns(&records),
            vec!["age".to_string(), "score".to_string()]
        );
    }

    #[test]
    fn no_numeric_columns_is_an_error() {
        let records = vec![FeatureRecord::new(1).with("city", "lyon")];
        assert!(matches!(FeatureScaler::fit(&records), Err(Error::NoFeatureColumns)));
        assert!(matches!(FeatureScaler::fit(&[]), Err(Error::EmptyCorpus)));
    }

    #[test]
    fn scaled_columns_are_centered_and_missing_maps_to_zero() {
        let records = vec![
            FeatureRecord::new(1).with("x", 1.0),
            FeatureRecord::new(2).with("x", 3.0),
            FeatureRecord::new(3).with("x", FieldValue::Missing),
        ];
        let (scaler, data) = FeatureScaler::fit(&records).unwrap();
        assert!((data[[0, 0]] + data[[1, 0]]).abs() < 1e-12);
        assert_eq!(data[[2, 0]], 0.0);
        assert_eq!(scaler.transform(&FeatureRecord::new(9))[0], 0.0);
    }
}
