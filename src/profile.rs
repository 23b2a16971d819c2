//! Cluster profiling: what each segment looks like, and how sure an
//! assignment is.
//!
//! Two views of a segment live here:
//!
//! - [`SegmentProfile`]: the statistical summary recomputed on every run
//!   (size, numeric moments, top categorical values).
//! - [`AudienceProfile`]: the human-facing description persisted in the
//!   profile table and served by inference.
//!
//! # Confidence
//!
//! ```text
//! confidence = clamp(1 - d / D, 0, 1)   if D > 0
//!            = 1 / (1 + d)              otherwise
//! ```
//!
//! where `d` is the distance to the assigned centroid and `D` the segment's
//! characteristic distance (mean member distance to its centroid).

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cluster::{SegmentLabel, SegmentationStrategy, OUTLIER};
use crate::error::{Error, Result};
use crate::record::{is_identifier_or_timestamp, FeatureRecord, FieldValue};

/// Top values kept per categorical field.
pub const DEFAULT_TOP_N: usize = 5;

/// Moments of one numeric feature within a segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub mean: f64,
    /// Sample standard deviation; 0 for a single value.
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl NumericSummary {
    fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = if values.len() > 1 {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        Some(Self {
            mean,
            std,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// One categorical value and its frequency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// Statistical summary of one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentProfile {
    pub label: SegmentLabel,
    /// Members in the batch.
    pub size: usize,
    /// Share of the batch, in percent.
    pub percentage: f64,
    /// Per numeric feature, over present values.
    pub numeric: BTreeMap<String, NumericSummary>,
    /// Per categorical or list feature, most frequent values first.
    pub categorical: BTreeMap<String, Vec<ValueCount>>,
}

impl SegmentProfile {
    /// Most frequent value of a categorical field.
    pub fn top_value(&self, field: &str) -> Option<&str> {
        self.categorical
            .get(field)
            .and_then(|counts| counts.first())
            .map(|vc| vc.value.as_str())
    }
}

/// Profile every segment of a labeled batch.
///
/// `numeric_columns` are summarized as numbers; every other non-identifier
/// field is counted as categorical, list items individually. Outliers are
/// not profiled.
pub fn profile_segments(
    records: &[FeatureRecord],
    labels: &[SegmentLabel],
    numeric_columns: &[String],
    top_n: usize,
) -> Result<BTreeMap<SegmentLabel, SegmentProfile>> {
    if records.len() != labels.len() {
        return Err(Error::DimensionMismatch {
            expected: records.len(),
            found: labels.len(),
        });
    }
    let total = records.len();

    let mut members: BTreeMap<SegmentLabel, Vec<&FeatureRecord>> = BTreeMap::new();
    for (record, &label) in records.iter().zip(labels) {
        if label == OUTLIER {
            continue;
        }
        members.entry(label).or_default().push(record);
    }

    let mut profiles = BTreeMap::new();
    for (label, group) in members {
        let numeric = numeric_columns
            .iter()
            .filter_map(|col| {
                let values: Vec<f64> = group.iter().filter_map(|r| r.get(col).as_number()).collect();
                NumericSummary::of(&values).map(|s| (col.clone(), s))
            })
            .collect();

        let mut counts: BTreeMap<String, HashMap<String, usize>> = BTreeMap::new();
        for record in &group {
            for (name, value) in &record.fields {
                if numeric_columns.contains(name) || is_identifier_or_timestamp(name) {
                    continue;
                }
                let slot = counts.entry(name.clone()).or_default();
                match value {
                    FieldValue::Category(s) if !s.is_empty() => *slot.entry(s.clone()).or_insert(0) += 1,
                    FieldValue::List(items) => {
                        for item in items.iter().filter(|i| !i.is_empty()) {
                            *slot.entry(item.clone()).or_insert(0) += 1;
                        }
                    }
                    _ => {}
                }
            }
        }
        let categorical = counts
            .into_iter()
            .filter(|(_, c)| !c.is_empty())
            .map(|(name, c)| (name, top_values(c, top_n)))
            .collect();

        let size = group.len();
        profiles.insert(
            label,
            SegmentProfile {
                label,
                size,
                percentage: 100.0 * size as f64 / total as f64,
                numeric,
                categorical,
            },
        );
    }
    Ok(profiles)
}

/// Count desc, then value asc.
fn top_values(counts: HashMap<String, usize>, top_n: usize) -> Vec<ValueCount> {
    let mut sorted: Vec<ValueCount> = counts
        .into_iter()
        .map(|(value, count)| ValueCount { value, count })
        .collect();
    sorted.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    sorted.truncate(top_n);
    sorted
}

/// Mean distance of each segment's members to the segment centroid.
pub fn characteristic_distances<S: SegmentationStrategy + ?Sized>(
    strategy: &S,
    records: &[FeatureRecord],
    labels: &[SegmentLabel],
) -> Result<BTreeMap<SegmentLabel, f64>> {
    if records.len() != labels.len() {
        return Err(Error::DimensionMismatch {
            expected: records.len(),
            found: labels.len(),
        });
    }
    let mut sums: BTreeMap<SegmentLabel, (f64, usize)> = BTreeMap::new();
    for (record, &label) in records.iter().zip(labels) {
        if label == OUTLIER {
            continue;
        }
        let assignment = strategy.assign(record)?;
        let entry = sums.entry(label).or_insert((0.0, 0));
        entry.0 += assignment.distance;
        entry.1 += 1;
    }
    Ok(sums
        .into_iter()
        .map(|(label, (sum, n))| (label, sum / n as f64))
        .collect())
}

/// Confidence of an assignment at `distance` from its centroid.
pub fn assignment_confidence(distance: f64, characteristic: Option<f64>) -> f64 {
    let distance = distance.max(0.0);
    match characteristic {
        Some(d) if d > 0.0 && d.is_finite() => (1.0 - distance / d).clamp(0.0, 1.0),
        _ => 1.0 / (1.0 + distance),
    }
}

/// Human-facing description of one segment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudienceProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characteristic_distance: Option<f64>,
}

impl AudienceProfile {
    /// Describe a segment from its statistics.
    ///
    /// Industry is the top `industry_field` value, skills the top
    /// `skills_field` values, keywords the top value of every other
    /// categorical field.
    pub fn from_segment(
        profile: &SegmentProfile,
        industry_field: &str,
        skills_field: &str,
        characteristic_distance: Option<f64>,
    ) -> Self {
        let industry = profile.top_value(industry_field).map(str::to_string);
        let skills: Vec<String> = profile
            .categorical
            .get(skills_field)
            .map(|c| c.iter().map(|vc| vc.value.clone()).collect())
            .unwrap_or_default();
        let keywords: Vec<String> = profile
            .categorical
            .iter()
            .filter(|(name, _)| name.as_str() != industry_field && name.as_str() != skills_field)
            .filter_map(|(_, c)| c.first().map(|vc| vc.value.clone()))
            .collect();

        let name = match &industry {
            Some(industry) => format!("Segment {} ({industry})", profile.label),
            None => format!("Segment {}", profile.label),
        };
        let description = format!(
            "{} members ({:.1}% of corpus){}",
            profile.size,
            profile.percentage,
            if skills.is_empty() {
                String::new()
            } else {
                format!("; top skills: {}", skills.join(", "))
            }
        );

        Self {
            name,
            description,
            industry,
            skills,
            keywords,
            characteristic_distance,
        }
    }
}

/// The persisted profile table, keyed by stringified segment label.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileTable(BTreeMap<String, AudienceProfile>);

impl ProfileTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from segment statistics and characteristic distances.
    pub fn from_segments(
        profiles: &BTreeMap<SegmentLabel, SegmentProfile>,
        distances: &BTreeMap<SegmentLabel, f64>,
        industry_field: &str,
        skills_field: &str,
    ) -> Self {
        Self(
            profiles
                .iter()
                .map(|(label, p)| {
                    let d = distances.get(label).copied();
                    (
                        label.to_string(),
                        AudienceProfile::from_segment(p, industry_field, skills_field, d),
                    )
                })
                .collect(),
        )
    }

    pub fn insert(&mut self, label: SegmentLabel, profile: AudienceProfile) {
        let _ = self.0.insert(label.to_string(), profile);
    }

    pub fn get(&self, label: SegmentLabel) -> Option<&AudienceProfile> {
        self.0.get(&label.to_string())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AudienceProfile)> {
        self.0.iter()
    }

    /// JSON form. A non-finite characteristic distance cannot be written;
    /// that field is dropped with a warning and the rest is kept.
    pub fn to_json(&self) -> Result<String> {
        let mut clean = self.clone();
        for (label, profile) in clean.0.iter_mut() {
            if let Some(d) = profile.characteristic_distance {
                if !d.is_finite() {
                    let err = Error::Serialization {
                        field: format!("{label}.characteristic_distance"),
                        message: format!("non-finite value {d}"),
                    };
                    tracing::warn!(error = %err, "skipping profile field");
                    profile.characteristic_distance = None;
                }
            }
        }
        serde_json::to_string_pretty(&clean).map_err(|e| Error::Serialization {
            field: "profiles".to_string(),
            message: e.to_string(),
        })
    }

    /// Parse the JSON form.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Read a table from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| Error::persistence(path, e))?;
        Self::from_json(&json).map_err(|e| Error::persistence(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::KMeans;

    fn batch() -> Vec<FeatureRecord> {
        vec![
            FeatureRecord::new(1)
                .with("years", 1.0)
                .with("industry", "retail")
                .with("skills", vec!["sql", "excel"]),
            FeatureRecord::new(2)
                .with("years", 3.0)
                .with("industry", "retail")
                .with("skills", vec!["sql"]),
            FeatureRecord::new(3)
                .with("years", 20.0)
                .with("industry", "energy")
                .with("skills", vec!["rust"]),
        ]
    }

    fn columns() -> Vec<String> {
        vec!["years".to_string()]
    }

    #[test]
    fn profiles_cover_every_labeled_record() {
        let profiles = profile_segments(&batch(), &[0, 0, 1], &columns(), DEFAULT_TOP_N).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles.values().map(|p| p.size).sum::<usize>(), 3);

        let p0 = &profiles[&0];
        assert!((p0.percentage - 200.0 / 3.0).abs() < 1e-9);
        let years = p0.numeric["years"];
        assert_eq!((years.mean, years.min, years.max), (2.0, 1.0, 3.0));
        assert!((years.std - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(p0.top_value("industry"), Some("retail"));
        assert_eq!(
            p0.categorical["skills"],
            vec![
                ValueCount { value: "sql".into(), count: 2 },
                ValueCount { value: "excel".into(), count: 1 },
            ]
        );
        assert_eq!(profiles[&1].numeric["years"].std, 0.0);
    }

    #[test]
    fn outliers_are_not_profiled() {
        let profiles = profile_segments(&batch(), &[0, 0, OUTLIER], &columns(), 5).unwrap();
        assert_eq!(profiles.len(), 1);
        assert!(profile_segments(&batch(), &[0, 0], &columns(), 5).is_err());
    }

    #[test]
    fn ties_break_alphabetically() {
        let mut counts = HashMap::new();
        counts.insert("b".to_string(), 2);
        counts.insert("a".to_string(), 2);
        counts.insert("c".to_string(), 3);
        let top: Vec<String> = top_values(counts, 2).into_iter().map(|v| v.value).collect();
        assert_eq!(top, vec!["c", "a"]);
    }

    #[test]
    fn confidence_bounds() {
        assert_eq!(assignment_confidence(0.0, Some(2.0)), 1.0);
        assert_eq!(assignment_confidence(1.0, Some(2.0)), 0.5);
        assert_eq!(assignment_confidence(5.0, Some(2.0)), 0.0);
        assert_eq!(assignment_confidence(1.0, None), 0.5);
        assert_eq!(assignment_confidence(1.0, Some(0.0)), 0.5);
    }

    #[test]
    fn audience_profile_from_segment() {
        let profiles = profile_segments(&batch(), &[0, 0, 1], &columns(), 5).unwrap();
        let audience = AudienceProfile::from_segment(&profiles[&0], "industry", "skills", Some(0.4));
        assert_eq!(audience.industry.as_deref(), Some("retail"));
        assert_eq!(audience.skills, vec!["sql", "excel"]);
        assert!(audience.name.contains("retail"));
        assert_eq!(audience.characteristic_distance, Some(0.4));
    }

    #[test]
    fn characteristic_distance_is_mean_member_distance() {
        let records = batch();
        let mut kmeans = KMeans::new().with_seed(3);
        let run = kmeans.segment(&records, 2).unwrap();
        let d = characteristic_distances(&kmeans, &records, &run.labels).unwrap();
        assert_eq!(d.len(), 2);
        // The singleton segment sits on its centroid.
        assert!(d[&run.labels[2]].abs() < 1e-9);
    }

    #[test]
    fn table_json_uses_string_keys_and_drops_non_finite() {
        let mut table = ProfileTable::new();
        table.insert(
            0,
            AudienceProfile {
                name: "A".into(),
                characteristic_distance: Some(f64::NAN),
                ..AudienceProfile::default()
            },
        );
        table.insert(
            1,
            AudienceProfile {
                name: "B".into(),
                characteristic_distance: Some(0.5),
                ..AudienceProfile::default()
            },
        );
        let json = table.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["0"].get("characteristic_distance").is_none());
        assert_eq!(value["1"]["characteristic_distance"], 0.5);

        // Unknown industry is written as null, not dropped.
        assert!(value["0"]["industry"].is_null());
        assert!(value["0"].as_object().unwrap().contains_key("industry"));

        let back = ProfileTable::from_json(&json).unwrap();
        assert_eq!(back.get(1).unwrap().name, "B");
        assert_eq!(back.len(), 2);
    }
}
