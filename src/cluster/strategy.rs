//! Closed set of strategies, dispatched by enum.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::dbscan::Dbscan;
use super::hierarchical::{Hierarchical, Linkage};
use super::kmeans::KMeans;
use super::traits::{Assignment, SegmentationStrategy, Segmentation};
use super::SegmentLabel;
use crate::error::Result;
use crate::record::FeatureRecord;

/// Algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// [`KMeans`].
    #[default]
    #[serde(rename = "kmeans", alias = "k_means")]
    KMeans,
    /// [`Hierarchical`].
    Hierarchical,
    /// [`Dbscan`].
    Dbscan,
}

impl std::str::FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kmeans" | "k_means" | "k-means" => Ok(Self::KMeans),
            "hierarchical" => Ok(Self::Hierarchical),
            "dbscan" => Ok(Self::Dbscan),
            other => Err(format!("unknown algorithm `{other}`")),
        }
    }
}

/// `[strategy]` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub algorithm: Algorithm,
    /// Target segment count for partition methods.
    pub n_segments: usize,
    pub seed: u64,
    pub n_init: usize,
    pub max_iter: usize,
    pub linkage: Linkage,
    /// DBSCAN radius; estimated when absent.
    pub eps: Option<f64>,
    pub min_samples: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::KMeans,
            n_segments: 5,
            seed: 42,
            n_init: 10,
            max_iter: 300,
            linkage: Linkage::Ward,
            eps: None,
            min_samples: 5,
        }
    }
}

/// Any supported segmentation strategy, fitted or not.
///
/// Serialized with an `algorithm` tag so a saved model names its own kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Strategy {
    #[serde(rename = "kmeans", alias = "k_means")]
    KMeans(KMeans),
    Hierarchical(Hierarchical),
    Dbscan(Dbscan),
}

impl Default for Strategy {
    fn default() -> Self {
        Self::KMeans(KMeans::new().with_seed(42))
    }
}

impl From<KMeans> for Strategy {
    fn from(s: KMeans) -> Self {
        Self::KMeans(s)
    }
}

impl From<Hierarchical> for Strategy {
    fn from(s: Hierarchical) -> Self {
        Self::Hierarchical(s)
    }
}

impl From<Dbscan> for Strategy {
    fn from(s: Dbscan) -> Self {
        Self::Dbscan(s)
    }
}

impl Strategy {
    /// Unfit strategy built from configuration.
    pub fn from_config(config: &StrategyConfig) -> Self {
        match config.algorithm {
            Algorithm::KMeans => KMeans::new()
                .with_seed(config.seed)
                .with_n_init(config.n_init)
                .with_max_iter(config.max_iter)
                .into(),
            Algorithm::Hierarchical => Hierarchical::new().with_linkage(config.linkage).into(),
            Algorithm::Dbscan => {
                let dbscan = Dbscan::new().with_min_samples(config.min_samples);
                match config.eps {
                    Some(eps) => dbscan.with_eps(eps).into(),
                    None => dbscan.into(),
                }
            }
        }
    }

    /// Selector of the wrapped strategy.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::KMeans(_) => Algorithm::KMeans,
            Self::Hierarchical(_) => Algorithm::Hierarchical,
            Self::Dbscan(_) => Algorithm::Dbscan,
        }
    }

    fn inner(&self) -> &dyn SegmentationStrategy {
        match self {
            Self::KMeans(s) => s,
            Self::Hierarchical(s) => s,
            Self::Dbscan(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn SegmentationStrategy {
        match self {
            Self::KMeans(s) => s,
            Self::Hierarchical(s) => s,
            Self::Dbscan(s) => s,
        }
    }
}

impl SegmentationStrategy for Strategy {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn description(&self) -> &'static str {
        self.inner().description()
    }

    fn segment(&mut self, records: &[FeatureRecord], target: usize) -> Result<Segmentation> {
        self.inner_mut().segment(records, target)
    }

    fn is_fitted(&self) -> bool {
        self.inner().is_fitted()
    }

    fn feature_columns(&self) -> Result<&[String]> {
        self.inner().feature_columns()
    }

    fn centroids(&self) -> Result<BTreeMap<SegmentLabel, Vec<f64>>> {
        self.inner().centroids()
    }

    fn assign(&self, record: &FeatureRecord) -> Result<Assignment> {
        self.inner().assign(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_selects_algorithm() {
        for algorithm in [Algorithm::KMeans, Algorithm::Hierarchical, Algorithm::Dbscan] {
            let config = StrategyConfig {
                algorithm,
                ..StrategyConfig::default()
            };
            assert_eq!(Strategy::from_config(&config).algorithm(), algorithm);
        }
        assert_eq!("k-means".parse::<Algorithm>().unwrap(), Algorithm::KMeans);
        assert!("spectral".parse::<Algorithm>().is_err());

        let config: StrategyConfig = toml::from_str("algorithm = \"kmeans\"\nn_segments = 3").unwrap();
        assert_eq!(config.algorithm, Algorithm::KMeans);
        assert_eq!(config.n_segments, 3);
    }

    #[test]
    fn fitted_strategy_survives_json() {
        let records: Vec<FeatureRecord> = (0..6)
            .map(|i| FeatureRecord::new(i).with("x", if i < 3 { i as f64 } else { 20.0 + i as f64 }))
            .collect();
        let mut strategy = Strategy::default();
        let run = strategy.segment(&records, 2).unwrap();

        let json = serde_json::to_string(&strategy).unwrap();
        assert!(json.contains("\"algorithm\":\"kmeans\""));
        let back: Strategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, strategy);
        for (r, l) in records.iter().zip(&run.labels) {
            assert_eq!(back.predict_one(r).unwrap(), *l);
        }
    }
}
