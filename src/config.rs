//! Pipeline configuration, loadable from a TOML file

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::{default_sources, SourceDescriptor};
use crate::error::PipelineError;
use crate::model::KMeansSettings;
use crate::scores::TOTAL_SCORE;

/// Top-level configuration. Every key is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Case-insensitive token that marks an item column
    pub marker: String,
    /// Requested number of clusters (clamped to the row count)
    pub clusters: usize,
    /// Tier labels from the lowest to the highest tier
    pub tiers: Vec<String>,
    /// Highest score a single item can award
    pub max_points_per_item: f64,
    /// Column regressed on the items for the importance ranking
    pub importance_target: String,
    /// Candidate sources in preference order
    pub sources: Vec<SourceDescriptor>,
    pub kmeans: KMeansSettings,
}

fn default_tiers() -> Vec<String> {
    vec![
        "needs attention".to_string(),
        "developing".to_string(),
        "proficient".to_string(),
    ]
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            marker: "soal".to_string(),
            clusters: 3,
            tiers: default_tiers(),
            max_points_per_item: 5.0,
            importance_target: TOTAL_SCORE.to_string(),
            sources: default_sources(),
            kmeans: KMeansSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Read and validate a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.marker.trim().is_empty() {
            return Err(PipelineError::config("marker must not be empty"));
        }
        if self.clusters == 0 {
            return Err(PipelineError::InvalidClusterCount(self.clusters));
        }
        if self.tiers.is_empty() {
            return Err(PipelineError::config("at least one tier label is required"));
        }
        if !(self.max_points_per_item.is_finite() && self.max_points_per_item > 0.0) {
            return Err(PipelineError::config("max_points_per_item must be positive"));
        }
        if self.importance_target.trim().is_empty() {
            return Err(PipelineError::config("importance_target must not be empty"));
        }
        if self.kmeans.n_runs == 0 {
            return Err(PipelineError::config("kmeans.n_runs must be at least 1"));
        }
        if self.kmeans.max_iterations == 0 {
            return Err(PipelineError::config("kmeans.max_iterations must be at least 1"));
        }
        if !(self.kmeans.tolerance.is_finite() && self.kmeans.tolerance > 0.0) {
            return Err(PipelineError::config("kmeans.tolerance must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SourceFormat;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.marker, "soal");
        assert_eq!(config.clusters, 3);
        assert_eq!(config.tiers.len(), 3);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.kmeans.seed, 42);
        assert_eq!(config.kmeans.n_runs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            marker = "question"
            clusters = 2

            [kmeans]
            seed = 7

            [[sources]]
            format = "csv"
            path = "responses.csv"
            "#,
        )
        .unwrap();

        assert_eq!(config.marker, "question");
        assert_eq!(config.clusters, 2);
        assert_eq!(config.kmeans.seed, 7);
        assert_eq!(config.kmeans.n_runs, 10);
        assert_eq!(config.tiers, default_tiers());
        assert_eq!(
            config.sources,
            vec![SourceDescriptor::new(SourceFormat::Csv, "responses.csv")]
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(PipelineConfig::from_toml_str("clusters = 0").is_err());
        assert!(PipelineConfig::from_toml_str("marker = \"  \"").is_err());
        assert!(PipelineConfig::from_toml_str("tiers = []").is_err());
        assert!(PipelineConfig::from_toml_str("[kmeans]\ntolerance = -1.0").is_err());
        assert!(PipelineConfig::from_toml_str("clusters = \"three\"").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "tiers = [\"low\", \"high\"]").unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.tiers, vec!["low", "high"]);
        assert!(PipelineConfig::from_file(Path::new("/nonexistent.toml")).is_err());
    }
}
