//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use crate::config::PipelineConfig;
use crate::data::SourceDescriptor;

/// How the report is written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Score student responses, segment students into performance tiers and
/// rank items
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Candidate input files, tried in order. The format follows the
    /// extension (.xlsx/.xls/.ods, .csv, .tsv). Defaults to data.xlsx, data.csv
    #[arg(short, long = "input")]
    pub inputs: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of clusters for K-Means (clamped to the number of students)
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Case-insensitive token that marks item columns
    #[arg(short, long)]
    pub marker: Option<String>,

    /// Show a single student's profile, e.g. "Student 3"
    #[arg(short, long)]
    pub student: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Candidate sources given on the command line, empty when none were
    pub fn sources(&self) -> anyhow::Result<Vec<SourceDescriptor>> {
        self.inputs
            .iter()
            .map(|path| {
                SourceDescriptor::from_path(path.clone()).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Cannot tell the format of {} (expected .xlsx, .xls, .ods, .csv or .tsv)",
                        path.display()
                    )
                })
            })
            .collect()
    }

    /// Configuration file (or defaults) with command-line overrides applied
    pub fn resolve_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };

        let sources = self.sources()?;
        if !sources.is_empty() {
            config.sources = sources;
        }
        if let Some(clusters) = self.clusters {
            config.clusters = clusters;
        }
        if let Some(marker) = &self.marker {
            config.marker = marker.clone();
        }

        config.validate().context("Invalid command-line options")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SourceFormat;

    #[test]
    fn test_defaults_without_flags() {
        let args = Args::try_parse_from(["scoreforge"]).unwrap();
        assert_eq!(args.format, OutputFormat::Text);

        let config = args.resolve_config().unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "scoreforge",
            "-i",
            "scores.tsv",
            "--input",
            "backup.csv",
            "-k",
            "2",
            "--marker",
            "question",
            "--student",
            "Student 4",
            "--format",
            "json",
        ])
        .unwrap();

        let config = args.resolve_config().unwrap();
        assert_eq!(config.clusters, 2);
        assert_eq!(config.marker, "question");
        assert_eq!(
            config.sources,
            vec![
                SourceDescriptor::new(SourceFormat::Tsv, "scores.tsv"),
                SourceDescriptor::new(SourceFormat::Csv, "backup.csv"),
            ]
        );
        assert_eq!(args.student.as_deref(), Some("Student 4"));
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_invalid_inputs() {
        let args = Args::try_parse_from(["scoreforge", "-i", "notes.txt"]).unwrap();
        assert!(args.resolve_config().is_err());

        let args = Args::try_parse_from(["scoreforge", "-k", "0"]).unwrap();
        assert!(args.resolve_config().is_err());

        assert!(Args::try_parse_from(["scoreforge", "-k", "three"]).is_err());
    }
}
