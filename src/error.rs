//! Error types for the scoring pipeline.

use polars::prelude::PolarsError;
use thiserror::Error;

use crate::data::LoadAttempt;

/// Failure of a pipeline run.
///
/// Every variant is recoverable at the pipeline boundary: a run either
/// returns a complete report or exactly one of these.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no data source could be loaded ({} attempted)", .attempts.len())]
    SourceUnavailable { attempts: Vec<LoadAttempt> },

    #[error("tier vocabulary has {tiers} labels but {k} clusters were resolved")]
    TierVocabularyMismatch { tiers: usize, k: usize },

    #[error("cluster count must be at least 1, got {0}")]
    InvalidClusterCount(usize),

    #[error("clustering failed: {0}")]
    Clustering(String),

    #[error("source column '{column}' collides with a derived column")]
    ColumnCollision { column: String },

    #[error("table error: {0}")]
    Frame(#[from] PolarsError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn clustering(msg: impl std::fmt::Display) -> Self {
        Self::Clustering(msg.to_string())
    }
}

/// Why a regression-based importance ranking could not be produced.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegressionIssue {
    #[error("{rows} rows cannot fit {predictors} predictors (need at least {required})")]
    TooFewRows {
        rows: usize,
        predictors: usize,
        required: usize,
    },

    #[error("design matrix is singular: {reason}")]
    Singular { reason: String },

    #[error("target column '{column}' is not in the table")]
    MissingTarget { column: String },
}
