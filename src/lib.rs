//! ScoreForge: student response scoring and K-Means performance tiers
//!
//! The pipeline loads one response table, finds the item columns, totals
//! each student's score, segments students into ordered performance tiers
//! with K-Means, and derives inter-item correlations and a regression-based
//! item importance ranking.

pub mod cache;
pub mod cli;
pub mod columns;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod relations;
pub mod report;
pub mod scores;

// Re-export public items for easier access
pub use cache::DatasetCache;
pub use cli::Args;
pub use columns::{classify, ItemColumnSet};
pub use config::PipelineConfig;
pub use data::{load_first, LoadOutcome, LoadedDataset, SourceDescriptor, SourceFormat};
pub use error::{PipelineError, RegressionIssue};
pub use model::{rank_clusters_by_mean, segment, KMeansSettings, Segmentation};
pub use relations::{correlate, importance, Correlation, CorrelationMatrix, ImportanceRanking};
pub use report::{analyze, AnalysisReport, Condition, StudentRecord};
pub use scores::{aggregate, ScoreSummary};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, PipelineError>;
