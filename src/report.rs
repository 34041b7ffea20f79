//! Pipeline driver and result assembly.
//!
//! [`analyze`] runs every stage in order (classify, aggregate, segment,
//! correlate, rank) and [`assemble`] merges their outputs into one
//! [`AnalysisReport`] for the presentation layer.

use ndarray::Array2;
use polars::prelude::*;
use serde::Serialize;

use crate::columns::{append_derived, classify, ItemColumnSet};
use crate::config::PipelineConfig;
use crate::error::RegressionIssue;
use crate::model::{segment, Segmentation};
use crate::relations::{correlate, importance, CorrelationMatrix, ImportanceOutcome};
use crate::scores::{aggregate, item_means, summarize, ItemMean, ScoreSummary, ScoredTable};

pub const CLUSTER: &str = "cluster";
pub const TIER: &str = "tier";

/// A single graded answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResponse {
    pub item: String,
    pub score: f64,
}

/// One student's row with every derived field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentRecord {
    pub student_id: String,
    /// 0-based row in the source table
    pub row: usize,
    pub responses: Vec<ItemResponse>,
    pub total_score: f64,
    pub mean_score: Option<f64>,
    pub cluster: usize,
    pub tier: String,
    /// Highest reachable total, items times points per item
    pub score_ceiling: f64,
}

/// Non-fatal situations the caller should know about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// No column matched the item marker
    EmptyItemSet,
    UndefinedCorrelation { first: String, second: String },
    IllPosedRegression { issue: RegressionIssue },
}

/// Everything the pipeline derives from one table
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// Source table plus score, id, cluster and tier columns
    #[serde(skip)]
    pub frame: DataFrame,
    pub items: ItemColumnSet,
    pub students: Vec<StudentRecord>,
    pub summary: ScoreSummary,
    pub item_means: Vec<ItemMean>,
    pub segmentation: Segmentation,
    pub correlation: CorrelationMatrix,
    pub importance: ImportanceOutcome,
    pub conditions: Vec<Condition>,
}

impl AnalysisReport {
    /// Look up one student by display id, e.g. `"Student 3"`
    pub fn student(&self, student_id: &str) -> Option<&StudentRecord> {
        self.students.iter().find(|s| s.student_id == student_id)
    }

    pub fn students_in_tier<'a>(&'a self, tier: &'a str) -> impl Iterator<Item = &'a StudentRecord> {
        self.students.iter().filter(move |s| s.tier == tier)
    }

    pub fn student_ids(&self) -> Vec<&str> {
        self.students.iter().map(|s| s.student_id.as_str()).collect()
    }
}

/// Outputs of the earlier stages, ready to be merged
#[derive(Debug, Clone)]
pub struct ReportParts {
    pub items: ItemColumnSet,
    pub responses: Array2<f64>,
    pub scored: ScoredTable,
    pub summary: ScoreSummary,
    pub item_means: Vec<ItemMean>,
    pub segmentation: Segmentation,
    pub correlation: CorrelationMatrix,
    pub importance: ImportanceOutcome,
}

/// Run the whole pipeline over one response table
pub fn analyze(frame: &DataFrame, config: &PipelineConfig) -> crate::Result<AnalysisReport> {
    config.validate()?;

    let items = classify(frame, &config.marker);
    tracing::info!(
        rows = frame.height(),
        items = items.len(),
        marker = %config.marker,
        "item columns classified"
    );

    // Every stage reads the same extraction of the item columns
    let responses = items.matrix(frame)?;

    let scored = aggregate(frame, &items, &responses)?;
    let summary = summarize(&scored.totals);
    let item_means = item_means(&items, &responses);

    let segmentation = segment(
        &responses,
        &scored.totals,
        config.clusters,
        &config.tiers,
        &config.kmeans,
    )?;

    let correlation = correlate(&responses, &items);
    let importance = importance(
        &scored.frame,
        &items,
        &responses,
        &config.importance_target,
    )?;

    assemble(
        ReportParts {
            items,
            responses,
            scored,
            summary,
            item_means,
            segmentation,
            correlation,
            importance,
        },
        config.max_points_per_item,
    )
}

/// Merge stage outputs into a report. Nothing is recomputed here.
pub fn assemble(parts: ReportParts, max_points_per_item: f64) -> crate::Result<AnalysisReport> {
    let ReportParts {
        items,
        responses,
        scored,
        summary,
        item_means,
        segmentation,
        correlation,
        importance,
    } = parts;

    let score_ceiling = items.len() as f64 * max_points_per_item;

    let students: Vec<StudentRecord> = scored
        .student_ids
        .iter()
        .enumerate()
        .map(|(row, student_id)| StudentRecord {
            student_id: student_id.clone(),
            row,
            responses: items
                .names()
                .iter()
                .zip(responses.row(row).iter())
                .map(|(item, &score)| ItemResponse {
                    item: item.clone(),
                    score,
                })
                .collect(),
            total_score: scored.totals[row],
            mean_score: scored.means.as_ref().map(|m| m[row]),
            cluster: segmentation.cluster_ids[row],
            tier: segmentation.tier_labels[row].clone(),
            score_ceiling,
        })
        .collect();

    let clusters: Vec<u32> = segmentation.cluster_ids.iter().map(|&c| c as u32).collect();
    let mut frame = scored.frame;
    append_derived(&mut frame, Series::new(CLUSTER, clusters))?;
    append_derived(&mut frame, Series::new(TIER, segmentation.tier_labels.clone()))?;

    let conditions = collect_conditions(&items, &correlation, &importance);
    for condition in &conditions {
        tracing::warn!(?condition, "analysis condition");
    }

    Ok(AnalysisReport {
        frame,
        items,
        students,
        summary,
        item_means,
        segmentation,
        correlation,
        importance,
        conditions,
    })
}

fn collect_conditions(
    items: &ItemColumnSet,
    correlation: &CorrelationMatrix,
    importance: &ImportanceOutcome,
) -> Vec<Condition> {
    let mut conditions = Vec::new();

    if items.is_empty() {
        conditions.push(Condition::EmptyItemSet);
    }
    conditions.extend(
        correlation
            .undefined_pairs()
            .into_iter()
            .map(|(first, second)| Condition::UndefinedCorrelation { first, second }),
    );
    if let Err(issue) = importance {
        conditions.push(Condition::IllPosedRegression {
            issue: issue.clone(),
        });
    }

    conditions
}
