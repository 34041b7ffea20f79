//! Total and mean scores per student, plus class-level score statistics

use ndarray::{Array2, Axis};
use polars::prelude::*;
use serde::Serialize;

use crate::columns::{append_derived, ItemColumnSet};

pub const TOTAL_SCORE: &str = "total_score";
pub const MEAN_SCORE: &str = "mean_score";
pub const STUDENT_ID: &str = "student_id";

/// Frame with score columns appended, together with the raw totals
#[derive(Debug, Clone)]
pub struct ScoredTable {
    pub frame: DataFrame,
    pub totals: Vec<f64>,
    /// `None` when the item set is empty
    pub means: Option<Vec<f64>>,
    pub student_ids: Vec<String>,
}

/// Summary statistics of the total score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub mean: Option<f64>,
    pub max: Option<f64>,
    pub min: Option<f64>,
    /// Sample standard deviation, needs at least two students
    pub std_dev: Option<f64>,
}

/// Average response for one item across all students
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemMean {
    pub item: String,
    pub mean: f64,
}

/// Positional display label, 1-based
pub fn student_label(row: usize) -> String {
    format!("Student {}", row + 1)
}

/// Append `total_score`, `mean_score` (when there are items) and `student_id`.
///
/// `responses` is the item matrix of `frame`. The input frame is left
/// untouched; a source column that already uses one of the derived names is
/// reported as [`crate::PipelineError::ColumnCollision`].
pub fn aggregate(
    frame: &DataFrame,
    items: &ItemColumnSet,
    responses: &Array2<f64>,
) -> crate::Result<ScoredTable> {
    let rows = frame.height();
    let totals = responses.sum_axis(Axis(1)).to_vec();

    let means = if items.is_empty() {
        None
    } else {
        let n = items.len() as f64;
        Some(totals.iter().map(|t| t / n).collect::<Vec<f64>>())
    };

    let student_ids: Vec<String> = (0..rows).map(student_label).collect();

    let mut scored = frame.clone();
    append_derived(&mut scored, Series::new(TOTAL_SCORE, totals.clone()))?;
    if let Some(means) = &means {
        append_derived(&mut scored, Series::new(MEAN_SCORE, means.clone()))?;
    }
    append_derived(&mut scored, Series::new(STUDENT_ID, student_ids.clone()))?;

    tracing::debug!(rows, items = items.len(), "scores aggregated");

    Ok(ScoredTable {
        frame: scored,
        totals,
        means,
        student_ids,
    })
}

/// Count, mean, max, min and sample standard deviation of `totals`
pub fn summarize(totals: &[f64]) -> ScoreSummary {
    let count = totals.len();
    if count == 0 {
        return ScoreSummary {
            count,
            mean: None,
            max: None,
            min: None,
            std_dev: None,
        };
    }

    let mean = totals.iter().sum::<f64>() / count as f64;
    let max = totals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = totals.iter().copied().fold(f64::INFINITY, f64::min);
    let std_dev = (count > 1).then(|| {
        let ss: f64 = totals.iter().map(|t| (t - mean).powi(2)).sum();
        (ss / (count - 1) as f64).sqrt()
    });

    ScoreSummary {
        count,
        mean: Some(mean),
        max: Some(max),
        min: Some(min),
        std_dev,
    }
}

/// Class average per item, in item order. Empty table gives a mean of 0.
pub fn item_means(items: &ItemColumnSet, responses: &Array2<f64>) -> Vec<ItemMean> {
    let rows = responses.nrows();
    items
        .names()
        .iter()
        .zip(responses.columns())
        .map(|(name, values)| ItemMean {
            item: name.clone(),
            mean: if rows == 0 { 0.0 } else { values.sum() / rows as f64 },
        })
        .collect()
}
