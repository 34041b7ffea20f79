//! Inter-item correlation and regression-based item importance

use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use polars::prelude::DataFrame;
use serde::Serialize;

use crate::columns::{numeric_column, ItemColumnSet};
use crate::error::RegressionIssue;

/// Relative residual norm under which a predictor counts as linearly
/// dependent on the intercept and the predictors before it
const DEPENDENCE_TOLERANCE: f64 = 1e-9;

/// One entry of the correlation matrix.
///
/// `Undefined` marks a pair where at least one column has zero variance, so
/// Pearson's r does not exist. It serializes as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Correlation {
    Defined(f64),
    Undefined,
}

impl Correlation {
    pub fn value(self) -> Option<f64> {
        match self {
            Self::Defined(r) => Some(r),
            Self::Undefined => None,
        }
    }

    pub fn is_defined(self) -> bool {
        matches!(self, Self::Defined(_))
    }
}

/// Symmetric Pearson correlation matrix over the item columns
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub items: Vec<String>,
    pub values: Vec<Vec<Correlation>>,
}

impl CorrelationMatrix {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn at(&self, row: usize, col: usize) -> Correlation {
        self.values[row][col]
    }

    /// Look up an entry by column names
    pub fn get(&self, a: &str, b: &str) -> Option<Correlation> {
        let i = self.items.iter().position(|n| n == a)?;
        let j = self.items.iter().position(|n| n == b)?;
        Some(self.values[i][j])
    }

    /// Off-diagonal pairs (upper triangle) without a defined correlation
    pub fn undefined_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for i in 0..self.len() {
            for j in (i + 1)..self.len() {
                if !self.values[i][j].is_defined() {
                    pairs.push((self.items[i].clone(), self.items[j].clone()));
                }
            }
        }
        pairs
    }
}

/// Pairwise Pearson correlation between all item columns of `responses`.
///
/// The diagonal is always 1. Pairs involving a constant column are
/// [`Correlation::Undefined`].
pub fn correlate(responses: &Array2<f64>, items: &ItemColumnSet) -> CorrelationMatrix {
    let n = items.len();

    let constant: Vec<bool> = responses.axis_iter(Axis(1)).map(|c| is_constant(&c)).collect();
    let mut values = vec![vec![Correlation::Undefined; n]; n];

    for i in 0..n {
        values[i][i] = Correlation::Defined(1.0);
        for j in (i + 1)..n {
            let entry = if constant[i] || constant[j] {
                Correlation::Undefined
            } else {
                Correlation::Defined(pearson(&responses.column(i), &responses.column(j)))
            };
            values[i][j] = entry;
            values[j][i] = entry;
        }
    }

    CorrelationMatrix {
        items: items.names().to_vec(),
        values,
    }
}

fn is_constant(column: &ArrayView1<f64>) -> bool {
    let mut values = column.iter();
    match values.next() {
        Some(first) => values.all(|v| v == first),
        None => true,
    }
}

fn pearson(x: &ArrayView1<f64>, y: &ArrayView1<f64>) -> f64 {
    let n = x.len() as f64;
    let mean_x = x.sum() / n;
    let mean_y = y.sum() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y.iter()) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// Fitted coefficient of one item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemWeight {
    pub item: String,
    pub coefficient: f64,
}

/// Items ordered by regression coefficient, smallest first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportanceRanking {
    pub target: String,
    pub intercept: Option<f64>,
    pub weights: Vec<ItemWeight>,
}

impl ImportanceRanking {
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn items(&self) -> Vec<&str> {
        self.weights.iter().map(|w| w.item.as_str()).collect()
    }
}

/// A ranking, or the reason no well-posed fit exists
pub type ImportanceOutcome = std::result::Result<ImportanceRanking, RegressionIssue>;

/// Fit one least-squares regression of `target` on all items jointly and
/// rank the items by coefficient. `responses` is the item matrix of `frame`.
///
/// Table errors are returned as `Err`; conditions that make the regression
/// ill-posed come back as `Ok(Err(issue))`.
pub fn importance(
    frame: &DataFrame,
    items: &ItemColumnSet,
    responses: &Array2<f64>,
    target: &str,
) -> crate::Result<ImportanceOutcome> {
    if !frame.get_column_names().contains(&target) {
        return Ok(Err(RegressionIssue::MissingTarget {
            column: target.to_string(),
        }));
    }

    if items.is_empty() {
        return Ok(Ok(ImportanceRanking {
            target: target.to_string(),
            intercept: None,
            weights: Vec::new(),
        }));
    }

    let rows = frame.height();
    let required = items.len() + 1;
    if rows < required {
        return Ok(Err(RegressionIssue::TooFewRows {
            rows,
            predictors: items.len(),
            required,
        }));
    }

    if let Some(idx) = find_dependent_predictor(responses) {
        return Ok(Err(RegressionIssue::Singular {
            reason: format!(
                "'{}' is constant or a linear combination of earlier items",
                items.names()[idx]
            ),
        }));
    }

    let targets = Array1::from(numeric_column(frame, target)?);
    Ok(fit_ranking(responses.clone(), targets, items, target))
}

fn fit_ranking(
    features: Array2<f64>,
    targets: Array1<f64>,
    items: &ItemColumnSet,
    target: &str,
) -> ImportanceOutcome {
    let dataset = Dataset::new(features, targets);
    let model = LinearRegression::new()
        .fit(&dataset)
        .map_err(|err| RegressionIssue::Singular {
            reason: err.to_string(),
        })?;

    let params = model.params();
    if !params.iter().all(|p| p.is_finite()) || !model.intercept().is_finite() {
        return Err(RegressionIssue::Singular {
            reason: "least-squares solution is not finite".to_string(),
        });
    }

    let mut weights: Vec<ItemWeight> = items
        .names()
        .iter()
        .zip(params.iter())
        .map(|(item, &coefficient)| ItemWeight {
            item: item.clone(),
            coefficient,
        })
        .collect();
    weights.sort_by(|a, b| a.coefficient.total_cmp(&b.coefficient));

    tracing::debug!(target_column = target, items = weights.len(), "importance ranking fitted");

    Ok(ImportanceRanking {
        target: target.to_string(),
        intercept: Some(model.intercept()),
        weights,
    })
}

/// Index of the first predictor that is constant or a linear combination of
/// the predictors before it (with an intercept), via Gram-Schmidt on the
/// centered columns.
fn find_dependent_predictor(features: &Array2<f64>) -> Option<usize> {
    let mut basis: Vec<Array1<f64>> = Vec::new();

    for (idx, column) in features.axis_iter(Axis(1)).enumerate() {
        let mean = column.mean().unwrap_or(0.0);
        let centered = column.mapv(|v| v - mean);
        let norm = centered.dot(&centered).sqrt();
        if norm == 0.0 {
            return Some(idx);
        }

        let mut residual = centered;
        for q in &basis {
            let projection = residual.dot(q);
            residual.scaled_add(-projection, q);
        }

        let residual_norm = residual.dot(&residual).sqrt();
        if residual_norm <= DEPENDENCE_TOLERANCE * norm {
            return Some(idx);
        }
        basis.push(residual / residual_norm);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::classify;
    use crate::scores::{aggregate, TOTAL_SCORE};
    use polars::prelude::*;

    fn correlate_frame(frame: &DataFrame) -> CorrelationMatrix {
        let items = classify(frame, "soal");
        correlate(&items.matrix(frame).unwrap(), &items)
    }

    fn rank(frame: &DataFrame, items: &ItemColumnSet, target: &str) -> ImportanceOutcome {
        importance(frame, items, &items.matrix(frame).unwrap(), target).unwrap()
    }

    fn design_frame() -> DataFrame {
        df!(
            "Soal1" => &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            "Soal2" => &[2.0, 1.0, 4.0, 3.0, 6.0, 5.0],
            "Soal3" => &[1.0, 1.0, 2.0, 3.0, 5.0, 8.0],
            // 2*Soal1 + 0.5*Soal2 - Soal3 + 3
            "Nilai" => &[5.0, 6.5, 9.0, 9.5, 11.0, 9.5]
        )
        .unwrap()
    }

    #[test]
    fn test_correlation_symmetric_unit_diagonal() {
        let frame = design_frame();
        let matrix = correlate_frame(&frame);

        assert_eq!(matrix.len(), 3);
        for i in 0..3 {
            assert_eq!(matrix.at(i, i), Correlation::Defined(1.0));
            for j in 0..3 {
                assert_eq!(matrix.at(i, j), matrix.at(j, i));
                let r = matrix.at(i, j).value().unwrap();
                assert!((-1.0..=1.0).contains(&r));
            }
        }
    }

    #[test]
    fn test_perfect_correlations() {
        let frame = df!(
            "Soal1" => &[1.0, 2.0, 3.0],
            "Soal2" => &[2.0, 4.0, 6.0],
            "Soal3" => &[3.0, 2.0, 1.0]
        )
        .unwrap();
        let matrix = correlate_frame(&frame);

        let up = matrix.get("Soal1", "Soal2").unwrap().value().unwrap();
        let down = matrix.get("Soal1", "Soal3").unwrap().value().unwrap();
        assert!((up - 1.0).abs() < 1e-12);
        assert!((down + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_columns_are_undefined() {
        let frame = df!("Soal1" => &[3.0; 5], "Soal2" => &[1.0; 5]).unwrap();
        let matrix = correlate_frame(&frame);

        assert_eq!(matrix.get("Soal1", "Soal1"), Some(Correlation::Defined(1.0)));
        assert_eq!(matrix.get("Soal1", "Soal2"), Some(Correlation::Undefined));
        assert_eq!(
            matrix.undefined_pairs(),
            vec![("Soal1".to_string(), "Soal2".to_string())]
        );
    }

    #[test]
    fn test_single_constant_item() {
        let frame = df!("Soal1" => &[4.0; 5]).unwrap();
        let matrix = correlate_frame(&frame);

        assert_eq!(matrix.at(0, 0), Correlation::Defined(1.0));
        assert!(matrix.undefined_pairs().is_empty());
    }

    #[test]
    fn test_empty_items_empty_matrix() {
        let frame = df!("Nama" => &["a", "b"]).unwrap();
        let matrix = correlate_frame(&frame);
        assert!(matrix.is_empty());
        assert!(matrix.values.is_empty());
    }

    #[test]
    fn test_undefined_serializes_as_null() {
        let json = serde_json::to_string(&vec![Correlation::Defined(0.5), Correlation::Undefined])
            .unwrap();
        assert_eq!(json, "[0.5,null]");
    }

    #[test]
    fn test_importance_recovers_coefficients() {
        let frame = design_frame();
        let items = classify(&frame, "soal");

        let ranking = rank(&frame, &items, "Nilai").unwrap();
        assert_eq!(ranking.items(), vec!["Soal3", "Soal2", "Soal1"]);
        assert!((ranking.weights[0].coefficient + 1.0).abs() < 1e-6);
        assert!((ranking.weights[1].coefficient - 0.5).abs() < 1e-6);
        assert!((ranking.weights[2].coefficient - 2.0).abs() < 1e-6);
        assert!((ranking.intercept.unwrap() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_importance_against_total_score() {
        let frame = design_frame();
        let items = classify(&frame, "soal");
        let responses = items.matrix(&frame).unwrap();
        let scored = aggregate(&frame, &items, &responses).unwrap();

        let first = rank(&scored.frame, &items, TOTAL_SCORE).unwrap();
        let second = rank(&scored.frame, &items, TOTAL_SCORE).unwrap();

        assert_eq!(first.len(), items.len());
        assert_eq!(first.items(), second.items());
        // The total is the plain sum of items
        assert!(first
            .weights
            .iter()
            .all(|w| (w.coefficient - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_importance_too_few_rows() {
        let frame = df!("Soal1" => &[1.0, 2.0], "Soal2" => &[0.0, 3.0], "Nilai" => &[1.0, 5.0])
            .unwrap();
        let items = classify(&frame, "soal");

        let outcome = rank(&frame, &items, "Nilai");
        assert_eq!(
            outcome,
            Err(RegressionIssue::TooFewRows {
                rows: 2,
                predictors: 2,
                required: 3
            })
        );
    }

    #[test]
    fn test_importance_constant_predictor_is_singular() {
        let frame = df!(
            "Soal1" => &[1.0, 2.0, 3.0, 4.0],
            "Soal2" => &[2.0, 2.0, 2.0, 2.0],
            "Nilai" => &[1.0, 2.0, 3.0, 4.0]
        )
        .unwrap();
        let items = classify(&frame, "soal");

        let outcome = rank(&frame, &items, "Nilai");
        assert!(matches!(outcome, Err(RegressionIssue::Singular { .. })));
    }

    #[test]
    fn test_importance_duplicate_predictor_is_singular() {
        let frame = df!(
            "Soal1" => &[1.0, 2.0, 3.0, 4.0, 2.0],
            "Soal2" => &[0.0, 1.0, 0.0, 1.0, 1.0],
            "Soal3" => &[2.0, 5.0, 6.0, 9.0, 5.0],
            "Nilai" => &[1.0, 2.0, 3.0, 4.0, 5.0]
        )
        .unwrap();
        let items = classify(&frame, "soal");

        // Soal3 = 2*Soal1 + Soal2
        let outcome = rank(&frame, &items, "Nilai");
        match outcome {
            Err(RegressionIssue::Singular { reason }) => assert!(reason.contains("Soal3")),
            other => panic!("expected singular design, got {other:?}"),
        }
    }

    #[test]
    fn test_importance_missing_target() {
        let frame = design_frame();
        let items = classify(&frame, "soal");
        let outcome = rank(&frame, &items, "Missing");
        assert!(matches!(outcome, Err(RegressionIssue::MissingTarget { .. })));
    }

    #[test]
    fn test_importance_empty_items() {
        let frame = df!("Nilai" => &[1.0, 2.0]).unwrap();
        let ranking = rank(&frame, &ItemColumnSet::default(), "Nilai").unwrap();
        assert!(ranking.is_empty());
        assert!(ranking.intercept.is_none());
    }
}
