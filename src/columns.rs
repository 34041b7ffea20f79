//! Item column discovery by name marker

use ndarray::Array2;
use polars::prelude::*;
use serde::Serialize;

use crate::error::PipelineError;

/// Ordered set of columns holding graded item responses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ItemColumnSet {
    names: Vec<String>,
}

impl ItemColumnSet {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Item responses as a `rows x items` matrix.
    ///
    /// Cells are cast to `f64`; missing or non-numeric cells count as 0.
    pub fn matrix(&self, frame: &DataFrame) -> PolarsResult<Array2<f64>> {
        let mut matrix = Array2::<f64>::zeros((frame.height(), self.names.len()));

        for (col_idx, name) in self.names.iter().enumerate() {
            let values = numeric_column(frame, name)?;
            for (row_idx, value) in values.into_iter().enumerate() {
                matrix[[row_idx, col_idx]] = value;
            }
        }

        Ok(matrix)
    }
}

/// Select the columns whose name contains `marker`, ignoring case.
pub fn classify(frame: &DataFrame, marker: &str) -> ItemColumnSet {
    let marker = marker.to_lowercase();
    let names = frame
        .get_column_names()
        .into_iter()
        .filter(|name| name.to_lowercase().contains(&marker))
        .map(str::to_string)
        .collect();

    ItemColumnSet::new(names)
}

/// Read one column as `f64`, nulls and unparseable cells become 0
pub(crate) fn numeric_column(frame: &DataFrame, name: &str) -> PolarsResult<Vec<f64>> {
    let series = frame.column(name)?.cast(&DataType::Float64)?;
    let values = series
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()).unwrap_or(0.0))
        .collect();
    Ok(values)
}

/// Add a derived column, refusing to replace a column of the same name
pub(crate) fn append_derived(frame: &mut DataFrame, series: Series) -> crate::Result<()> {
    if frame.get_column_names().contains(&series.name()) {
        return Err(PipelineError::ColumnCollision {
            column: series.name().to_string(),
        });
    }
    frame.with_column(series)?;
    Ok(())
}
