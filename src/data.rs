//! Dataset loading from spreadsheet and delimited-text sources
//!
//! Sources are tried in order and the first table that loads wins. Failures
//! are returned as data ([`LoadOutcome::NoData`]) instead of errors so that
//! a missing file never takes the caller down.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// File formats the loader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Excel/OpenDocument workbook, first worksheet, header in the first row
    Spreadsheet,
    /// Comma separated values with a header line
    Csv,
    /// Tab separated values with a header line
    Tsv,
}

impl SourceFormat {
    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(Self::Spreadsheet),
            "csv" => Some(Self::Csv),
            "tsv" | "tab" => Some(Self::Tsv),
            _ => None,
        }
    }
}

/// One candidate location for the response table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub format: SourceFormat,
    pub path: PathBuf,
}

impl SourceDescriptor {
    pub fn new(format: SourceFormat, path: impl Into<PathBuf>) -> Self {
        Self {
            format,
            path: path.into(),
        }
    }

    /// Build a descriptor whose format is inferred from the extension
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        SourceFormat::from_path(&path).map(|format| Self { format, path })
    }
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.path.display(), self.format)
    }
}

/// Candidate list used when nothing else is configured
pub fn default_sources() -> Vec<SourceDescriptor> {
    vec![
        SourceDescriptor::new(SourceFormat::Spreadsheet, "data.xlsx"),
        SourceDescriptor::new(SourceFormat::Csv, "data.csv"),
    ]
}

/// A source that failed to load and why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadAttempt {
    pub source: SourceDescriptor,
    pub error: String,
}

/// Table resolved from the first working source
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub frame: DataFrame,
    pub source: SourceDescriptor,
    pub loaded_at: DateTime<Utc>,
    /// Candidates tried (and failed) before `source`
    pub skipped: Vec<LoadAttempt>,
}

/// Result of resolving a candidate list
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Loaded(LoadedDataset),
    NoData { attempts: Vec<LoadAttempt> },
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// Borrow the dataset, or report every failed attempt
    pub fn dataset(&self) -> crate::Result<&LoadedDataset> {
        match self {
            Self::Loaded(dataset) => Ok(dataset),
            Self::NoData { attempts } => Err(PipelineError::SourceUnavailable {
                attempts: attempts.clone(),
            }),
        }
    }

    pub fn into_result(self) -> crate::Result<LoadedDataset> {
        match self {
            Self::Loaded(dataset) => Ok(dataset),
            Self::NoData { attempts } => Err(PipelineError::SourceUnavailable { attempts }),
        }
    }
}

/// Try every source in order and return the first table that loads
pub fn load_first(sources: &[SourceDescriptor]) -> LoadOutcome {
    let mut attempts = Vec::new();

    for source in sources {
        match load_source(source) {
            Ok(frame) => {
                tracing::info!(
                    source = %source,
                    rows = frame.height(),
                    columns = frame.width(),
                    "dataset loaded"
                );
                return LoadOutcome::Loaded(LoadedDataset {
                    frame,
                    source: source.clone(),
                    loaded_at: Utc::now(),
                    skipped: attempts,
                });
            }
            Err(err) => {
                tracing::warn!(source = %source, error = %format!("{err:#}"), "source failed to load");
                attempts.push(LoadAttempt {
                    source: source.clone(),
                    error: format!("{err:#}"),
                });
            }
        }
    }

    LoadOutcome::NoData { attempts }
}

/// Read a single source into a data frame
pub fn load_source(source: &SourceDescriptor) -> anyhow::Result<DataFrame> {
    let frame = match source.format {
        SourceFormat::Spreadsheet => read_spreadsheet(&source.path)?,
        SourceFormat::Csv => read_delimited(&source.path, b',')?,
        SourceFormat::Tsv => read_delimited(&source.path, b'\t')?,
    };

    if frame.width() == 0 {
        bail!("{} contains no columns", source.path.display());
    }

    Ok(frame)
}

fn read_delimited(path: &Path, separator: u8) -> anyhow::Result<DataFrame> {
    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .map_parse_options(|opts| opts.with_separator(separator))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .with_context(|| format!("failed to open {}", path.display()))?
        .finish()
        .with_context(|| format!("failed to parse {}", path.display()))?;

    Ok(frame)
}

fn read_spreadsheet(path: &Path) -> anyhow::Result<DataFrame> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open workbook {}", path.display()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow!("{} has no worksheets", path.display()))?
        .with_context(|| format!("failed to read first worksheet of {}", path.display()))?;

    let mut rows = range.rows();
    let header: Vec<String> = match rows.next() {
        Some(cells) => cells
            .iter()
            .enumerate()
            .map(|(idx, cell)| match cell {
                Data::Empty => format!("column_{}", idx + 1),
                other => other.to_string().trim().to_string(),
            })
            .collect(),
        None => bail!("{} has an empty first worksheet", path.display()),
    };

    let body: Vec<Vec<Data>> = rows.map(|cells| cells.to_vec()).collect();
    frame_from_cells(&header, &body)
}

/// Build a frame from spreadsheet cells. Columns whose cells are all numeric
/// (or empty) become `Float64`, everything else becomes a string column.
/// Repeated header names get a `.1`, `.2`, ... suffix.
fn frame_from_cells(header: &[String], body: &[Vec<Data>]) -> anyhow::Result<DataFrame> {
    let header = unique_names(header);
    let mut columns = Vec::with_capacity(header.len());

    for (idx, name) in header.iter().enumerate() {
        let cells: Vec<&Data> = body
            .iter()
            .map(|row| row.get(idx).unwrap_or(&Data::Empty))
            .collect();

        let numeric = cells
            .iter()
            .all(|cell| matches!(cell, Data::Int(_) | Data::Float(_) | Data::Empty));

        let series = if numeric {
            let values: Vec<Option<f64>> = cells
                .iter()
                .map(|cell| match cell {
                    Data::Int(v) => Some(*v as f64),
                    Data::Float(v) => Some(*v),
                    _ => None,
                })
                .collect();
            Series::new(name.as_str(), values)
        } else {
            let values: Vec<Option<String>> = cells
                .iter()
                .map(|cell| match cell {
                    Data::Empty => None,
                    other => Some(other.to_string()),
                })
                .collect();
            Series::new(name.as_str(), values)
        };
        columns.push(series);
    }

    DataFrame::new(columns).context("worksheet does not form a valid table")
}

fn unique_names(header: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(header.len());
    let mut names = Vec::with_capacity(header.len());

    for name in header {
        let mut candidate = name.clone();
        let mut suffix = 0;
        while seen.contains(&candidate) {
            suffix += 1;
            candidate = format!("{name}.{suffix}");
        }
        seen.insert(candidate.clone());
        names.push(candidate);
    }

    names
}
