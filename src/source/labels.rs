//! Grid label table loading.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use csv::ReaderBuilder;
use hashbrown::HashMap;
use tracing::{info, warn};

use super::render_number;
use crate::config::LabelConfig;
use crate::error::{GridError, Result};

/// Grid id -> ordered, deduplicated labels.
#[derive(Debug, Clone, Default)]
pub struct LabelMapping {
    labels: HashMap<String, Vec<String>>,
}

impl LabelMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label for a grid id. Both are trimmed; empty values are
    /// ignored and a label already recorded for the id is not repeated.
    pub fn insert(&mut self, grid_id: &str, label: &str) {
        let grid_id = grid_id.trim();
        let label = label.trim();
        if grid_id.is_empty() || label.is_empty() {
            return;
        }

        let entry = self.labels.entry(grid_id.to_string()).or_default();
        if !entry.iter().any(|l| l == label) {
            entry.push(label.to_string());
        }
    }

    pub fn get(&self, grid_id: &str) -> Option<&[String]> {
        self.labels.get(grid_id).map(Vec::as_slice)
    }

    /// Labels for a grid id joined with commas
    pub fn joined(&self, grid_id: &str) -> Option<String> {
        self.get(grid_id).map(|labels| labels.join(","))
    }

    /// Number of grid ids with at least one label
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<I, S> FromIterator<(I, S)> for LabelMapping
where
    I: AsRef<str>,
    S: AsRef<str>,
{
    fn from_iter<T: IntoIterator<Item = (I, S)>>(iter: T) -> Self {
        let mut mapping = Self::new();
        for (grid_id, label) in iter {
            mapping.insert(grid_id.as_ref(), label.as_ref());
        }
        mapping
    }
}

/// Load the label table.
///
/// A table without the configured columns yields an empty mapping with a
/// warning; read failures are returned as errors.
pub fn load_labels(config: &LabelConfig) -> Result<LabelMapping> {
    let (headers, rows) = read_table(&config.path)?;
    info!("Loaded label table: {} rows", rows.len());

    let Some(id_idx) = headers.iter().position(|h| h == &config.id_column) else {
        warn!(
            "Label table is missing column '{}', available columns: {:?}",
            config.id_column, headers
        );
        return Ok(LabelMapping::new());
    };
    let Some(label_idx) = headers.iter().position(|h| h == &config.label_column) else {
        warn!(
            "Label table is missing column '{}', available columns: {:?}",
            config.label_column, headers
        );
        return Ok(LabelMapping::new());
    };

    let mapping: LabelMapping = rows
        .iter()
        .map(|row| {
            (
                row.get(id_idx).map(String::as_str).unwrap_or(""),
                row.get(label_idx).map(String::as_str).unwrap_or(""),
            )
        })
        .collect();

    info!("Loaded label mapping for {} grid ids", mapping.len());
    Ok(mapping)
}

/// Read a table as a header row plus string cells.
fn read_table(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("csv") | Some("txt") => read_csv(path),
        Some("xlsx") | Some("xlsm") | Some("xls") | Some("ods") => read_spreadsheet(path),
        _ => Err(GridError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.iter().map(String::from).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(String::from).collect());
    }

    Ok((headers, rows))
}

fn read_spreadsheet(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut workbook = open_workbook_auto(path)?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range?,
        None => return Ok((Vec::new(), Vec::new())),
    };

    let mut rows = range.rows().map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
    let headers = rows.next().unwrap_or_default();
    Ok((headers, rows.collect()))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => render_number(*f),
        other => other.to_string(),
    }
}
