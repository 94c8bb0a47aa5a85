// loader.rs

use crate::error::{HeatmapError, HeatmapResult};
use calamine::{open_workbook_auto, DataType, Reader};
use log::{debug, info, warn};
use ndarray::Array2;
use std::collections::HashSet;
use std::path::Path;

/// One spreadsheet cell before numeric coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Empty,
    Number(f64),
    Text(String),
}

impl RawCell {
    fn is_empty(&self) -> bool {
        match self {
            RawCell::Empty => true,
            RawCell::Text(s) => s.trim().is_empty(),
            RawCell::Number(_) => false,
        }
    }

    /// Label rendering of a cell. Integer-valued numbers drop the decimal point.
    fn as_label(&self) -> Option<String> {
        match self {
            RawCell::Empty => None,
            RawCell::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            RawCell::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Some(format!("{}", *n as i64))
                } else {
                    Some(n.to_string())
                }
            }
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            RawCell::Number(n) => Some(*n),
            RawCell::Text(s) => s.trim().parse::<f64>().ok(),
            RawCell::Empty => None,
        }
    }
}

fn cell_from_calamine(cell: &DataType) -> RawCell {
    match cell {
        DataType::Empty => RawCell::Empty,
        DataType::Int(i) => RawCell::Number(*i as f64),
        DataType::Float(f) => RawCell::Number(*f),
        DataType::String(s) => RawCell::Text(s.clone()),
        DataType::Bool(b) => RawCell::Text(b.to_string()),
        DataType::Error(e) => RawCell::Text(format!("ERR({e:?})")),
        other => RawCell::Text(other.to_string()),
    }
}

/// Header row plus data rows exactly as read from disk.
#[derive(Debug, Clone)]
pub struct RawSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<RawCell>>,
}

/// Names of the three metadata columns; everything else is a sample.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub gene: String,
    pub family: String,
    pub cluster: String,
}

impl Default for ColumnSpec {
    fn default() -> Self {
        Self {
            gene: "Gene_ID".to_string(),
            family: "TF_Family".to_string(),
            cluster: "Cluster".to_string(),
        }
    }
}

/// What to do when the same gene ID appears on more than one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    KeepFirst,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneMetadata {
    pub family: Option<String>,
    pub cluster: Option<String>,
}

/// Gene × sample expression matrix with per-gene annotations.
#[derive(Debug, Clone)]
pub struct ExpressionTable {
    pub genes: Vec<String>,
    pub samples: Vec<String>,
    pub values: Array2<f64>,
    pub metadata: Vec<GeneMetadata>,
}

impl ExpressionTable {
    pub fn n_genes(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.values.ncols()
    }
}

enum InputKind {
    Workbook,
    Delimited(u8),
}

fn input_kind(path: &Path) -> InputKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => InputKind::Delimited(b','),
        "tsv" | "txt" => InputKind::Delimited(b'\t'),
        _ => InputKind::Workbook,
    }
}

/// Reads the header and data rows of `sheet` (workbooks) or of the whole file
/// (CSV/TSV, where `sheet` is ignored).
pub fn read_sheet(path: &Path, sheet: &str) -> HeatmapResult<RawSheet> {
    if !path.is_file() {
        return Err(HeatmapError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "input file not found"),
        ));
    }
    match input_kind(path) {
        InputKind::Workbook => read_workbook(path, sheet),
        InputKind::Delimited(delimiter) => read_delimited(path, delimiter),
    }
}

fn read_workbook(path: &Path, sheet: &str) -> HeatmapResult<RawSheet> {
    let mut workbook = open_workbook_auto(path).map_err(|e| match e {
        calamine::Error::Io(io_err) => HeatmapError::io(path, io_err),
        other => HeatmapError::data_format(format!(
            "Failed to open workbook {}: {}",
            path.display(),
            other
        )),
    })?;

    let available = workbook.sheet_names().to_vec();
    let range = workbook.worksheet_range(sheet).map_err(|e| {
        HeatmapError::data_format(format!(
            "Sheet '{}' not readable from {} (available: {:?}): {}",
            sheet,
            path.display(),
            available,
            e
        ))
    })?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| HeatmapError::data_format(format!("Sheet '{}' is empty", sheet)))?
        .iter()
        .map(|c| cell_from_calamine(c).as_label().unwrap_or_default())
        .collect();
    let rows: Vec<Vec<RawCell>> = rows
        .map(|row| row.iter().map(cell_from_calamine).collect())
        .collect();

    info!(
        "Read sheet '{}' from {}: {} columns, {} data rows.",
        sheet,
        path.display(),
        headers.len(),
        rows.len()
    );
    Ok(RawSheet { headers, rows })
}

fn read_delimited(path: &Path, delimiter: u8) -> HeatmapResult<RawSheet> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| csv_error(path, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(path, e))?;
        rows.push(
            record
                .iter()
                .map(|field| {
                    if field.trim().is_empty() {
                        RawCell::Empty
                    } else {
                        RawCell::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }

    info!(
        "Read delimited file {}: {} columns, {} data rows.",
        path.display(),
        headers.len(),
        rows.len()
    );
    Ok(RawSheet { headers, rows })
}

fn csv_error(path: &Path, e: csv::Error) -> HeatmapError {
    if e.is_io_error() {
        match e.into_kind() {
            csv::ErrorKind::Io(io_err) => HeatmapError::io(path, io_err),
            other => HeatmapError::data_format(format!("{}: {:?}", path.display(), other)),
        }
    } else {
        HeatmapError::data_format(format!("Malformed delimited file {}: {}", path.display(), e))
    }
}

fn find_column(headers: &[String], name: &str) -> HeatmapResult<usize> {
    headers.iter().position(|h| h == name).ok_or_else(|| {
        HeatmapError::data_format(format!(
            "Required column '{}' not found (columns: {:?})",
            name, headers
        ))
    })
}

/// Splits metadata from sample columns and coerces every sample cell to `f64`.
pub fn build_table(
    raw: &RawSheet,
    columns: &ColumnSpec,
    duplicates: DuplicatePolicy,
) -> HeatmapResult<ExpressionTable> {
    let gene_idx = find_column(&raw.headers, &columns.gene)?;
    let family_idx = find_column(&raw.headers, &columns.family)?;
    let cluster_idx = find_column(&raw.headers, &columns.cluster)?;
    let meta = [gene_idx, family_idx, cluster_idx];

    let empty = RawCell::Empty;
    let cell = |row: &[RawCell], idx: usize| -> RawCell { row.get(idx).unwrap_or(&empty).clone() };

    let mut sample_indices = Vec::new();
    let mut seen_samples = HashSet::new();
    for (idx, header) in raw.headers.iter().enumerate() {
        if meta.contains(&idx) {
            continue;
        }
        if header.trim().is_empty() {
            if raw.rows.iter().all(|row| cell(row, idx).is_empty()) {
                warn!("Skipping blank column at position {}.", idx + 1);
                continue;
            }
            return Err(HeatmapError::data_format(format!(
                "Column at position {} has values but no header",
                idx + 1
            )));
        }
        if !seen_samples.insert(header.as_str()) {
            return Err(HeatmapError::data_format(format!(
                "Sample column '{}' appears more than once",
                header
            )));
        }
        sample_indices.push(idx);
    }
    if sample_indices.is_empty() {
        return Err(HeatmapError::data_format("No sample columns found besides metadata"));
    }
    let samples: Vec<String> = sample_indices.iter().map(|&i| raw.headers[i].clone()).collect();
    debug!("Sample columns: {:?}", samples);

    let mut genes: Vec<String> = Vec::new();
    let mut metadata = Vec::new();
    let mut flat_values: Vec<f64> = Vec::new();
    let mut seen_genes = HashSet::new();

    for (row_no, row) in raw.rows.iter().enumerate() {
        if row.iter().all(RawCell::is_empty) {
            continue;
        }
        // Header is line 1, so data rows start at line 2.
        let line = row_no + 2;
        let gene = cell(row, gene_idx).as_label().ok_or_else(|| {
            HeatmapError::data_format(format!("Row {} has an empty '{}'", line, columns.gene))
        })?;

        if seen_genes.contains(&gene) {
            match duplicates {
                DuplicatePolicy::Reject => {
                    return Err(HeatmapError::data_format(format!(
                        "Duplicate gene ID '{}' at row {}",
                        gene, line
                    )));
                }
                DuplicatePolicy::KeepFirst => {
                    warn!("Dropping duplicate gene ID '{}' at row {}.", gene, line);
                    continue;
                }
            }
        }

        for (&col_idx, sample) in sample_indices.iter().zip(samples.iter()) {
            let raw_value = cell(row, col_idx);
            let value = raw_value.as_f64().filter(|v| v.is_finite()).ok_or_else(|| {
                HeatmapError::data_format(format!(
                    "Non-numeric value {:?} for gene '{}', sample '{}'",
                    raw_value, gene, sample
                ))
            })?;
            flat_values.push(value);
        }

        metadata.push(GeneMetadata {
            family: cell(row, family_idx).as_label(),
            cluster: cell(row, cluster_idx).as_label(),
        });
        seen_genes.insert(gene.clone());
        genes.push(gene);
    }

    if genes.is_empty() {
        return Err(HeatmapError::data_format("No gene rows found"));
    }

    let values = Array2::from_shape_vec((genes.len(), samples.len()), flat_values)
        .map_err(|e| HeatmapError::data_format(format!("Matrix shape mismatch: {}", e)))?;

    Ok(ExpressionTable {
        genes,
        samples,
        values,
        metadata,
    })
}

pub fn load_expression_table(
    path: &Path,
    sheet: &str,
    columns: &ColumnSpec,
    duplicates: DuplicatePolicy,
) -> HeatmapResult<ExpressionTable> {
    let raw = read_sheet(path, sheet)?;
    build_table(&raw, columns, duplicates)
}
