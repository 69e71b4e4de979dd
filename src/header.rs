//! Metadata-row detection: separating a non-tabular preamble (blank
//! separators, annotation rows, repeated header blocks) from the real
//! tabular payload at the top of the first batch.

use heck::ToSnakeCase;
use log::debug;

use crate::config::CleanConfig;

/// Outcome of scanning the leading rows of the first batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataScan {
    /// Index of the first payload row within the scanned batch.
    pub data_start_offset: usize,
    pub metadata_rows_found: usize,
    /// Enriched column names proposed from a metadata row, advisory only.
    pub suggested_headers: Option<Vec<String>>,
    pub should_rename: bool,
}

impl MetadataScan {
    fn clean(suggested: Option<Vec<String>>, offset: usize) -> Self {
        Self {
            data_start_offset: offset,
            metadata_rows_found: offset,
            should_rename: suggested.is_some(),
            suggested_headers: suggested,
        }
    }
}

/// Fraction of a row's cells that parse as numeric.
pub fn numeric_fraction(row: &[String], config: &CleanConfig) -> f64 {
    if row.is_empty() {
        return 0.0;
    }
    let numeric = row
        .iter()
        .filter(|cell| {
            let trimmed = cell.trim();
            !trimmed.is_empty()
                && (trimmed.parse::<f64>().is_ok() || config.matches_numeric(trimmed))
        })
        .count();
    numeric as f64 / row.len() as f64
}

/// Decides whether the first row of a batch is a header row. Rows whose
/// cells are mostly numeric are data; everything else is assumed to name
/// the columns below it.
pub fn infer_has_header(rows: &[Vec<String>], config: &CleanConfig) -> bool {
    match rows.first() {
        Some(first) => numeric_fraction(first, config) < config.metadata_low_threshold,
        None => true,
    }
}

/// Scans the first `config.metadata_scan_rows` rows of `rows` (the first
/// batch, headers already stripped) and classifies the leading preamble.
///
/// A text-to-numeric transition is located by finding the first scanned row
/// whose numeric fraction reaches the high threshold; every earlier row
/// counts as metadata only if it is entirely empty, below the low
/// threshold, or textually identical to the declared header. Short files
/// are scanned as far as they go and never fail.
pub fn detect_metadata_rows(
    rows: &[Vec<String>],
    headers: &[String],
    config: &CleanConfig,
) -> MetadataScan {
    let scan_len = config.metadata_scan_rows.min(rows.len());
    let scanned = &rows[..scan_len];
    let fractions: Vec<f64> = scanned
        .iter()
        .map(|row| numeric_fraction(row, config))
        .collect();

    let data_row = fractions
        .iter()
        .position(|fraction| *fraction >= config.metadata_high_threshold);

    let mut offset = 0usize;
    for (idx, row) in scanned.iter().enumerate() {
        let is_metadata = row_is_empty(row)
            || matches_headers(row, headers)
            || matches!(data_row, Some(d) if idx < d && fractions[idx] < config.metadata_low_threshold);
        if !is_metadata {
            break;
        }
        offset = idx + 1;
    }

    if offset == 0 {
        return MetadataScan::clean(None, 0);
    }

    let suggested = scanned[..offset]
        .iter()
        .find(|row| !row_is_empty(row) && !matches_headers(row, headers) && has_name_content(row))
        .map(|row| join_headers(headers, row));

    debug!(
        "Metadata scan: {} preamble row(s), data starts at offset {}",
        offset, offset
    );
    MetadataScan::clean(suggested, offset)
}

fn row_is_empty(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

fn matches_headers(row: &[String], headers: &[String]) -> bool {
    row.len() == headers.len()
        && row
            .iter()
            .zip(headers)
            .all(|(cell, header)| cell.trim() == header.trim())
}

/// A metadata row is only offered as column names when its text is long
/// enough to plausibly describe the columns.
fn has_name_content(row: &[String]) -> bool {
    let non_empty: Vec<&str> = row
        .iter()
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty())
        .collect();
    if non_empty.len() * 2 < row.len() {
        return false;
    }
    let total_len: usize = non_empty.iter().map(|cell| cell.len()).sum();
    total_len >= non_empty.len() * 3
}

fn join_headers(headers: &[String], row: &[String]) -> Vec<String> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let extra = row.get(idx).map(|cell| cell.trim()).unwrap_or("");
            if extra.is_empty() {
                header.clone()
            } else {
                format!("{}_{}", header, extra.to_snake_case())
            }
        })
        .collect()
}
