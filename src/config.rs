//! Cleaning configuration and reader hints.
//!
//! All heuristic knobs (null tokens, boolean token sets, the numeric/percent
//! pattern, metadata thresholds, sampling sizes) live in one immutable
//! [`CleanConfig`] value built once per run and passed by reference into the
//! pipeline stages. Nothing in the pipeline consults mutable global state.

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::table::ColumnKind;

pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
pub const DEFAULT_WORKING_SET_CAP: usize = 100_000;

/// Case-insensitive tokens normalized to null before any coercion runs.
pub const NULL_TOKENS: &[&str] = &["", "na", "n/a", "none", "null", "nan", "?", "-", "--"];

pub const TRUE_TOKENS: &[&str] = &["true", "t", "yes", "y", "1"];
pub const FALSE_TOKENS: &[&str] = &["false", "f", "no", "n", "0"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum HeaderMode {
    /// Detect whether the first row is a header.
    Auto,
    /// Treat the first row as a header unconditionally.
    Force,
    /// Treat every row as data; synthesize column names.
    Skip,
}

#[derive(Debug)]
pub struct CleanConfig {
    pub header_mode: HeaderMode,
    /// Field delimiter override; resolved from the source extension when
    /// unset.
    pub delimiter: Option<u8>,
    pub coerce_types: bool,
    pub datetime_infer: bool,
    pub cap_outliers: bool,
    pub impute_missing: bool,
    pub drop_empty_columns: bool,
    pub drop_duplicate_columns: bool,
    pub drop_duplicate_rows: bool,
    pub chunk_size: usize,
    pub working_set_cap: usize,
    /// Rows inspected by the metadata-row detector.
    pub metadata_scan_rows: usize,
    /// A row below this numeric fraction may be preamble.
    pub metadata_low_threshold: f64,
    /// The first row at or above this numeric fraction starts the data.
    pub metadata_high_threshold: f64,
    /// Non-null values sampled per column for the numeric check.
    pub coercion_sample_size: usize,
    pub boolean_match_threshold: f64,
    pub numeric_match_threshold: f64,
    pub datetime_commit_threshold: f64,
    /// Multiplier on the IQR for winsorization bounds.
    pub outlier_iqr_multiplier: f64,
    pub numeric_pattern: Regex,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            header_mode: HeaderMode::Auto,
            delimiter: None,
            coerce_types: true,
            datetime_infer: true,
            cap_outliers: true,
            impute_missing: true,
            drop_empty_columns: true,
            drop_duplicate_columns: true,
            drop_duplicate_rows: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            working_set_cap: DEFAULT_WORKING_SET_CAP,
            metadata_scan_rows: 5,
            metadata_low_threshold: 0.5,
            metadata_high_threshold: 0.7,
            coercion_sample_size: 100,
            boolean_match_threshold: 0.7,
            numeric_match_threshold: 0.8,
            datetime_commit_threshold: 0.6,
            outlier_iqr_multiplier: 3.0,
            numeric_pattern: Regex::new(r"^[+-]?(\d{1,3}(,\d{3})+|\d+)(\.\d+)?%?$")
                .expect("numeric pattern is valid"),
        }
    }
}

impl CleanConfig {
    pub fn is_null_token(&self, value: &str) -> bool {
        let trimmed = value.trim();
        NULL_TOKENS
            .iter()
            .any(|token| trimmed.eq_ignore_ascii_case(token))
    }

    pub fn is_true_token(&self, lowered: &str) -> bool {
        TRUE_TOKENS.contains(&lowered)
    }

    pub fn is_false_token(&self, lowered: &str) -> bool {
        FALSE_TOKENS.contains(&lowered)
    }

    pub fn is_boolean_token(&self, lowered: &str) -> bool {
        self.is_true_token(lowered) || self.is_false_token(lowered)
    }

    /// Matches plain numbers, thousands-separated numbers, and percent
    /// tokens such as `1,200.50` or `45%`.
    pub fn matches_numeric(&self, value: &str) -> bool {
        self.numeric_pattern.is_match(value.trim())
    }
}

/// Optional per-source hints loaded from a YAML file, mirroring the schema
/// files the `probe` command emits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReaderHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<char>,
    /// Restrict reading to these columns, in file order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// Declared kinds that bypass inference for the named columns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declared: Vec<DeclaredColumn>,
    /// Columns to parse as datetimes regardless of name hints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datetime_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredColumn {
    pub name: String,
    pub kind: ColumnKind,
}

impl ReaderHints {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening hints file {path:?}"))?;
        let reader = BufReader::new(file);
        serde_yaml::from_reader(reader).context("Parsing hints YAML")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating hints file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing hints YAML")
    }

    pub fn declared_kind(&self, column: &str) -> Option<ColumnKind> {
        self.declared
            .iter()
            .find(|declared| declared.name == column)
            .map(|declared| declared.kind)
    }
}
