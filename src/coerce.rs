//! Per-column type coercion: boolean, numeric, and datetime inference over
//! all-text columns, with global null-token normalization up front so the
//! heuristics never see placeholder junk as data.

use itertools::Itertools;
use log::debug;

use crate::{
    config::{CleanConfig, ReaderHints},
    table::{Column, ColumnKind, Table, Value, parse_naive_datetime},
};

/// Counts of values changed by coercion, per category. A value counts as
/// changed when its canonical rendering differs from the original raw
/// text, so re-running the pipeline over its own output counts zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoercionOutcome {
    pub booleans_standardized: usize,
    pub numerics_coerced: usize,
    pub datetimes_parsed: usize,
}

impl CoercionOutcome {
    fn absorb(&mut self, kind: ColumnKind, changed: usize) {
        match kind {
            ColumnKind::Boolean => self.booleans_standardized += changed,
            ColumnKind::Numeric => self.numerics_coerced += changed,
            ColumnKind::Datetime => self.datetimes_parsed += changed,
            ColumnKind::Text => {}
        }
    }
}

/// Coerces every column of `table` to its best-fit kind.
pub fn coerce_table(
    table: Table,
    config: &CleanConfig,
    hints: Option<&ReaderHints>,
) -> (Table, CoercionOutcome) {
    let mut outcome = CoercionOutcome::default();
    let columns = table
        .columns
        .into_iter()
        .map(|column| {
            let (column, changed) = coerce_column(column, config, hints);
            outcome.absorb(column.kind, changed);
            column
        })
        .collect();
    (Table::new(columns), outcome)
}

fn coerce_column(
    column: Column,
    config: &CleanConfig,
    hints: Option<&ReaderHints>,
) -> (Column, usize) {
    let name = column.name.clone();
    let raw: Vec<Option<String>> = column
        .values
        .iter()
        .map(|value| {
            value
                .as_ref()
                .map(Value::as_display)
                .filter(|text| !config.is_null_token(text))
        })
        .collect();

    if let Some(kind) = hints.and_then(|hints| hints.declared_kind(&name)) {
        return commit(name, kind, &raw, config);
    }

    let non_null: Vec<&str> = raw
        .iter()
        .filter_map(|value| value.as_deref())
        .map(str::trim)
        .collect();
    if non_null.is_empty() {
        let values = vec![None; raw.len()];
        return (
            Column {
                name,
                kind: ColumnKind::Text,
                values,
            },
            0,
        );
    }

    if is_boolean_column(&non_null, config) {
        return commit(name, ColumnKind::Boolean, &raw, config);
    }

    if is_numeric_column(&non_null, config) {
        return commit(name, ColumnKind::Numeric, &raw, config);
    }

    if config.datetime_infer && is_datetime_candidate(&name, &non_null, config, hints) {
        let parsed = non_null
            .iter()
            .filter(|value| parse_naive_datetime(value).is_some())
            .count();
        let rate = parsed as f64 / non_null.len() as f64;
        if rate > config.datetime_commit_threshold {
            return commit(name, ColumnKind::Datetime, &raw, config);
        }
        debug!("Column '{name}': datetime parse rate {rate:.2} below commit threshold");
    }

    commit(name, ColumnKind::Text, &raw, config)
}

/// A column is boolean when enough of its occurrences are known true/false
/// tokens and its distinct values are few (or are themselves all boolean
/// tokens, as with yes/no/y/n).
fn is_boolean_column(non_null: &[&str], config: &CleanConfig) -> bool {
    let lowered: Vec<String> = non_null.iter().map(|v| v.to_ascii_lowercase()).collect();
    let distinct: Vec<&String> = lowered.iter().unique().collect();
    let matched = lowered
        .iter()
        .filter(|value| config.is_boolean_token(value))
        .count();
    let fraction = matched as f64 / lowered.len() as f64;
    fraction >= config.boolean_match_threshold
        && (distinct.len() <= 3
            || distinct
                .iter()
                .all(|value| config.is_boolean_token(value)))
}

fn is_numeric_column(non_null: &[&str], config: &CleanConfig) -> bool {
    let sample_len = non_null.len().min(config.coercion_sample_size);
    let sample = &non_null[..sample_len];
    let matched = sample
        .iter()
        .filter(|value| is_numeric_token(value, config))
        .count();
    matched as f64 / sample.len() as f64 >= config.numeric_match_threshold
}

fn is_numeric_token(value: &str, config: &CleanConfig) -> bool {
    config.matches_numeric(value) || value.parse::<f64>().is_ok()
}

fn is_datetime_candidate(
    name: &str,
    non_null: &[&str],
    config: &CleanConfig,
    hints: Option<&ReaderHints>,
) -> bool {
    if let Some(hints) = hints
        && hints.datetime_columns.iter().any(|column| column == name)
    {
        return true;
    }
    let lowered = name.to_ascii_lowercase();
    if ["date", "time", "timestamp"]
        .iter()
        .any(|hint| lowered.contains(hint))
        || lowered.ends_with("_at")
        || lowered.ends_with("_ts")
    {
        return true;
    }
    let sample_len = non_null.len().min(config.coercion_sample_size);
    let iso_like = non_null[..sample_len]
        .iter()
        .filter(|value| looks_iso_dated(value))
        .count();
    iso_like * 2 > sample_len
}

/// `YYYY-MM-DD...` shaped, without pulling a full parse into the sampling
/// pass.
fn looks_iso_dated(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}

/// Converts every raw value to `kind`, counting values whose canonical
/// rendering differs from their original text. Unconvertible values become
/// null; the match-rate thresholds are the only guard against
/// over-triggering.
fn commit(
    name: String,
    kind: ColumnKind,
    raw: &[Option<String>],
    config: &CleanConfig,
) -> (Column, usize) {
    let mut changed = 0usize;
    let values: Vec<Option<Value>> = raw
        .iter()
        .map(|cell| {
            let Some(text) = cell.as_deref() else {
                return None;
            };
            let converted = convert(text.trim(), kind, config);
            let rendering_differs = match &converted {
                Some(value) => value.as_display() != text,
                None => true,
            };
            if rendering_differs {
                changed += 1;
            }
            converted
        })
        .collect();
    (Column { name, kind, values }, changed)
}

fn convert(trimmed: &str, kind: ColumnKind, config: &CleanConfig) -> Option<Value> {
    match kind {
        ColumnKind::Boolean => {
            let lowered = trimmed.to_ascii_lowercase();
            if config.is_true_token(&lowered) {
                Some(Value::Bool(true))
            } else if config.is_false_token(&lowered) {
                Some(Value::Bool(false))
            } else {
                None
            }
        }
        ColumnKind::Numeric => parse_numeric(trimmed, config),
        ColumnKind::Datetime => parse_naive_datetime(trimmed).map(Value::Datetime),
        ColumnKind::Text => Some(Value::Text(trimmed.to_string())),
    }
}

/// Parses a numeric token, honoring thousands separators and trailing
/// percent signs (percent values are divided by 100).
pub fn parse_numeric(trimmed: &str, config: &CleanConfig) -> Option<Value> {
    if let Ok(plain) = trimmed.parse::<f64>() {
        return Some(Value::Num(plain));
    }
    if !config.matches_numeric(trimmed) {
        return None;
    }
    let percent = trimmed.ends_with('%');
    let stripped: String = trimmed
        .trim_end_matches('%')
        .chars()
        .filter(|ch| *ch != ',')
        .collect();
    let parsed: f64 = stripped.parse().ok()?;
    Some(Value::Num(if percent { parsed / 100.0 } else { parsed }))
}
