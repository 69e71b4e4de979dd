//! Interquartile-range winsorization of numeric columns.

use log::debug;

use crate::{
    config::CleanConfig,
    table::{ColumnKind, Table, Value},
};

/// Clips every numeric column to `[Q1 - k·IQR, Q3 + k·IQR]` and returns the
/// transformed table plus the total count of values changed. Columns with a
/// zero or non-finite IQR pass through untouched.
pub fn winsorize_table(table: Table, config: &CleanConfig) -> (Table, usize) {
    let mut total_capped = 0usize;
    let columns = table
        .columns
        .into_iter()
        .map(|mut column| {
            if column.kind != ColumnKind::Numeric {
                return column;
            }
            let mut sorted = column.numeric_values();
            if sorted.len() < 2 {
                return column;
            }
            sorted.sort_by(|a, b| a.total_cmp(b));
            let q1 = quantile(&sorted, 0.25);
            let q3 = quantile(&sorted, 0.75);
            let iqr = q3 - q1;
            if iqr == 0.0 || !iqr.is_finite() {
                return column;
            }
            let lower = q1 - config.outlier_iqr_multiplier * iqr;
            let upper = q3 + config.outlier_iqr_multiplier * iqr;

            let mut capped = 0usize;
            for value in column.values.iter_mut().flatten() {
                if let Value::Num(n) = value {
                    let clamped = n.clamp(lower, upper);
                    if clamped != *n {
                        *n = clamped;
                        capped += 1;
                    }
                }
            }
            if capped > 0 {
                debug!(
                    "Column '{}': capped {} value(s) to [{lower}, {upper}]",
                    column.name, capped
                );
            }
            total_capped += capped;
            column
        })
        .collect();
    (Table::new(columns), total_capped)
}

/// Linear-interpolation quantile over an ascending-sorted slice.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let idx = q * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = idx - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}
