//! Missingness-aware imputation.
//!
//! For every column with at least one null, a strategy is selected from the
//! missing fraction and (for numeric columns) the column's correlation with
//! the other numeric columns. Estimator failures never surface as errors:
//! each failure downgrades to the next simpler method in the same branch
//! and the recorded decision names the fallback. Datetime columns are never
//! imputed, to avoid injecting false temporal signal.

use std::collections::HashMap;

use itertools::Itertools;
use log::debug;
use serde::Serialize;

use crate::table::{Column, ColumnKind, Table, Value};

const KNN_NEIGHBORS: usize = 5;
const MAX_REGRESSION_PREDICTORS: usize = 3;
const CORRELATION_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Serialize)]
pub struct ImputationDecision {
    pub column: String,
    pub method: String,
    pub confidence: f64,
    pub missing_fraction: f64,
    pub imputed_count: usize,
}

#[derive(Debug, Default)]
pub struct ImputationResult {
    pub table: Table,
    pub decisions: Vec<ImputationDecision>,
    pub warnings: Vec<String>,
    pub nulls_imputed: usize,
}

/// Imputes every eligible column of `table` and records one decision per
/// column touched. The bucket boundaries and confidences are part of the
/// decision-table semantics, not tunable configuration.
pub fn impute_table(table: Table) -> ImputationResult {
    let n_rows = table.n_rows();
    // Snapshot of the numeric columns before any fills, so every column's
    // estimator sees the same predictor basis regardless of column order.
    let numeric_basis: Vec<(usize, Vec<Option<f64>>)> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, column)| column.kind == ColumnKind::Numeric)
        .map(|(idx, column)| {
            let values = column
                .values
                .iter()
                .map(|v| v.as_ref().and_then(Value::as_num))
                .collect();
            (idx, values)
        })
        .collect();

    let mut result = ImputationResult::default();
    let mut columns = Vec::with_capacity(table.columns.len());
    for (idx, mut column) in table.columns.into_iter().enumerate() {
        let missing = column.null_count();
        if missing == 0 || n_rows == 0 || column.is_all_null() {
            if column.is_all_null() && !column.is_empty() {
                result
                    .warnings
                    .push(format!("column '{}' is entirely null; not imputed", column.name));
            }
            columns.push(column);
            continue;
        }
        let fraction = missing as f64 / n_rows as f64;
        match column.kind {
            ColumnKind::Numeric => {
                let decision =
                    impute_numeric(&mut column, idx, fraction, &numeric_basis, &mut result);
                result.nulls_imputed += decision.imputed_count;
                result.decisions.push(decision);
            }
            ColumnKind::Text | ColumnKind::Boolean => {
                let decision = impute_categorical(&mut column, fraction, &mut result);
                result.nulls_imputed += decision.imputed_count;
                result.decisions.push(decision);
            }
            ColumnKind::Datetime => {
                debug!("Column '{}': datetime nulls left in place", column.name);
            }
        }
        columns.push(column);
    }
    result.table = Table::new(columns);
    result
}

fn impute_numeric(
    column: &mut Column,
    column_idx: usize,
    fraction: f64,
    basis: &[(usize, Vec<Option<f64>>)],
    result: &mut ImputationResult,
) -> ImputationDecision {
    let non_null = column.numeric_values();

    let (method, confidence, fills) = if fraction < 0.05 {
        let skew = skewness(&non_null);
        if skew.abs() > 1.0 {
            ("median".to_string(), 0.95, constant_fill(column, median(&non_null)))
        } else {
            ("mean".to_string(), 0.95, constant_fill(column, mean(&non_null)))
        }
    } else if fraction < 0.30 {
        multivariate_branch(column, column_idx, basis, result)
    } else {
        if fraction < 0.50 {
            result.warnings.push(format!(
                "column '{}' is {:.0}% missing; using forward/backward fill",
                column.name,
                fraction * 100.0
            ));
        } else {
            result.warnings.push(format!(
                "column '{}' is {:.0}% missing; imputed values are mostly synthetic",
                column.name,
                fraction * 100.0
            ));
        }
        directional_fill_branch(column, &non_null)
    };

    let imputed = apply_fills(column, fills);
    ImputationDecision {
        column: column.name.clone(),
        method,
        confidence,
        missing_fraction: fraction,
        imputed_count: imputed,
    }
}

/// The 0.05 <= r < 0.30 branch: neighbor-based when the column correlates
/// with the rest of the numeric table, regression otherwise, median when
/// either estimator refuses.
fn multivariate_branch(
    column: &Column,
    column_idx: usize,
    basis: &[(usize, Vec<Option<f64>>)],
    result: &mut ImputationResult,
) -> (String, f64, Vec<Option<f64>>) {
    let target = basis
        .iter()
        .find(|(idx, _)| *idx == column_idx)
        .map(|(_, values)| values.as_slice())
        .expect("numeric column present in basis");
    let others: Vec<&[Option<f64>]> = basis
        .iter()
        .filter(|(idx, _)| *idx != column_idx)
        .map(|(_, values)| values.as_slice())
        .collect();

    let correlations: Vec<f64> = others
        .iter()
        .map(|other| pearson(target, other).unwrap_or(0.0))
        .collect();
    let strongest = correlations.iter().fold(0.0f64, |acc, c| acc.max(c.abs()));

    let attempt = if strongest > CORRELATION_THRESHOLD && others.len() >= 2 {
        ("knn", 0.85, knn_estimate(target, &others))
    } else {
        (
            "iterative_regression",
            0.80,
            regression_estimate(target, &others, &correlations),
        )
    };

    match attempt {
        (method, confidence, Ok(fills)) => (method.to_string(), confidence, fills),
        (method, _, Err(reason)) => {
            result.warnings.push(format!(
                "column '{}': {method} estimator failed ({reason}); fell back to median",
                column.name
            ));
            let non_null = column.numeric_values();
            (
                "median_fallback".to_string(),
                0.70,
                constant_fill(column, median(&non_null)),
            )
        }
    }
}

/// Forward-fill then backward-fill, with a median sweep for anything still
/// null. Confidence 0.60 when the directional passes clear every null,
/// 0.50 when the median fallback had to fire.
fn directional_fill_branch(column: &Column, non_null: &[f64]) -> (String, f64, Vec<Option<f64>>) {
    let mut filled: Vec<Option<f64>> = column
        .values
        .iter()
        .map(|v| v.as_ref().and_then(Value::as_num))
        .collect();

    let mut last = None;
    for value in filled.iter_mut() {
        match value {
            Some(v) => last = Some(*v),
            None => *value = last,
        }
    }
    let mut next = None;
    for value in filled.iter_mut().rev() {
        match value {
            Some(v) => next = Some(*v),
            None => *value = next,
        }
    }

    if filled.iter().all(Option::is_some) {
        ("forward_backward_fill".to_string(), 0.60, filled)
    } else {
        let fallback = median(non_null);
        for value in filled.iter_mut() {
            if value.is_none() {
                *value = fallback;
            }
        }
        ("forward_backward_fill_median".to_string(), 0.50, filled)
    }
}

fn impute_categorical(
    column: &mut Column,
    fraction: f64,
    result: &mut ImputationResult,
) -> ImputationDecision {
    let (method, confidence, fill) = if fraction < 0.10 {
        match mode_value(column) {
            Some(value) => ("mode".to_string(), 0.90, value),
            None => (
                "constant_unknown".to_string(),
                0.50,
                sentinel(column.kind, "Unknown"),
            ),
        }
    } else if fraction < 0.30 {
        // The absence itself is informative; name it instead of guessing.
        (
            "constant_missing".to_string(),
            0.75,
            sentinel(column.kind, "Missing"),
        )
    } else {
        result.warnings.push(format!(
            "column '{}' is {:.0}% missing; filled with a high-missingness sentinel",
            column.name,
            fraction * 100.0
        ));
        (
            "constant_unknown_high_missing".to_string(),
            0.40,
            sentinel(column.kind, "Unknown_HighMissing"),
        )
    };

    let mut imputed = 0usize;
    for value in column.values.iter_mut() {
        if value.is_none() {
            *value = Some(fill.clone());
            imputed += 1;
        }
    }
    ImputationDecision {
        column: column.name.clone(),
        method,
        confidence,
        missing_fraction: fraction,
        imputed_count: imputed,
    }
}

/// Most frequent non-null value; `None` when every value is equally rare.
/// Boolean ties resolve through the same frequency rule.
fn mode_value(column: &Column) -> Option<Value> {
    let mut counts: HashMap<String, (usize, Value)> = HashMap::new();
    for value in column.values.iter().flatten() {
        let entry = counts
            .entry(value.as_display())
            .or_insert_with(|| (0, value.clone()));
        entry.0 += 1;
    }
    let best = counts
        .values()
        .max_by_key(|(count, _)| *count)
        .map(|(count, value)| (*count, value.clone()))?;
    let contenders = counts.values().filter(|(count, _)| *count == best.0).count();
    if best.0 <= 1 && counts.len() > 1 {
        return None;
    }
    if contenders > 1 {
        // Deterministic tie-break: smallest rendering wins.
        return counts
            .values()
            .filter(|(count, _)| *count == best.0)
            .map(|(_, value)| value.clone())
            .sorted_by_key(Value::as_display)
            .next();
    }
    Some(best.1)
}

/// Sentinels keep a Boolean column boolean by falling back to `false`; text
/// columns carry the literal sentinel category.
fn sentinel(kind: ColumnKind, label: &str) -> Value {
    match kind {
        ColumnKind::Boolean => Value::Bool(false),
        _ => Value::Text(label.to_string()),
    }
}

fn constant_fill(column: &Column, fill: Option<f64>) -> Vec<Option<f64>> {
    column
        .values
        .iter()
        .map(|v| v.as_ref().and_then(Value::as_num).or(fill))
        .collect()
}

fn apply_fills(column: &mut Column, fills: Vec<Option<f64>>) -> usize {
    let mut imputed = 0usize;
    for (value, fill) in column.values.iter_mut().zip(fills) {
        if value.is_none()
            && let Some(fill) = fill
        {
            *value = Some(Value::Num(fill));
            imputed += 1;
        }
    }
    imputed
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Population moment-ratio skewness, g1 = m3 / m2^1.5.
pub fn skewness(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mu = values.iter().sum::<f64>() / n;
    let m2 = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / n;
    let m3 = values.iter().map(|v| (v - mu).powi(3)).sum::<f64>() / n;
    if m2 <= f64::EPSILON {
        0.0
    } else {
        m3 / m2.powf(1.5)
    }
}

/// Pearson correlation over pairwise-complete observations.
pub fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some((((*x)?), ((*y)?))))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// K-nearest-rows estimator: each missing target value becomes the mean of
/// the targets of the nearest complete rows, by Euclidean distance over
/// z-scaled features that both rows share. Refuses when any missing row
/// has no comparable neighbor.
fn knn_estimate(
    target: &[Option<f64>],
    features: &[&[Option<f64>]],
) -> Result<Vec<Option<f64>>, String> {
    if features.is_empty() {
        return Err("no feature columns".to_string());
    }
    let scaled: Vec<Vec<Option<f64>>> = features.iter().map(|f| z_scale(f)).collect();
    let candidates: Vec<usize> = (0..target.len())
        .filter(|&row| target[row].is_some())
        .collect();
    if candidates.is_empty() {
        return Err("no rows with a known target".to_string());
    }

    let mut fills: Vec<Option<f64>> = target.to_vec();
    for row in 0..target.len() {
        if target[row].is_some() {
            continue;
        }
        let mut distances: Vec<(f64, f64)> = Vec::new();
        for &candidate in &candidates {
            if let Some(distance) = row_distance(&scaled, row, candidate) {
                distances.push((distance, target[candidate].expect("candidate has target")));
            }
        }
        if distances.is_empty() {
            return Err(format!("row {row} shares no features with any complete row"));
        }
        distances.sort_by(|a, b| a.0.total_cmp(&b.0));
        let neighbors = &distances[..distances.len().min(KNN_NEIGHBORS)];
        let estimate = neighbors.iter().map(|(_, v)| v).sum::<f64>() / neighbors.len() as f64;
        fills[row] = Some(estimate);
    }
    Ok(fills)
}

fn z_scale(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let Some(mu) = mean(&present) else {
        return vec![None; values.len()];
    };
    let var = present.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / present.len() as f64;
    let sd = var.sqrt();
    values
        .iter()
        .map(|v| v.map(|v| if sd > f64::EPSILON { (v - mu) / sd } else { 0.0 }))
        .collect()
}

fn row_distance(features: &[Vec<Option<f64>>], a: usize, b: usize) -> Option<f64> {
    let mut sum = 0.0;
    let mut shared = 0usize;
    for feature in features {
        if let (Some(x), Some(y)) = (feature[a], feature[b]) {
            sum += (x - y).powi(2);
            shared += 1;
        }
    }
    if shared == 0 {
        None
    } else {
        // Normalize by dimensionality so rows with more shared features
        // are not penalized.
        Some((sum / shared as f64).sqrt())
    }
}

/// Least-squares regression over the best-correlated predictors, solved by
/// Gaussian elimination on the normal equations. Missing predictor cells
/// are mean-filled for prediction only. Refuses on singular systems or
/// insufficient training rows.
fn regression_estimate(
    target: &[Option<f64>],
    features: &[&[Option<f64>]],
    correlations: &[f64],
) -> Result<Vec<Option<f64>>, String> {
    if features.is_empty() {
        return Err("no predictor columns".to_string());
    }
    let chosen: Vec<usize> = correlations
        .iter()
        .enumerate()
        .sorted_by(|a, b| b.1.abs().total_cmp(&a.1.abs()))
        .take(MAX_REGRESSION_PREDICTORS)
        .map(|(idx, _)| idx)
        .collect();

    let predictor_means: Vec<f64> = chosen
        .iter()
        .map(|&idx| {
            let present: Vec<f64> = features[idx].iter().flatten().copied().collect();
            mean(&present).unwrap_or(0.0)
        })
        .collect();

    // Training rows: target and every chosen predictor present.
    let training: Vec<usize> = (0..target.len())
        .filter(|&row| {
            target[row].is_some() && chosen.iter().all(|&idx| features[idx][row].is_some())
        })
        .collect();
    if training.len() < chosen.len() + 1 {
        return Err(format!(
            "{} training row(s) for {} coefficient(s)",
            training.len(),
            chosen.len() + 1
        ));
    }

    // Normal equations X'X beta = X'y with an intercept column.
    let k = chosen.len() + 1;
    let mut xtx = vec![vec![0.0f64; k]; k];
    let mut xty = vec![0.0f64; k];
    for &row in &training {
        let mut x = vec![1.0f64];
        x.extend(chosen.iter().map(|&idx| features[idx][row].expect("training row complete")));
        let y = target[row].expect("training row has target");
        for i in 0..k {
            for j in 0..k {
                xtx[i][j] += x[i] * x[j];
            }
            xty[i] += x[i] * y;
        }
    }
    let beta = solve_linear_system(xtx, xty).ok_or_else(|| "singular system".to_string())?;

    let mut fills: Vec<Option<f64>> = target.to_vec();
    for row in 0..target.len() {
        if target[row].is_some() {
            continue;
        }
        let mut estimate = beta[0];
        for (slot, &idx) in chosen.iter().enumerate() {
            let x = features[idx][row].unwrap_or(predictor_means[slot]);
            estimate += beta[slot + 1] * x;
        }
        fills[row] = Some(estimate);
    }
    Ok(fills)
}

/// Gaussian elimination with partial pivoting; `None` on singularity.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0f64; n];
    for col in (0..n).rev() {
        let mut acc = b[col];
        for k in col + 1..n {
            acc -= a[col][k] * x[k];
        }
        x[col] = acc / a[col][col];
    }
    Some(x)
}
