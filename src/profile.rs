//! Streaming per-column statistics.
//!
//! Within a chunk, statistics accumulate with Welford's single-pass update;
//! chunks merge into the running aggregate with the Chan pairwise formula,
//! which is associative and commutative, so the final numbers do not depend
//! on chunk size or merge order (up to floating-point rounding). Memory is
//! O(profiled columns), independent of source row count.

use anyhow::{Result, anyhow};
use log::info;
use serde::Serialize;

use crate::{
    cli::ProfileArgs,
    coerce::parse_numeric,
    config::CleanConfig,
    reader::{ChunkedTableReader, ReaderOptions},
    render,
    source::SourceLocator,
    table::{Table, Value},
};

pub fn execute(args: &ProfileArgs) -> Result<()> {
    let config = CleanConfig {
        header_mode: args.force_header,
        delimiter: args.delimiter,
        chunk_size: args.chunk_size.max(1),
        ..CleanConfig::default()
    };
    let source = SourceLocator::parse(&args.input);
    let options = ReaderOptions {
        delimiter: args.delimiter,
        chunk_size: config.chunk_size,
        header_mode: args.force_header,
        columns: Vec::new(),
        row_budget: (args.limit > 0).then_some(args.limit),
    };

    let mut reader = ChunkedTableReader::open(&source, &options)?;
    for column in &args.columns {
        if !reader.headers().contains(column) {
            return Err(anyhow!("Column '{column}' not found in header"));
        }
    }
    let mut profiler = StreamingProfiler::new(&config, args.columns.clone());
    while let Some(chunk) = reader.next_chunk()? {
        profiler.observe_chunk(&chunk);
    }
    let skipped = reader.skipped_rows();
    let summaries = profiler.finalize();
    if summaries.is_empty() {
        return Err(anyhow!(
            "No numeric columns found in '{}'. Supply --columns to profile specific ones.",
            source.display_name()
        ));
    }

    let headers = vec![
        "column".to_string(),
        "count".to_string(),
        "mean".to_string(),
        "std".to_string(),
        "min".to_string(),
        "max".to_string(),
        "sum".to_string(),
        "nulls".to_string(),
    ];
    let rows: Vec<Vec<String>> = summaries
        .iter()
        .map(|(name, summary)| {
            vec![
                name.clone(),
                summary.count.to_string(),
                format_metric(summary.mean),
                format_metric(summary.std),
                format_metric(summary.min),
                format_metric(summary.max),
                format_metric(Some(summary.sum)),
                summary.nulls.to_string(),
            ]
        })
        .collect();
    render::print_table(&headers, &rows);
    if skipped > 0 {
        info!("Skipped {skipped} malformed row(s)");
    }
    info!("Profiled {} column(s)", summaries.len());
    Ok(())
}

fn format_metric(metric: Option<f64>) -> String {
    metric
        .map(|value| {
            if value.fract() == 0.0 && value.abs() < 1e15 {
                format!("{value:.0}")
            } else {
                format!("{value:.4}")
            }
        })
        .unwrap_or_default()
}

/// Running aggregate for one numeric column. `m2` is the sum of squared
/// deviations from the running mean.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ColumnAggregate {
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub sum: f64,
    pub null_count: u64,
}

impl ColumnAggregate {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
        self.sum += x;
        self.min = Some(self.min.map_or(x, |current| current.min(x)));
        self.max = Some(self.max.map_or(x, |current| current.max(x)));
    }

    pub fn push_null(&mut self) {
        self.null_count += 1;
    }

    /// Chan's pairwise update: for partials (n1, mu1, M2_1) and
    /// (n2, mu2, M2_2),
    ///   n = n1+n2; d = mu2-mu1; mu = mu1 + d*(n2/n);
    ///   M2 = M2_1 + M2_2 + d^2 * (n1*n2/n).
    pub fn merge(&mut self, other: &ColumnAggregate) {
        self.null_count += other.null_count;
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            let nulls = self.null_count;
            *self = *other;
            self.null_count = nulls;
            return;
        }

        let n1 = self.count as f64;
        let n2 = other.count as f64;
        let n = n1 + n2;
        let delta = other.mean - self.mean;
        self.mean += delta * (n2 / n);
        self.m2 += other.m2 + delta * delta * (n1 * n2 / n);
        self.count += other.count;
        self.sum += other.sum;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    /// Population variance.
    pub fn variance(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.m2 / self.count as f64)
        }
    }

    pub fn finalize(&self) -> ColumnSummary {
        ColumnSummary {
            count: self.count,
            mean: (self.count > 0).then_some(self.mean),
            std: self.variance().map(f64::sqrt),
            min: self.min,
            max: self.max,
            sum: self.sum,
            nulls: self.null_count,
        }
    }
}

/// Finalized statistics for one column. Immutable once produced at
/// end-of-stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub count: u64,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub sum: f64,
    pub nulls: u64,
}

/// Consumes chunks in any order and maintains per-column aggregates.
pub struct StreamingProfiler<'a> {
    config: &'a CleanConfig,
    /// Explicitly requested columns, or empty to infer from the first chunk.
    requested: Vec<String>,
    profiled: Option<Vec<(String, ColumnAggregate)>>,
}

impl<'a> StreamingProfiler<'a> {
    pub fn new(config: &'a CleanConfig, requested: Vec<String>) -> Self {
        Self {
            config,
            requested,
            profiled: None,
        }
    }

    /// Folds one chunk into the running aggregates. The chunk's own
    /// aggregate is computed independently and then merged, which is the
    /// same code path a parallel reducer would use.
    pub fn observe_chunk(&mut self, chunk: &Table) {
        if self.profiled.is_none() {
            // An empty chunk (e.g. a fully-stripped preamble) must not lock
            // in the inferred column set.
            if chunk.n_rows() == 0 && self.requested.is_empty() {
                return;
            }
            self.profiled = Some(self.select_columns(chunk));
        }
        let Some(profiled) = self.profiled.as_mut() else {
            return;
        };
        for (name, aggregate) in profiled.iter_mut() {
            let Some(column) = chunk.column(name) else {
                continue;
            };
            let mut partial = ColumnAggregate::default();
            for value in &column.values {
                match cell_as_numeric(value.as_ref(), self.config) {
                    Some(x) => partial.push(x),
                    None => partial.push_null(),
                }
            }
            aggregate.merge(&partial);
        }
    }

    /// Finalizes the aggregates seen so far. Partial aggregates are valid
    /// statistics for the rows seen, so early termination is well-defined.
    pub fn finalize(self) -> Vec<(String, ColumnSummary)> {
        self.profiled
            .unwrap_or_default()
            .into_iter()
            .map(|(name, aggregate)| (name, aggregate.finalize()))
            .collect()
    }

    fn select_columns(&self, chunk: &Table) -> Vec<(String, ColumnAggregate)> {
        if !self.requested.is_empty() {
            return self
                .requested
                .iter()
                .map(|name| (name.clone(), ColumnAggregate::default()))
                .collect();
        }
        chunk
            .columns
            .iter()
            .filter(|column| self.looks_numeric(column))
            .map(|column| (column.name.clone(), ColumnAggregate::default()))
            .collect()
    }

    /// A column is numeric when at least half of its sampled non-null
    /// values parse as numbers.
    fn looks_numeric(&self, column: &crate::table::Column) -> bool {
        let mut sampled = 0usize;
        let mut numeric = 0usize;
        for value in &column.values {
            if sampled >= self.config.coercion_sample_size {
                break;
            }
            let Some(value) = value.as_ref() else {
                continue;
            };
            if let Some(text) = value.as_text()
                && self.config.is_null_token(text)
            {
                continue;
            }
            sampled += 1;
            if cell_as_numeric(Some(value), self.config).is_some() {
                numeric += 1;
            }
        }
        sampled > 0 && numeric * 2 >= sampled
    }
}

fn cell_as_numeric(value: Option<&Value>, config: &CleanConfig) -> Option<f64> {
    match value? {
        Value::Num(n) => Some(*n),
        Value::Text(text) => {
            if config.is_null_token(text) {
                None
            } else {
                parse_numeric(text.trim(), config).and_then(|v| v.as_num())
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn text_chunk(name: &str, values: &[&str]) -> Table {
        Table::new(vec![Column::text(
            name,
            values
                .iter()
                .map(|v| Some(Value::Text(v.to_string())))
                .collect(),
        )])
    }

    fn aggregate_of(values: &[f64]) -> ColumnAggregate {
        let mut aggregate = ColumnAggregate::default();
        for &x in values {
            aggregate.push(x);
        }
        aggregate
    }

    #[test]
    fn welford_matches_naive_mean_and_variance() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let aggregate = aggregate_of(&values);
        assert_eq!(aggregate.count, 8);
        assert!((aggregate.mean - 5.0).abs() < 1e-12);
        // Population variance of this classic sample is exactly 4.
        assert!((aggregate.variance().unwrap() - 4.0).abs() < 1e-12);
        assert_eq!(aggregate.min, Some(2.0));
        assert_eq!(aggregate.max, Some(9.0));
        assert!((aggregate.sum - 40.0).abs() < 1e-12);
    }

    #[test]
    fn merged_partials_match_a_single_pass() {
        let all: Vec<f64> = (0..1000).map(|i| (i as f64).sin() * 100.0).collect();
        let single = aggregate_of(&all);

        let mut merged = ColumnAggregate::default();
        for part in all.chunks(137) {
            let partial = aggregate_of(part);
            merged.merge(&partial);
        }

        assert_eq!(merged.count, single.count);
        assert!((merged.mean - single.mean).abs() < 1e-9 * single.mean.abs().max(1.0));
        let rel = (merged.variance().unwrap() - single.variance().unwrap()).abs()
            / single.variance().unwrap();
        assert!(rel < 1e-9);
    }

    #[test]
    fn merge_grouping_order_does_not_matter() {
        let a = aggregate_of(&[1.0, 2.0, 3.0]);
        let b = aggregate_of(&[10.0, 20.0]);
        let c = aggregate_of(&[-5.0, 0.0, 5.0, 100.0]);

        let mut left = a;
        left.merge(&b);
        left.merge(&c);

        let mut right_tail = b;
        right_tail.merge(&c);
        let mut right = a;
        right.merge(&right_tail);

        assert_eq!(left.count, right.count);
        assert!((left.mean - right.mean).abs() < 1e-9);
        assert!((left.m2 - right.m2).abs() < 1e-9);
        assert_eq!(left.min, right.min);
        assert_eq!(left.max, right.max);
    }

    #[test]
    fn empty_partials_merge_as_identity() {
        let mut aggregate = ColumnAggregate::default();
        aggregate.merge(&aggregate_of(&[1.0, 2.0]));
        aggregate.merge(&ColumnAggregate::default());
        let summary = aggregate.finalize();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.mean, Some(1.5));
    }

    #[test]
    fn profiler_infers_numeric_columns_from_first_chunk() {
        let config = CleanConfig::default();
        let mut profiler = StreamingProfiler::new(&config, Vec::new());
        let chunk = Table::new(vec![
            Column::text(
                "amount",
                vec![
                    Some(Value::Text("10".to_string())),
                    Some(Value::Text("NA".to_string())),
                    Some(Value::Text("30".to_string())),
                ],
            ),
            Column::text(
                "label",
                vec![
                    Some(Value::Text("a".to_string())),
                    Some(Value::Text("b".to_string())),
                    Some(Value::Text("c".to_string())),
                ],
            ),
        ]);
        profiler.observe_chunk(&chunk);
        let summaries = profiler.finalize();
        assert_eq!(summaries.len(), 1);
        let (name, summary) = &summaries[0];
        assert_eq!(name, "amount");
        assert_eq!(summary.count, 2);
        assert_eq!(summary.nulls, 1);
        assert_eq!(summary.mean, Some(20.0));
    }

    #[test]
    fn chunk_size_does_not_change_the_numbers() {
        let config = CleanConfig::default();
        let values: Vec<String> = (0..500).map(|i| format!("{}", i % 97)).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();

        let mut coarse = StreamingProfiler::new(&config, vec!["v".to_string()]);
        coarse.observe_chunk(&text_chunk("v", &refs));
        let coarse = coarse.finalize();

        let mut fine = StreamingProfiler::new(&config, vec!["v".to_string()]);
        for part in refs.chunks(7) {
            fine.observe_chunk(&text_chunk("v", part));
        }
        let fine = fine.finalize();

        let (_, a) = &coarse[0];
        let (_, b) = &fine[0];
        assert_eq!(a.count, b.count);
        assert_eq!(a.nulls, b.nulls);
        assert!((a.mean.unwrap() - b.mean.unwrap()).abs() < 1e-9);
        assert!((a.std.unwrap() - b.std.unwrap()).abs() < 1e-9);
    }
}
