//! The cleaning orchestrator: one run over one source.
//!
//! Stages run strictly in sequence — header resolution, the streaming
//! sub-loop (statistics + working-set assembly), coercion, winsorization,
//! imputation, dedup — each consuming the previous stage's table. Stages
//! that need cross-row decisions operate on a bounded working table capped
//! at `working_set_cap` rows; exceeding the cap degrades those stages to
//! the capped subset (flagged in the report) while statistics still stream
//! over the whole file.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::{
    cli::CleanArgs,
    coerce,
    config::{CleanConfig, ReaderHints},
    header, impute, io_utils, outliers,
    profile::{ColumnSummary, StreamingProfiler},
    reader::{ChunkedTableReader, ReaderOptions},
    report::CleaningReport,
    source::SourceLocator,
    table::{Table, Value},
};

pub fn execute(args: &CleanArgs) -> Result<()> {
    let config = config_from_args(args);
    let hints = match &args.hints {
        Some(path) => Some(
            ReaderHints::load(path).with_context(|| format!("Loading hints from {path:?}"))?,
        ),
        None => None,
    };
    let source = SourceLocator::parse(&args.input);
    info!(
        "Cleaning '{}' with delimiter '{}'",
        source.display_name(),
        crate::printable_delimiter(source.resolve_delimiter(config.delimiter))
    );

    let orchestrator = match &hints {
        Some(hints) => CleaningOrchestrator::with_hints(&config, hints),
        None => CleaningOrchestrator::new(&config),
    };
    let outcome = orchestrator.run(&source)?;

    let delimiter = source.resolve_delimiter(args.delimiter);
    let mut writer = io_utils::open_csv_writer(args.output.as_deref(), delimiter)?;
    writer
        .write_record(outcome.table.column_names())
        .context("Writing output headers")?;
    for idx in 0..outcome.table.n_rows() {
        writer
            .write_record(outcome.table.render_row(idx))
            .with_context(|| format!("Writing output row {}", idx + 2))?;
    }
    writer.flush().context("Flushing output")?;

    if let Some(path) = &args.report {
        outcome
            .report
            .save(path)
            .with_context(|| format!("Writing report to {path:?}"))?;
        info!("Cleaning report written to {path:?}");
    }
    for warning in &outcome.report.warnings {
        log::warn!("{warning}");
    }
    Ok(())
}

fn config_from_args(args: &CleanArgs) -> CleanConfig {
    CleanConfig {
        header_mode: args.force_header,
        delimiter: args.delimiter,
        coerce_types: !args.no_coerce,
        datetime_infer: !args.no_datetime_infer,
        cap_outliers: !args.no_cap_outliers,
        impute_missing: !args.no_impute,
        drop_empty_columns: !args.keep_empty_columns,
        drop_duplicate_columns: !args.keep_duplicate_columns,
        drop_duplicate_rows: !args.keep_duplicate_rows,
        chunk_size: args.chunk_size.max(1),
        working_set_cap: args.working_set_cap.max(1),
        ..CleanConfig::default()
    }
}

#[derive(Debug)]
pub struct CleaningOutcome {
    pub table: Table,
    pub report: CleaningReport,
    /// Full-file streaming statistics, computed over every chunk even when
    /// the working set was capped.
    pub stats: Vec<(String, ColumnSummary)>,
}

pub struct CleaningOrchestrator<'a> {
    config: &'a CleanConfig,
    hints: Option<&'a ReaderHints>,
}

impl<'a> CleaningOrchestrator<'a> {
    pub fn new(config: &'a CleanConfig) -> Self {
        Self {
            config,
            hints: None,
        }
    }

    pub fn with_hints(config: &'a CleanConfig, hints: &'a ReaderHints) -> Self {
        Self {
            config,
            hints: Some(hints),
        }
    }

    pub fn run(&self, source: &SourceLocator) -> Result<CleaningOutcome> {
        let options = self.reader_options();
        let mut reader = ChunkedTableReader::open(source, &options)?;
        let headers: Vec<String> = reader.headers().to_vec();
        let mut report = CleaningReport {
            columns_before: headers.len(),
            ..CleaningReport::default()
        };

        // Streaming sub-loop: fold every chunk into the profiler, assemble
        // the working set up to the cap, drop the preamble from the first
        // chunk before anything else sees it.
        let mut profiler = StreamingProfiler::new(self.config, Vec::new());
        let mut working = Table::with_names(&headers);
        let mut first_chunk = true;
        let mut rows_streamed = 0usize;
        while let Some(mut chunk) = reader.next_chunk()? {
            if first_chunk {
                first_chunk = false;
                chunk = self.strip_preamble(chunk, &headers, &mut report);
            }
            rows_streamed += chunk.n_rows();
            profiler.observe_chunk(&chunk);

            if report.working_set_overflow {
                continue;
            }
            let capacity = self.config.working_set_cap - working.n_rows();
            if chunk.n_rows() > capacity {
                chunk.truncate_rows(capacity);
                report.working_set_overflow = true;
                report.warnings.push(format!(
                    "working set capped at {} row(s); coercion, imputation and dedup ran on the capped subset",
                    self.config.working_set_cap
                ));
            }
            working.append(chunk);
        }
        report.rows_before = rows_streamed;
        report.malformed_rows_skipped = reader.skipped_rows();
        debug!(
            "Streamed {rows_streamed} row(s), working set holds {}",
            working.n_rows()
        );

        let table = self.run_bounded_stages(working, &mut report);

        report.rows_after = table.n_rows();
        report.columns_after = table.n_columns();
        report.schema_fingerprint = table.schema_fingerprint();
        for column in &table.columns {
            report
                .column_kinds
                .insert(column.name.clone(), column.kind.as_str().to_string());
        }
        info!(
            "Cleaned '{}': {} -> {} row(s), {} -> {} column(s), {} issue(s)",
            source.display_name(),
            report.rows_before,
            report.rows_after,
            report.columns_before,
            report.columns_after,
            report.issues_detected()
        );

        Ok(CleaningOutcome {
            table,
            report,
            stats: profiler.finalize(),
        })
    }

    fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            delimiter: self.config.delimiter.or_else(|| {
                self.hints
                    .and_then(|hints| hints.delimiter)
                    .map(|delim| delim as u8)
            }),
            chunk_size: self.config.chunk_size,
            header_mode: self.config.header_mode,
            columns: self
                .hints
                .map(|hints| hints.columns.clone())
                .unwrap_or_default(),
            row_budget: None,
        }
    }

    /// Runs the metadata-row detector over the head of the first chunk and
    /// drops whatever preamble it finds. Suggested enriched names are
    /// surfaced as a warning, never applied silently.
    fn strip_preamble(
        &self,
        chunk: Table,
        headers: &[String],
        report: &mut CleaningReport,
    ) -> Table {
        let head: Vec<Vec<String>> = (0..chunk.n_rows().min(self.config.metadata_scan_rows))
            .map(|idx| chunk.render_row(idx))
            .collect();
        let scan = header::detect_metadata_rows(&head, headers, self.config);
        if scan.metadata_rows_found == 0 {
            return chunk;
        }
        report.metadata_rows_dropped = scan.metadata_rows_found;
        if scan.should_rename
            && let Some(suggested) = &scan.suggested_headers
        {
            report.warnings.push(format!(
                "metadata row suggests column names: {}",
                suggested.join(", ")
            ));
        }
        let columns = chunk
            .columns
            .into_iter()
            .map(|mut column| {
                column.values.drain(..scan.data_start_offset);
                column
            })
            .collect();
        Table::new(columns)
    }

    /// The bounded stages, in order: coercion, empty-column drop,
    /// winsorization, imputation, duplicate-column drop, duplicate-row
    /// drop. Each is independently toggleable.
    fn run_bounded_stages(&self, working: Table, report: &mut CleaningReport) -> Table {
        let mut table = working;

        if self.config.coerce_types {
            let (coerced, outcome) = coerce::coerce_table(table, self.config, self.hints);
            report.booleans_standardized = outcome.booleans_standardized;
            report.numerics_coerced = outcome.numerics_coerced;
            report.datetimes_parsed = outcome.datetimes_parsed;
            table = coerced;
        }

        if self.config.drop_empty_columns {
            let before = table.n_columns();
            let columns = table
                .columns
                .into_iter()
                .filter(|column| !column.is_all_null() || column.is_empty())
                .collect();
            table = Table::new(columns);
            report.empty_columns_dropped = before - table.n_columns();
        }

        if self.config.cap_outliers {
            let (capped_table, capped) = outliers::winsorize_table(table, self.config);
            table = capped_table;
            report.outliers_capped = capped;
        }

        if self.config.impute_missing {
            let imputed = impute::impute_table(table);
            table = imputed.table;
            report.nulls_imputed = imputed.nulls_imputed;
            report.imputations = imputed.decisions;
            report.warnings.extend(imputed.warnings);
        }

        if self.config.drop_duplicate_columns {
            let (deduped, dropped) = drop_duplicate_columns(table);
            table = deduped;
            report.duplicate_columns_dropped = dropped;
        }

        if self.config.drop_duplicate_rows {
            let (deduped, dropped) = drop_duplicate_rows(table);
            table = deduped;
            report.duplicate_rows_dropped = dropped;
        }

        table
    }
}

/// Drops later columns whose rendered contents exactly duplicate an earlier
/// column's; the first occurrence is kept.
fn drop_duplicate_columns(table: Table) -> (Table, usize) {
    let mut seen: HashMap<Vec<String>, usize> = HashMap::new();
    let mut keep = Vec::new();
    let mut dropped = 0usize;
    for (idx, column) in table.columns.iter().enumerate() {
        let rendered: Vec<String> = column
            .values
            .iter()
            .map(|v| v.as_ref().map(Value::as_display).unwrap_or_default())
            .collect();
        if let Some(&first) = seen.get(&rendered) {
            debug!(
                "Column '{}' duplicates column '{}'; dropped",
                column.name, table.columns[first].name
            );
            dropped += 1;
        } else {
            seen.insert(rendered, idx);
            keep.push(idx);
        }
    }
    if dropped == 0 {
        return (table, 0);
    }
    let columns = table
        .columns
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| keep.contains(idx))
        .map(|(_, column)| column)
        .collect();
    (Table::new(columns), dropped)
}

/// Drops exact duplicate rows (rendered cell text), keeping the first
/// occurrence and preserving order.
fn drop_duplicate_rows(table: Table) -> (Table, usize) {
    let n_rows = table.n_rows();
    let mut seen: HashSet<Vec<String>> = HashSet::with_capacity(n_rows);
    let mut keep = Vec::with_capacity(n_rows);
    for idx in 0..n_rows {
        if seen.insert(table.render_row(idx)) {
            keep.push(idx);
        }
    }
    let dropped = n_rows - keep.len();
    if dropped == 0 {
        return (table, 0);
    }
    let columns = table
        .columns
        .into_iter()
        .map(|mut column| {
            let mut values = std::mem::take(&mut column.values);
            column.values = keep.iter().map(|&idx| values[idx].take()).collect();
            column
        })
        .collect();
    (Table::new(columns), dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_source(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".csv")
            .tempfile()
            .expect("temp file");
        file.write_all(contents.as_bytes()).expect("write source");
        file
    }

    fn clean(contents: &str, config: &CleanConfig) -> CleaningOutcome {
        let file = write_source(contents);
        let source = SourceLocator::LocalPath(file.path().to_path_buf());
        CleaningOrchestrator::new(config)
            .run(&source)
            .expect("clean run")
    }

    #[test]
    fn full_pipeline_coerces_imputes_and_reports() {
        let data = "id,amount,active\n\
                    1,10,yes\n\
                    2,NA,no\n\
                    3,30,yes\n\
                    4,40,Y\n\
                    5,50,n\n\
                    6,60,yes\n\
                    7,70,no\n\
                    8,80,yes\n\
                    9,90,no\n\
                    10,100,yes\n\
                    11,110,no\n\
                    12,120,yes\n\
                    13,130,no\n\
                    14,140,yes\n\
                    15,150,no\n\
                    16,160,yes\n\
                    17,170,no\n\
                    18,180,yes\n\
                    19,190,no\n\
                    20,200,yes\n\
                    21,210,no\n";
        let config = CleanConfig::default();
        let outcome = clean(data, &config);
        assert_eq!(outcome.report.rows_before, 21);
        assert_eq!(outcome.report.rows_after, 21);
        assert_eq!(outcome.report.column_kinds["amount"], "numeric");
        assert_eq!(outcome.report.column_kinds["active"], "boolean");
        assert_eq!(outcome.report.nulls_imputed, 1);
        assert_eq!(outcome.report.imputations.len(), 1);
        let amount = outcome.table.column("amount").unwrap();
        assert_eq!(amount.null_count(), 0);
        assert!(!outcome.report.schema_fingerprint.is_empty());
    }

    #[test]
    fn metadata_preamble_is_dropped_and_counted() {
        let data = "a,b,c\n\
                    report generated,by export tool,v2\n\
                    1,2,3\n\
                    4,5,6\n\
                    7,8,9\n";
        let config = CleanConfig::default();
        let outcome = clean(data, &config);
        assert_eq!(outcome.report.metadata_rows_dropped, 1);
        assert_eq!(outcome.report.rows_before, 3);
        assert_eq!(outcome.table.n_rows(), 3);
    }

    #[test]
    fn empty_and_duplicate_columns_are_dropped() {
        let data = "a,blank,copy\n\
                    1,NA,1\n\
                    2,,2\n\
                    3,null,3\n";
        let config = CleanConfig::default();
        let outcome = clean(data, &config);
        assert_eq!(outcome.report.empty_columns_dropped, 1);
        assert_eq!(outcome.report.duplicate_columns_dropped, 1);
        assert_eq!(outcome.table.column_names(), vec!["a".to_string()]);
    }

    #[test]
    fn duplicate_rows_are_dropped_after_cleaning() {
        let data = "a,b\n5,x\n5,x\n6,y\n5,x\n";
        let config = CleanConfig::default();
        let outcome = clean(data, &config);
        assert_eq!(outcome.report.duplicate_rows_dropped, 2);
        assert_eq!(outcome.table.n_rows(), 2);
    }

    #[test]
    fn stage_toggles_disable_their_stages() {
        let data = "a,b\n5,x\n5,x\nNA,y\n";
        let config = CleanConfig {
            impute_missing: false,
            drop_duplicate_rows: false,
            ..CleanConfig::default()
        };
        let outcome = clean(data, &config);
        assert_eq!(outcome.report.duplicate_rows_dropped, 0);
        assert_eq!(outcome.report.nulls_imputed, 0);
        assert_eq!(outcome.table.n_rows(), 3);
        assert_eq!(outcome.table.column("a").unwrap().null_count(), 1);
    }

    #[test]
    fn working_set_cap_degrades_gracefully_but_stats_stream_everything() {
        let mut data = String::from("v\n");
        for i in 0..50 {
            data.push_str(&format!("{i}\n"));
        }
        let config = CleanConfig {
            chunk_size: 10,
            working_set_cap: 25,
            ..CleanConfig::default()
        };
        let outcome = clean(&data, &config);
        assert!(outcome.report.working_set_overflow);
        assert_eq!(outcome.report.rows_before, 50);
        assert_eq!(outcome.report.rows_after, 25);
        let (_, summary) = outcome
            .stats
            .iter()
            .find(|(name, _)| name == "v")
            .expect("v profiled");
        assert_eq!(summary.count, 50);
    }

    #[test]
    fn cleaning_twice_finds_nothing_the_second_time() {
        // One thousands-separated token, one null token, boolean flags; the
        // numeric spread is tight so winsorization stays a no-op and the
        // fixpoint is reached after one pass.
        let mut data = String::from("id,score,flag\n");
        data.push_str("1,\"1,100\",Y\n");
        data.push_str("2,NA,N\n");
        for i in 3..=21 {
            data.push_str(&format!("{i},{},{}\n", 1000 + i * 3, if i % 2 == 0 { "Y" } else { "N" }));
        }
        let config = CleanConfig::default();
        let first = clean(&data, &config);
        assert!(first.report.issues_detected() > 0);

        // Render the cleaned output as CSV and clean it again.
        let mut second_input = first.table.column_names().join(",");
        second_input.push('\n');
        for idx in 0..first.table.n_rows() {
            second_input.push_str(&first.table.render_row(idx).join(","));
            second_input.push('\n');
        }
        let second = clean(&second_input, &config);
        assert_eq!(
            second.report.issues_detected(),
            0,
            "second pass should be clean; report: {:?}",
            second.report
        );
        assert_eq!(
            first.report.schema_fingerprint,
            second.report.schema_fingerprint
        );
    }
}
