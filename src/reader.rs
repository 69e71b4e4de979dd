//! Chunked table reading with ordered encoding/engine fallback.
//!
//! A [`ChunkedTableReader`] opens a delimited-text source and yields
//! bounded-size [`Table`] batches in source order. On open it walks the
//! cross product of candidate encodings and parse engines in a fixed
//! order; the first combination that produces a batch without a fatal
//! error is committed for the remainder of the stream. Malformed rows
//! (wrong field count, undecodable bytes) are skipped and counted, never
//! abort a committed stream. Streams are restartable from scratch but not
//! resumable mid-flight.

use std::{collections::VecDeque, io::Read};

use anyhow::Result;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use encoding_rs_io::DecodeReaderBytesBuilder;
use itertools::Itertools;
use log::{debug, info};

use crate::{
    config::HeaderMode,
    error::RefineryError,
    io_utils,
    source::SourceLocator,
    table::{Table, Value},
};

/// Candidate text encodings, tried in order: strict UTF-8 first, then a
/// byte-order-mark-aware variant that transcodes UTF-16, then a permissive
/// single-byte fallback that accepts any byte sequence.
const ENCODING_CANDIDATES: &[EncodingCandidate] = &[
    EncodingCandidate::Utf8,
    EncodingCandidate::BomSniff,
    EncodingCandidate::Windows1252,
];

/// Candidate parse engines: the strict engine anchors every record to the
/// header width and skips violators; the flexible engine pads or truncates
/// ragged records instead.
const ENGINE_CANDIDATES: &[ParseEngine] = &[ParseEngine::Strict, ParseEngine::Flexible];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodingCandidate {
    Utf8,
    BomSniff,
    Windows1252,
}

impl EncodingCandidate {
    fn label(self) -> &'static str {
        match self {
            EncodingCandidate::Utf8 => "utf-8",
            EncodingCandidate::BomSniff => "bom-sniff",
            EncodingCandidate::Windows1252 => "windows-1252",
        }
    }

    fn wrap(self, raw: Box<dyn Read>) -> Box<dyn Read> {
        match self {
            EncodingCandidate::BomSniff => Box::new(
                DecodeReaderBytesBuilder::new()
                    .bom_sniffing(true)
                    .strip_bom(true)
                    .utf8_passthru(true)
                    .build(raw),
            ),
            _ => raw,
        }
    }

    fn field_encoding(self) -> &'static Encoding {
        match self {
            EncodingCandidate::Windows1252 => WINDOWS_1252,
            _ => UTF_8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseEngine {
    Strict,
    Flexible,
}

impl ParseEngine {
    fn label(self) -> &'static str {
        match self {
            ParseEngine::Strict => "strict",
            ParseEngine::Flexible => "flexible",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub delimiter: Option<u8>,
    pub chunk_size: usize,
    pub header_mode: HeaderMode,
    /// Restrict reading to these columns, in request order.
    pub columns: Vec<String>,
    /// Stop after this many data rows (sampling mode).
    pub row_budget: Option<usize>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            delimiter: None,
            chunk_size: crate::config::DEFAULT_CHUNK_SIZE,
            header_mode: HeaderMode::Auto,
            columns: Vec::new(),
            row_budget: None,
        }
    }
}

pub struct ChunkedTableReader {
    reader: csv::Reader<Box<dyn Read>>,
    encoding: EncodingCandidate,
    headers: Vec<String>,
    /// Field count of the source rows, before projection.
    file_width: usize,
    projection: Option<Vec<usize>>,
    chunk_size: usize,
    row_budget: Option<usize>,
    rows_yielded: usize,
    skipped_rows: usize,
    /// Rows buffered while probing the first batch, not yet handed out.
    pending: VecDeque<Vec<String>>,
    done: bool,
}

impl ChunkedTableReader {
    /// Opens the source, committing the first encoding/engine combination
    /// that yields a batch. Exhausting every combination is fatal.
    pub fn open(source: &SourceLocator, options: &ReaderOptions) -> Result<Self> {
        source.reject_unsupported_format()?;
        if let SourceLocator::LocalPath(path) = source
            && !path.exists()
        {
            return Err(RefineryError::IngestionFailed {
                source_name: source.display_name(),
                attempts: "source does not exist".to_string(),
            }
            .into());
        }
        let delimiter = source.resolve_delimiter(options.delimiter);

        let mut attempts = Vec::new();
        for (&encoding, &engine) in ENCODING_CANDIDATES
            .iter()
            .cartesian_product(ENGINE_CANDIDATES)
        {
            match Self::try_open(source, delimiter, encoding, engine, options) {
                Ok(reader) => {
                    info!(
                        "Committed {}/{} for '{}' ({} column(s))",
                        encoding.label(),
                        engine.label(),
                        source.display_name(),
                        reader.headers.len()
                    );
                    return Ok(reader);
                }
                Err(err) => {
                    debug!(
                        "Candidate {}/{} failed for '{}': {err:#}",
                        encoding.label(),
                        engine.label(),
                        source.display_name()
                    );
                    attempts.push(format!("{}/{}", encoding.label(), engine.label()));
                }
            }
        }

        Err(RefineryError::IngestionFailed {
            source_name: source.display_name(),
            attempts: attempts.join(", "),
        }
        .into())
    }

    fn try_open(
        source: &SourceLocator,
        delimiter: u8,
        encoding: EncodingCandidate,
        engine: ParseEngine,
        options: &ReaderOptions,
    ) -> Result<Self> {
        let raw = source.open_raw()?;
        let mut reader = io_utils::open_csv_reader(
            encoding.wrap(raw),
            delimiter,
            engine == ParseEngine::Flexible,
        );

        // Probe one full batch. A decode failure anywhere in the probe
        // rejects the candidate (the encoding is wrong, not the row);
        // structural row errors are skipped like anywhere else.
        let mut record = csv::ByteRecord::new();
        let mut raw_rows: Vec<Vec<String>> = Vec::new();
        let mut skipped = 0usize;
        let probe_target = options.chunk_size.saturating_add(1);
        while raw_rows.len() < probe_target {
            match reader.read_byte_record(&mut record) {
                Ok(true) => {
                    let decoded = io_utils::decode_record(&record, encoding.field_encoding())?;
                    raw_rows.push(decoded);
                }
                Ok(false) => break,
                Err(err) if is_recoverable_csv_error(&err) => skipped += 1,
                Err(err) => return Err(err.into()),
            }
        }

        // A UTF-8 BOM is valid UTF-8, so the first candidate sees it glued
        // to the first field; strip it before header resolution.
        if let Some(first_cell) = raw_rows.first_mut().and_then(|row| row.first_mut())
            && let Some(stripped) = first_cell.strip_prefix('\u{feff}')
        {
            *first_cell = stripped.to_string();
        }

        let (headers, mut pending) = resolve_headers(raw_rows, options.header_mode);
        let headers = dedupe_headers(headers);
        let file_width = headers.len();
        for row in &mut pending {
            row.resize(file_width, String::new());
        }
        let projection = build_projection(&headers, &options.columns)?;

        Ok(Self {
            reader,
            encoding,
            headers: match &projection {
                Some(indices) => indices.iter().map(|&idx| headers[idx].clone()).collect(),
                None => headers,
            },
            file_width,
            projection,
            chunk_size: options.chunk_size,
            row_budget: options.row_budget,
            rows_yielded: 0,
            skipped_rows: skipped,
            pending: pending.into(),
            done: false,
        })
    }

    /// Column names after header resolution and projection.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Malformed rows dropped so far.
    pub fn skipped_rows(&self) -> usize {
        self.skipped_rows
    }

    /// Pulls the next batch, or `None` at end of stream / row budget.
    pub fn next_chunk(&mut self) -> Result<Option<Table>> {
        if self.done {
            return Ok(None);
        }

        let mut rows: Vec<Vec<String>> = Vec::with_capacity(self.chunk_size);
        while rows.len() < self.chunk_size && !self.budget_reached(rows.len()) {
            if let Some(pending) = self.pending.pop_front() {
                rows.push(pending);
                continue;
            }
            match self.read_row()? {
                Some(row) => rows.push(row),
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if self.budget_reached(rows.len()) {
            self.done = true;
        }

        if rows.is_empty() {
            return Ok(None);
        }
        self.rows_yielded += rows.len();
        Ok(Some(self.build_table(rows)))
    }

    fn budget_reached(&self, in_flight: usize) -> bool {
        self.row_budget
            .is_some_and(|budget| self.rows_yielded + in_flight >= budget)
    }

    fn read_row(&mut self) -> Result<Option<Vec<String>>> {
        let mut record = csv::ByteRecord::new();
        loop {
            match self.reader.read_byte_record(&mut record) {
                Ok(true) => {
                    match io_utils::decode_record(&record, self.encoding.field_encoding()) {
                        Ok(mut row) => {
                            row.resize(self.file_width, String::new());
                            return Ok(Some(row));
                        }
                        Err(_) => self.skipped_rows += 1,
                    }
                }
                Ok(false) => return Ok(None),
                Err(err) if is_recoverable_csv_error(&err) => self.skipped_rows += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn build_table(&self, rows: Vec<Vec<String>>) -> Table {
        let mut table = Table::with_names(&self.headers);
        for row in rows {
            let cells: Vec<Option<Value>> = match &self.projection {
                Some(indices) => indices
                    .iter()
                    .map(|&idx| Some(Value::Text(row.get(idx).cloned().unwrap_or_default())))
                    .collect(),
                None => row
                    .into_iter()
                    .map(|cell| Some(Value::Text(cell)))
                    .collect(),
            };
            table.push_row(cells);
        }
        table
    }
}

fn is_recoverable_csv_error(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::UnequalLengths { .. })
}

/// Splits the probed rows into a header row and data rows according to the
/// header mode; `Skip` synthesizes `field_N` names.
fn resolve_headers(
    mut raw_rows: Vec<Vec<String>>,
    mode: HeaderMode,
) -> (Vec<String>, Vec<Vec<String>>) {
    let has_header = match mode {
        HeaderMode::Force => true,
        HeaderMode::Skip => false,
        HeaderMode::Auto => {
            let config = crate::config::CleanConfig::default();
            crate::header::infer_has_header(&raw_rows, &config)
        }
    };

    if has_header && !raw_rows.is_empty() {
        let header = raw_rows.remove(0);
        let header = header.iter().map(|name| name.trim().to_string()).collect();
        (header, raw_rows)
    } else {
        let width = raw_rows.first().map_or(0, Vec::len);
        let names = (0..width).map(|idx| format!("field_{idx}")).collect();
        (names, raw_rows)
    }
}

/// Guarantees unique column names by suffixing repeats with `_2`, `_3`, ...
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    headers
        .into_iter()
        .map(|name| {
            let count = seen.entry(name.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                name
            } else {
                format!("{name}_{count}")
            }
        })
        .collect()
}

fn build_projection(headers: &[String], columns: &[String]) -> Result<Option<Vec<usize>>> {
    if columns.is_empty() {
        return Ok(None);
    }
    let indices = columns
        .iter()
        .map(|name| {
            headers
                .iter()
                .position(|header| header == name)
                .ok_or_else(|| anyhow::anyhow!("Requested column '{name}' not found in header"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(indices))
}
