pub mod clean;
pub mod cli;
pub mod coerce;
pub mod config;
pub mod error;
pub mod header;
pub mod impute;
pub mod io_utils;
pub mod outliers;
pub mod profile;
pub mod reader;
pub mod render;
pub mod report;
pub mod source;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{Cli, Commands, ProbeArgs},
    config::{CleanConfig, DeclaredColumn, ReaderHints},
    reader::{ChunkedTableReader, ReaderOptions},
    source::SourceLocator,
    table::{ColumnKind, Table},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_refinery", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Clean(args) => clean::execute(&args),
        Commands::Profile(args) => profile::execute(&args),
        Commands::Probe(args) => handle_probe(&args),
    }
}

fn handle_probe(args: &ProbeArgs) -> Result<()> {
    let source = SourceLocator::parse(&args.input);
    info!(
        "Probing '{}' with delimiter '{}'",
        source.display_name(),
        printable_delimiter(source.resolve_delimiter(args.delimiter))
    );
    let config = CleanConfig {
        delimiter: args.delimiter,
        ..CleanConfig::default()
    };
    let options = ReaderOptions {
        delimiter: args.delimiter,
        chunk_size: config.chunk_size,
        row_budget: (args.sample_rows > 0).then_some(args.sample_rows),
        ..ReaderOptions::default()
    };

    let mut reader = ChunkedTableReader::open(&source, &options)?;
    let mut sample = Table::with_names(reader.headers());
    while let Some(chunk) = reader.next_chunk()? {
        sample.append(chunk);
    }
    let (coerced, _) = coerce::coerce_table(sample, &config, None);

    let hints = ReaderHints {
        declared: coerced
            .columns
            .iter()
            .map(|column| DeclaredColumn {
                name: column.name.clone(),
                kind: column.kind,
            })
            .collect(),
        datetime_columns: coerced
            .columns
            .iter()
            .filter(|column| column.kind == ColumnKind::Datetime)
            .map(|column| column.name.clone())
            .collect(),
        ..ReaderHints::default()
    };

    if let Some(path) = &args.hints {
        hints
            .save(path)
            .with_context(|| format!("Writing hints to {path:?}"))?;
        info!(
            "Inferred kinds for {} column(s) written to {path:?}",
            coerced.n_columns()
        );
        return Ok(());
    }

    let headers = vec![
        "column".to_string(),
        "kind".to_string(),
        "nulls".to_string(),
        "rows".to_string(),
    ];
    let rows: Vec<Vec<String>> = coerced
        .columns
        .iter()
        .map(|column| {
            vec![
                column.name.clone(),
                column.kind.to_string(),
                column.null_count().to_string(),
                column.len().to_string(),
            ]
        })
        .collect();
    render::print_table(&headers, &rows);
    info!("Inferred kinds for {} column(s)", coerced.n_columns());
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
