use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::HeaderMode;

#[derive(Debug, Parser)]
#[command(author, version, about = "Clean and profile delimited tabular files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the full cleaning pipeline and emit a cleaned file plus a report
    Clean(CleanArgs),
    /// Stream summary statistics for numeric columns without cleaning
    Profile(ProfileArgs),
    /// Infer column kinds from a sample and optionally write a hints file
    Probe(ProbeArgs),
}

#[derive(Debug, Args)]
pub struct CleanArgs {
    /// Input file path or http(s) URI
    #[arg(short = 'i', long = "input")]
    pub input: String,
    /// Output CSV file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Destination for the JSON cleaning report
    #[arg(long = "report")]
    pub report: Option<PathBuf>,
    /// YAML hints file with declared kinds, datetime columns, delimiter
    #[arg(long = "hints")]
    pub hints: Option<PathBuf>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Header handling: detect, force first row, or synthesize names
    #[arg(long = "force-header", value_enum, default_value = "auto")]
    pub force_header: HeaderMode,
    /// Skip type coercion entirely
    #[arg(long = "no-coerce")]
    pub no_coerce: bool,
    /// Skip datetime inference during coercion
    #[arg(long = "no-datetime-infer")]
    pub no_datetime_infer: bool,
    /// Skip interquartile-range winsorization
    #[arg(long = "no-cap-outliers")]
    pub no_cap_outliers: bool,
    /// Skip imputation of missing values
    #[arg(long = "no-impute")]
    pub no_impute: bool,
    /// Keep columns that are entirely null after coercion
    #[arg(long = "keep-empty-columns")]
    pub keep_empty_columns: bool,
    /// Keep columns whose contents duplicate an earlier column
    #[arg(long = "keep-duplicate-columns")]
    pub keep_duplicate_columns: bool,
    /// Keep exact duplicate rows
    #[arg(long = "keep-duplicate-rows")]
    pub keep_duplicate_rows: bool,
    /// Rows per streaming batch
    #[arg(long = "chunk-size", default_value_t = crate::config::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Row cap for stages that need a bounded full-table view
    #[arg(long = "working-set-cap", default_value_t = crate::config::DEFAULT_WORKING_SET_CAP)]
    pub working_set_cap: usize,
}

#[derive(Debug, Args)]
pub struct ProfileArgs {
    /// Input file path or http(s) URI
    #[arg(short = 'i', long = "input")]
    pub input: String,
    /// Restrict profiling to this comma-separated list of columns
    #[arg(short = 'C', long = "columns", value_delimiter = ',')]
    pub columns: Vec<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Header handling: detect, force first row, or synthesize names
    #[arg(long = "force-header", value_enum, default_value = "auto")]
    pub force_header: HeaderMode,
    /// Rows per streaming batch
    #[arg(long = "chunk-size", default_value_t = crate::config::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Stop after this many rows (0 means the whole stream)
    #[arg(long, default_value_t = 0)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Input file path or http(s) URI
    #[arg(short = 'i', long = "input")]
    pub input: String,
    /// Destination hints YAML file (printed only when omitted)
    #[arg(short = 'o', long = "hints")]
    pub hints: Option<PathBuf>,
    /// Number of rows to sample when inferring kinds (0 means full scan)
    #[arg(long, default_value_t = 2000)]
    pub sample_rows: usize,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_parser_accepts_names_and_literals() {
        assert_eq!(parse_delimiter("tab").unwrap(), b'\t');
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert_eq!(parse_delimiter("|").unwrap(), b'|');
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("").is_err());
    }
}
