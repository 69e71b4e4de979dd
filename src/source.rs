//! Source locators: where a delimited-text stream comes from.
//!
//! A [`SourceLocator`] is a sum type over the supported origins rather than
//! a duck-typed "whatever the caller passed" parameter. Local paths open as
//! buffered files; http/https URIs open as streaming response bodies. Both
//! can be reopened from scratch, which is what the chunked reader's
//! encoding/engine fallback relies on — streams are restartable, never
//! resumable mid-flight.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::error::RefineryError;

/// Extensions of binary columnar or spreadsheet formats this engine refuses
/// to parse as delimited text.
const UNSUPPORTED_EXTENSIONS: &[&str] = &[
    "parquet", "orc", "feather", "arrow", "xls", "xlsx", "db", "sqlite",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    LocalPath(PathBuf),
    RemoteUri(String),
}

impl SourceLocator {
    pub fn parse(spec: &str) -> Self {
        if spec.starts_with("http://") || spec.starts_with("https://") {
            SourceLocator::RemoteUri(spec.to_string())
        } else {
            SourceLocator::LocalPath(PathBuf::from(spec))
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            SourceLocator::LocalPath(path) => path.display().to_string(),
            SourceLocator::RemoteUri(uri) => uri.clone(),
        }
    }

    fn extension(&self) -> Option<String> {
        let name = match self {
            SourceLocator::LocalPath(path) => path.to_str()?.to_string(),
            SourceLocator::RemoteUri(uri) => {
                uri.split(['?', '#']).next().unwrap_or(uri).to_string()
            }
        };
        Path::new(&name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    /// Fails fast on formats known to be binary rather than attempting to
    /// parse them as text.
    pub fn reject_unsupported_format(&self) -> Result<(), RefineryError> {
        if let Some(ext) = self.extension()
            && UNSUPPORTED_EXTENSIONS.contains(&ext.as_str())
        {
            return Err(RefineryError::UnsupportedFormat {
                path: PathBuf::from(self.display_name()),
                format: ext,
            });
        }
        Ok(())
    }

    /// Resolves the field delimiter from the extension unless overridden.
    pub fn resolve_delimiter(&self, provided: Option<u8>) -> u8 {
        match self {
            SourceLocator::LocalPath(path) => {
                crate::io_utils::resolve_input_delimiter(path, provided)
            }
            SourceLocator::RemoteUri(_) => match (provided, self.extension()) {
                (Some(delim), _) => delim,
                (None, Some(ext)) if ext == "tsv" => crate::io_utils::DEFAULT_TSV_DELIMITER,
                _ => crate::io_utils::DEFAULT_CSV_DELIMITER,
            },
        }
    }

    /// Opens a fresh byte stream over the source.
    pub fn open_raw(&self) -> Result<Box<dyn Read>> {
        match self {
            SourceLocator::LocalPath(path) => {
                if !path.exists() {
                    return Err(RefineryError::SourceNotFound(path.clone()).into());
                }
                let file = File::open(path)
                    .with_context(|| format!("Opening input file {path:?}"))?;
                Ok(Box::new(BufReader::new(file)))
            }
            SourceLocator::RemoteUri(uri) => {
                let response = reqwest::blocking::get(uri)
                    .with_context(|| format!("Fetching {uri}"))?
                    .error_for_status()
                    .with_context(|| format!("Fetching {uri}"))?;
                Ok(Box::new(response))
            }
        }
    }
}
