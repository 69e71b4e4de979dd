use std::path::PathBuf;

use thiserror::Error;

/// Fatal ingestion errors. Recovered conditions (skipped rows, estimator
/// fallbacks, working-set overflow) are reported through the
/// [`CleaningReport`](crate::report::CleaningReport) instead.
#[derive(Debug, Error)]
pub enum RefineryError {
    #[error("source {0:?} does not exist or is not readable")]
    SourceNotFound(PathBuf),

    #[error("source {path:?} is a {format} file, which this engine does not parse as delimited text")]
    UnsupportedFormat { path: PathBuf, format: String },

    #[error("failed to open '{source_name}': every encoding/engine combination failed ({attempts})")]
    IngestionFailed {
        source_name: String,
        attempts: String,
    },
}
