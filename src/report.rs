//! The machine-readable cleaning report.
//!
//! Every recovered or degraded condition in a run (skipped rows, estimator
//! fallbacks, working-set overflow) lands here as a counter, decision, or
//! warning — never as an error the caller has to handle as control flow.

use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::impute::ImputationDecision;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleaningReport {
    pub rows_before: usize,
    pub rows_after: usize,
    pub columns_before: usize,
    pub columns_after: usize,
    pub metadata_rows_dropped: usize,
    pub malformed_rows_skipped: usize,
    pub booleans_standardized: usize,
    pub numerics_coerced: usize,
    pub datetimes_parsed: usize,
    pub outliers_capped: usize,
    pub nulls_imputed: usize,
    pub empty_columns_dropped: usize,
    pub duplicate_columns_dropped: usize,
    pub duplicate_rows_dropped: usize,
    pub working_set_overflow: bool,
    /// Final kind per column, in output order.
    pub column_kinds: BTreeMap<String, String>,
    pub imputations: Vec<ImputationDecision>,
    pub warnings: Vec<String>,
    pub schema_fingerprint: String,
}

impl CleaningReport {
    /// Total mutations applied. Zero means a second pass found nothing to
    /// do — the idempotence signal.
    pub fn issues_detected(&self) -> usize {
        self.metadata_rows_dropped
            + self.booleans_standardized
            + self.numerics_coerced
            + self.datetimes_parsed
            + self.outliers_capped
            + self.nulls_imputed
            + self.empty_columns_dropped
            + self.duplicate_columns_dropped
            + self.duplicate_rows_dropped
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating report file {path:?}"))?;
        serde_json::to_writer_pretty(file, self).context("Writing report JSON")
    }
}

/// The subset of the report integration consumers read back; kept loose so
/// report layout can grow without breaking them.
#[derive(Debug, Deserialize)]
pub struct ReportDigest {
    pub rows_after: usize,
    pub schema_fingerprint: String,
}

impl ReportDigest {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening report file {path:?}"))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).context("Parsing report JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_total_sums_every_mutation_class() {
        let report = CleaningReport {
            metadata_rows_dropped: 1,
            booleans_standardized: 2,
            numerics_coerced: 3,
            datetimes_parsed: 4,
            outliers_capped: 5,
            nulls_imputed: 6,
            empty_columns_dropped: 7,
            duplicate_columns_dropped: 8,
            duplicate_rows_dropped: 9,
            ..CleaningReport::default()
        };
        assert_eq!(report.issues_detected(), 45);
    }

    #[test]
    fn report_round_trips_through_json() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("report.json");
        let report = CleaningReport {
            rows_after: 42,
            schema_fingerprint: "abc123".to_string(),
            ..CleaningReport::default()
        };
        report.save(&path).expect("save report");
        let digest = ReportDigest::load(&path).expect("load report");
        assert_eq!(digest.rows_after, 42);
        assert_eq!(digest.schema_fingerprint, "abc123");
    }
}
