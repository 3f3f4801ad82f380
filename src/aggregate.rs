//! Aggregation of per-file outcomes into the summary table, and its CSV form.

use crate::extract::ExtractionOutcome;
use crate::paths::FileJob;
use crate::summary::ActivitySummary;
use crate::util::{create_with_backoff, move_file_backoff, open_with_backoff};
use anyhow::{Context, Result};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Rows in completion order plus the run counters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregatedTable {
    pub rows: Vec<ActivitySummary>,
    pub total: usize,
    pub successful: usize,
    pub empty: usize,
    pub errored: usize,
    pub skipped: usize,
    pub interrupted: bool,
}

impl AggregatedTable {
    pub fn with_total(total: usize) -> Self {
        Self { total, ..Default::default() }
    }

    /// Fold one outcome in. Only successes contribute rows.
    pub fn ingest(&mut self, job: &FileJob, outcome: ExtractionOutcome) {
        match outcome {
            ExtractionOutcome::Success(rows) => {
                self.successful += 1;
                self.rows.extend(rows);
            }
            ExtractionOutcome::Empty => {
                tracing::debug!(file=%job.label, "No activity data");
                self.empty += 1;
            }
            ExtractionOutcome::Error(_) => self.errored += 1,
        }
    }

    /// Write the CSV (header + rows). With no rows nothing is written, a
    /// warning is logged and `Ok(false)` returned.
    pub fn write_csv(&self, path: &Path) -> Result<bool> {
        if self.rows.is_empty() {
            tracing::warn!("No activity data found in any files; table not written");
            return Ok(false);
        }
        write_rows(&self.rows, path)?;
        tracing::info!(path=%path.display(), rows=self.rows.len(), "Summary table written");
        Ok(true)
    }

    pub fn log_summary(&self, quarantine_dir: &Path) {
        let qdir = fs::canonicalize(quarantine_dir).unwrap_or_else(|_| quarantine_dir.to_path_buf());
        tracing::info!("Processing complete.");
        tracing::info!("Total files: {}", self.total);
        tracing::info!("Successful files: {}", self.successful);
        tracing::info!("Files without activity data: {}", self.empty);
        tracing::info!("Files with errors: {}", self.errored);
        if self.interrupted {
            tracing::warn!("Run was interrupted; {} files were not processed", self.skipped);
        }
        if self.errored > 0 {
            tracing::info!("Error files are copied to '{}'", qdir.display());
        }
    }
}

/// Serialize rows with the fixed header. Written to a staging file first,
/// then moved over `path`.
pub fn write_rows(rows: &[ActivitySummary], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut staging = path.as_os_str().to_owned();
    staging.push(".inprogress");
    let staging = std::path::PathBuf::from(staging);

    {
        let f = create_with_backoff(&staging, 16, 50).with_context(|| format!("create {}", staging.display()))?;
        let mut wtr = csv::Writer::from_writer(BufWriter::new(f));
        for row in rows {
            wtr.serialize(row).with_context(|| format!("write row for {}", row.source_file))?;
        }
        wtr.flush()?;
        let mut inner = wtr.into_inner().map_err(|e| anyhow::anyhow!("flush {}: {}", staging.display(), e))?;
        inner.flush()?;
    }
    move_file_backoff(&staging, path)
}

/// Read a table written by `write_rows` back into typed rows.
pub fn read_rows(path: &Path) -> Result<Vec<ActivitySummary>> {
    let f = open_with_backoff(path, 8, 50).with_context(|| format!("open {}", path.display()))?;
    let mut rdr = csv::Reader::from_reader(BufReader::new(f));
    let mut rows = Vec::new();
    for rec in rdr.deserialize() {
        rows.push(rec.with_context(|| format!("parse {}", path.display()))?);
    }
    Ok(rows)
}
