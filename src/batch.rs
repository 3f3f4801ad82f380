//! Deal the plain files of a directory into `batch_<n>` sub-directories.

use crate::config::BatchOrder;
use crate::util::move_file_backoff;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Created batch directories, in batch-number order.
    pub batches: Vec<PathBuf>,
    pub moved: usize,
    pub failed: usize,
}

pub fn batch_dir_name(n: usize) -> String {
    format!("batch_{}", n)
}

/// Move the regular files directly inside `source` into `ceil(count / batch_size)`
/// numbered directories of at most `batch_size` files each.
/// A move failure is logged and counted; the remaining files are still moved.
pub fn batch_files(source: &Path, batch_size: usize, order: BatchOrder) -> Result<BatchReport> {
    if batch_size == 0 {
        bail!("batch size must be at least 1");
    }
    tracing::info!(dir=%source.display(), batch_size, "Starting batch files process");

    let mut names = Vec::new();
    for ent in fs::read_dir(source).with_context(|| format!("read {}", source.display()))? {
        let ent = ent.with_context(|| format!("read entry of {}", source.display()))?;
        if ent.path().is_file() {
            names.push(ent.file_name());
        }
    }
    if order == BatchOrder::Sorted {
        names.sort();
    }

    let mut report = BatchReport::default();
    for (i, chunk) in names.chunks(batch_size).enumerate() {
        let dir = source.join(batch_dir_name(i + 1));
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        for name in chunk {
            let from = source.join(name);
            match move_file_backoff(&from, &dir.join(name)) {
                Ok(()) => report.moved += 1,
                Err(e) => {
                    tracing::error!(file=%from.display(), error=%format!("{:#}", e), "Failed to move file into batch");
                    report.failed += 1;
                }
            }
        }
        tracing::info!("Created batch {} with {} files", i + 1, chunk.len());
        report.batches.push(dir);
    }

    tracing::info!(batches=report.batches.len(), moved=report.moved, "Batching process complete");
    Ok(report)
}
