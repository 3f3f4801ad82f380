use crate::aggregate::AggregatedTable;
use crate::archive::ArchiveTask;
use crate::batch::{batch_files, BatchReport};
use crate::concurrency::{build_pool, run_pool};
use crate::config::{BatchOrder, ETLOptions, IsolationMode, MatchMode};
use crate::decode::Decoder;
use crate::extract::TaskContext;
use crate::filter::{filter_and_copy, FilterReport, TableIndex};
use crate::fit::FitDecoder;
use crate::paths::{discover, loose_jobs, FileJob};
use crate::progress::ProgressScope;
use crate::quarantine::Quarantine;
use crate::util::init_tracing_once;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use time::OffsetDateTime;

#[derive(Clone)]
pub struct FitETL {
    pub(crate) opts: ETLOptions,
    decoder: Arc<dyn Decoder>,
    custom_decoder: bool,
}

/// Outcome of `run_all`. Filter/batch are `None` when no table was produced.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub table: AggregatedTable,
    pub filter: Option<FilterReport>,
    pub batch: Option<BatchReport>,
}

impl Default for FitETL {
    fn default() -> Self {
        Self::new()
    }
}

impl FitETL {
    pub fn new() -> Self {
        Self { opts: ETLOptions::default(), decoder: Arc::new(FitDecoder), custom_decoder: false }
    }

    pub fn with_options(opts: ETLOptions) -> Self {
        Self { opts, decoder: Arc::new(FitDecoder), custom_decoder: false }
    }

    // -------- Builder methods --------
    pub fn root_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_root_dir(dir); self }
    pub fn quarantine_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_quarantine_dir(dir); self }
    pub fn work_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_work_dir(dir); self }
    pub fn parallelism(mut self, threads: usize) -> Self { self.opts = self.opts.with_parallelism(threads); self }
    pub fn isolation(mut self, mode: IsolationMode) -> Self { self.opts = self.opts.with_isolation(mode); self }
    pub fn decode_timeout(mut self, timeout: Duration) -> Self { self.opts = self.opts.with_decode_timeout(timeout); self }
    pub fn match_mode(mut self, mode: MatchMode) -> Self { self.opts = self.opts.with_match_mode(mode); self }
    pub fn batch_size(mut self, size: usize) -> Self { self.opts = self.opts.with_batch_size(size); self }
    pub fn batch_order(mut self, order: BatchOrder) -> Self { self.opts = self.opts.with_batch_order(order); self }
    pub fn progress(mut self, yes: bool) -> Self { self.opts = self.opts.with_progress(yes); self }
    pub fn progress_label(mut self, label: impl Into<String>) -> Self { self.opts = self.opts.with_progress_label(label); self }
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self { self.opts = self.opts.with_cancel_flag(flag); self }

    /// Replace the in-process decoder. Only `IsolationMode::Thread` calls it:
    /// under `IsolationMode::Process` each file is decoded by the worker
    /// command, whatever decoder that program was built with.
    pub fn decoder(mut self, decoder: impl Decoder + 'static) -> Self {
        self.decoder = Arc::new(decoder);
        self.custom_decoder = true;
        self
    }

    pub fn options(&self) -> &ETLOptions {
        &self.opts
    }

    /// Shared flag; raising it interrupts a running `summarize`.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.opts.cancel)
    }

    fn scratch_dir(&self, prefix: &str) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        match &self.opts.work_dir {
            Some(dir) => {
                fs::create_dir_all(dir).with_context(|| format!("create work dir {}", dir.display()))?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
        .context("create scratch dir")
    }

    /// Expand archives in parallel, each into a private scratch subdirectory.
    fn expand_archives(&self, pool: &rayon::ThreadPool, archives: &[PathBuf], scratch: &Path) -> Vec<FileJob> {
        let tasks = ArchiveTask::plan(archives, scratch);
        tracing::info!("Processing {} ZIP files...", tasks.len());
        let pb = ProgressScope::maybe(self.opts.progress && !tasks.is_empty(), "Expanding archives", tasks.len() as u64);
        let root = &self.opts.root_dir;
        let cancel = &self.opts.cancel;
        let expanded: Vec<Vec<FileJob>> = pool.install(|| {
            tasks
                .par_iter()
                .map(|t| {
                    let jobs = if cancel.load(Ordering::SeqCst) { Vec::new() } else { t.expand(root) };
                    if let Some(pb) = &pb { pb.inc_items(1); }
                    jobs
                })
                .collect()
        });
        if let Some(pb) = pb { pb.finish("archives expanded"); }
        expanded.into_iter().flatten().collect()
    }

    /// Summarize every record file under the root into `table_out`.
    ///
    /// Clears the quarantine first, expands archives, decodes all files on a
    /// bounded pool and writes the CSV. Zero successes is not an error: the
    /// table is simply not written. Only an unreadable root or an unwritable
    /// table fail the run.
    pub fn summarize(&self, table_out: &Path) -> Result<AggregatedTable> {
        init_tracing_once(None);
        tracing::info!(root=%self.opts.root_dir.display(), "Starting summarize");

        if self.custom_decoder {
            if let IsolationMode::Process(cmd) = &self.opts.isolation {
                tracing::warn!(
                    worker=%cmd.program.display(),
                    "Custom decoder is ignored under process isolation; the worker command decodes each file"
                );
            }
        }

        let quarantine = Quarantine::new(&self.opts.quarantine_dir);
        quarantine.clear()?;

        let pool = build_pool(self.opts.effective_parallelism())?;
        let mut exclude = vec![self.opts.quarantine_dir.clone()];
        if let Some(w) = &self.opts.work_dir {
            exclude.push(w.clone());
        }
        let found = discover(&self.opts.root_dir, &exclude)?;

        let scratch = self.scratch_dir("fitetl_")?;
        let mut jobs = self.expand_archives(&pool, &found.archives, scratch.path());
        jobs.extend(loose_jobs(&self.opts.root_dir, &found.records));

        let mut table = AggregatedTable::with_total(jobs.len());
        tracing::info!("Total .fit files to process: {}", jobs.len());
        if jobs.is_empty() {
            tracing::warn!("No .fit files found under {}", self.opts.root_dir.display());
            table.interrupted = self.opts.cancel.load(Ordering::SeqCst);
            return Ok(table);
        }

        let ctx = Arc::new(TaskContext {
            decoder: Arc::clone(&self.decoder),
            isolation: self.opts.isolation.clone(),
            decode_timeout: self.opts.decode_timeout,
            quarantine: quarantine.clone(),
        });
        let label = self.opts.progress_label.clone().unwrap_or_else(|| "Decoding".to_string());
        let pb = ProgressScope::maybe(self.opts.progress, label, jobs.len() as u64);
        let total = jobs.len();
        let mut processed = 0usize;

        let report = run_pool(&pool, jobs, ctx, Arc::clone(&self.opts.cancel), |job, outcome| {
            processed += 1;
            tracing::debug!("Processed file {}/{}: '{}'", processed, total, job.label);
            table.ingest(&job, outcome);
            if let Some(pb) = &pb { pb.inc_items(1); }
        });
        if let Some(pb) = pb { pb.finish("decoding done"); }

        table.skipped = report.skipped;
        table.interrupted = report.interrupted;
        if report.interrupted {
            tracing::warn!("Processing interrupted by user; writing partial table");
        }

        table.write_csv(table_out)?;
        table.log_summary(quarantine.dir());

        drop(scratch);
        tracing::info!("Cleaned up temporary files.");
        Ok(table)
    }

    /// Copy files older than `cutoff` (per the table at `table`) into `out_dir`.
    pub fn filter_and_copy(&self, table: &Path, cutoff: OffsetDateTime, out_dir: &Path) -> Result<FilterReport> {
        init_tracing_once(None);
        let index = TableIndex::load(table, self.opts.match_mode)?;
        filter_and_copy(&index, cutoff, &self.opts.root_dir, out_dir, self.opts.work_dir.as_deref())
    }

    /// Move the files of `dir` into `batch_<n>` sub-directories.
    pub fn batch(&self, dir: &Path) -> Result<BatchReport> {
        init_tracing_once(None);
        batch_files(dir, self.opts.batch_size, self.opts.batch_order)
    }

    /// Summarize, filter by `cutoff` into `out_dir`, then batch `out_dir`.
    pub fn run_all(&self, table_out: &Path, cutoff: OffsetDateTime, out_dir: &Path) -> Result<RunReport> {
        let table = self.summarize(table_out)?;
        if table.rows.is_empty() {
            tracing::warn!("No summary table produced; skipping filter and batch stages");
            return Ok(RunReport { table, filter: None, batch: None });
        }
        if table.interrupted {
            tracing::warn!("Summarize was interrupted; skipping filter and batch stages");
            return Ok(RunReport { table, filter: None, batch: None });
        }
        let filter = self.filter_and_copy(table_out, cutoff, out_dir)?;
        let batch = self.batch(out_dir)?;
        tracing::info!("All processes completed successfully.");
        Ok(RunReport { table, filter: Some(filter), batch: Some(batch) })
    }
}
