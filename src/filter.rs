//! Date filter: re-scan the input tree and copy every file whose summarized
//! start time precedes a cutoff. The persisted table acts as the index.

use crate::archive::extract_records;
use crate::config::MatchMode;
use crate::date::parse_timestamp;
use crate::paths::{discover, entry_label, relative_label};
use crate::util::{basename, copy_with_backoff, open_with_backoff};
use ahash::AHashMap;
use anyhow::{anyhow, Context, Result};
use std::ffi::OsStr;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

const FILE_COLUMNS: [&str; 2] = ["source_file", "file_name"];
const TIME_COLUMNS: [&str; 2] = ["start_time", "min_timestamp"];

/// Label -> start time, built from a summary table. `None` marks a row whose
/// timestamp is empty or unparseable.
#[derive(Clone, Debug)]
pub struct TableIndex {
    mode: MatchMode,
    map: AHashMap<String, Option<OffsetDateTime>>,
}

impl TableIndex {
    pub fn new(mode: MatchMode) -> Self {
        Self { mode, map: AHashMap::new() }
    }

    /// Load a summary table. Legacy `file_name` / `min_timestamp` headers are
    /// accepted. A key repeated across rows (one row per session) keeps its
    /// earliest valid timestamp.
    pub fn load(path: &Path, mode: MatchMode) -> Result<Self> {
        let f = open_with_backoff(path, 8, 50).with_context(|| format!("open table {}", path.display()))?;
        let mut rdr = csv::Reader::from_reader(BufReader::new(f));
        let headers = rdr.headers().with_context(|| format!("read header of {}", path.display()))?.clone();
        let find = |names: &[&str]| headers.iter().position(|h| names.contains(&h.trim()));
        let file_col = find(&FILE_COLUMNS)
            .ok_or_else(|| anyhow!("{} has no source_file column", path.display()))?;
        let time_col = find(&TIME_COLUMNS)
            .ok_or_else(|| anyhow!("{} has no start_time column", path.display()))?;

        let mut index = Self::new(mode);
        for rec in rdr.records() {
            let rec = rec.with_context(|| format!("parse {}", path.display()))?;
            let Some(label) = rec.get(file_col).filter(|s| !s.is_empty()) else { continue };
            index.insert(label, rec.get(time_col).and_then(parse_timestamp));
        }
        tracing::info!(table=%path.display(), entries=index.len(), "Loaded summary index");
        Ok(index)
    }

    /// The key is invalid only while none of its rows had a usable timestamp.
    pub fn insert(&mut self, label: &str, start: Option<OffsetDateTime>) {
        let key = self.key(label).to_string();
        let slot = self.map.entry(key).or_insert(None);
        *slot = match (*slot, start) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn key<'a>(&self, label: &'a str) -> &'a str {
        match self.mode {
            MatchMode::Basename => basename(label),
            MatchMode::RelativePath => label,
        }
    }

    /// `None`: not indexed. `Some(None)`: indexed with an invalid timestamp.
    pub fn lookup(&self, label: &str) -> Option<Option<OffsetDateTime>> {
        self.map.get(self.key(label)).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub examined: usize,
    pub copied: usize,
    pub newer: usize,
    pub invalid: usize,
    pub unmatched: usize,
    pub copy_errors: usize,
}

struct Selector<'a> {
    index: &'a TableIndex,
    cutoff: OffsetDateTime,
    out_dir: &'a Path,
    report: FilterReport,
}

impl Selector<'_> {
    fn consider(&mut self, label: &str, file: &Path) {
        self.report.examined += 1;
        let name = basename(label);
        match self.index.lookup(label) {
            None => self.report.unmatched += 1,
            Some(None) => {
                tracing::warn!(file=%name, "Invalid timestamp in table; skipping");
                self.report.invalid += 1;
            }
            Some(Some(ts)) if ts < self.cutoff => {
                let dest = self.out_dir.join(file.file_name().unwrap_or_else(|| OsStr::new(name)));
                match copy_with_backoff(file, &dest, 8, 50) {
                    Ok(()) => {
                        tracing::debug!(file=%name, "Older than cutoff; copied");
                        self.report.copied += 1;
                    }
                    Err(e) => {
                        tracing::error!(file=%name, error=%format!("{:#}", e), "Failed to copy filtered file");
                        self.report.copy_errors += 1;
                    }
                }
            }
            Some(Some(_)) => {
                tracing::debug!(file=%name, "Newer than cutoff; skipping");
                self.report.newer += 1;
            }
        }
    }
}

/// Copy files under `root` (inside archives or loose) whose indexed start time
/// is strictly before `cutoff` into `out_dir`. Each archive is expanded into
/// its own temporary directory, removed as soon as that archive is done.
pub fn filter_and_copy(
    index: &TableIndex,
    cutoff: OffsetDateTime,
    root: &Path,
    out_dir: &Path,
    scratch_parent: Option<&Path>,
) -> Result<FilterReport> {
    tracing::info!(cutoff=%crate::date::format_timestamp(cutoff), "Starting filter and copy");
    fs::create_dir_all(out_dir).with_context(|| format!("create output {}", out_dir.display()))?;

    let exclude: Vec<PathBuf> = vec![out_dir.to_path_buf()];
    let found = discover(root, &exclude)?;
    let mut sel = Selector { index, cutoff, out_dir, report: FilterReport::default() };

    for archive in &found.archives {
        tracing::info!(archive=%archive.display(), "Processing archive");
        let scratch = match scratch_parent {
            Some(p) => {
                fs::create_dir_all(p).with_context(|| format!("create {}", p.display()))?;
                tempfile::Builder::new().prefix("fitetl_filter_").tempdir_in(p)
            }
            None => tempfile::Builder::new().prefix("fitetl_filter_").tempdir(),
        }
        .context("create temporary extraction dir")?;

        match extract_records(archive, scratch.path()) {
            Ok(entries) => {
                for e in entries {
                    let label = entry_label(root, archive, &e.entry);
                    sel.consider(&label, &e.path);
                }
            }
            Err(e) => {
                tracing::warn!(archive=%archive.display(), error=%format!("{:#}", e), "Skipping unreadable archive");
            }
        }
        // `scratch` drops here whatever happened above
    }

    for record in &found.records {
        sel.consider(&relative_label(root, record), record);
    }

    let r = sel.report;
    tracing::info!(
        examined=r.examined,
        copied=r.copied,
        newer=r.newer,
        invalid=r.invalid,
        unmatched=r.unmatched,
        copy_errors=r.copy_errors,
        "Filter and copy complete"
    );
    Ok(r)
}
