//! Zip expansion. Every archive gets its own scratch directory so same-named
//! entries from different archives never collide.

use crate::paths::{entry_label, has_ext, is_excluded_entry, FileJob, RECORD_EXT};
use crate::util::{create_with_backoff, open_with_backoff};
use anyhow::{Context, Result};
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// An archive and the private directory it is expanded into.
#[derive(Clone, Debug)]
pub struct ArchiveTask {
    pub archive: PathBuf,
    pub scratch: PathBuf,
}

impl ArchiveTask {
    /// Scratch dirs are numbered by the archive's position in the plan.
    pub fn plan(archives: &[PathBuf], scratch_root: &Path) -> Vec<ArchiveTask> {
        archives
            .iter()
            .enumerate()
            .map(|(i, a)| ArchiveTask { archive: a.clone(), scratch: scratch_root.join(format!("archive_{:05}", i)) })
            .collect()
    }

    /// Extract and label this archive's record files. A bad archive is logged,
    /// its partial output removed, and it contributes nothing.
    pub fn expand(&self, root: &Path) -> Vec<FileJob> {
        match extract_records(&self.archive, &self.scratch) {
            Ok(entries) => {
                tracing::debug!(archive=%self.archive.display(), files=entries.len(), "Expanded archive");
                entries
                    .into_iter()
                    .map(|e| FileJob { label: entry_label(root, &self.archive, &e.entry), path: e.path })
                    .collect()
            }
            Err(e) => {
                tracing::warn!(archive=%self.archive.display(), error=%format!("{:#}", e), "Skipping unreadable archive");
                let _ = fs::remove_dir_all(&self.scratch);
                Vec::new()
            }
        }
    }
}

/// A record file materialised from an archive.
#[derive(Clone, Debug)]
pub struct ExtractedEntry {
    /// Sanitised path inside the archive.
    pub entry: PathBuf,
    /// Where it was written.
    pub path: PathBuf,
}

/// Write the archive's record entries under `dest`, skipping metadata
/// directories, sidecars, hidden files and entries that would escape `dest`.
pub fn extract_records(archive: &Path, dest: &Path) -> Result<Vec<ExtractedEntry>> {
    let file = open_with_backoff(archive, 8, 50).with_context(|| format!("open {}", archive.display()))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).with_context(|| format!("read zip {}", archive.display()))?;
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;

    let mut out = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).with_context(|| format!("zip entry #{} of {}", i, archive.display()))?;
        if entry.is_dir() {
            continue;
        }
        let Some(rel) = entry.enclosed_name() else {
            tracing::warn!(archive=%archive.display(), entry=%entry.name(), "Skipping entry with unsafe path");
            continue;
        };
        if is_excluded_entry(&rel) || !has_ext(&rel, RECORD_EXT) {
            continue;
        }
        let target = dest.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let f = create_with_backoff(&target, 8, 50).with_context(|| format!("create {}", target.display()))?;
        let mut w = BufWriter::new(f);
        io::copy(&mut entry, &mut w).with_context(|| format!("inflate {} from {}", rel.display(), archive.display()))?;
        w.flush()?;
        out.push(ExtractedEntry { entry: rel, path: target });
    }
    Ok(out)
}
