//! Input discovery: walk a root for archives and loose record files, applying
//! the metadata/hidden-file exclusion rules, and build the row labels.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub const ARCHIVE_EXT: &str = "zip";
pub const RECORD_EXT: &str = "fit";

/// macOS resource-fork directories (`__MACOSX/`) inside exports.
const METADATA_DIR_PREFIX: &str = "__MACOSX";

/// A decodable file plus the label it is reported under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileJob {
    pub path: PathBuf,
    pub label: String,
}

#[derive(Clone, Debug, Default)]
pub struct Discovered {
    pub archives: Vec<PathBuf>,
    pub records: Vec<PathBuf>,
}

pub fn has_ext(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

pub fn is_metadata_dir(name: &str) -> bool {
    name.starts_with(METADATA_DIR_PREFIX)
}

/// Hidden files, AppleDouble `._` sidecars included.
pub fn is_hidden_file(name: &str) -> bool {
    name.starts_with('.')
}

/// True if an archive entry name must not be materialised.
pub fn is_excluded_entry(entry: &Path) -> bool {
    let in_metadata_dir = entry.components().any(|c| match c {
        Component::Normal(s) => s.to_str().map(is_metadata_dir).unwrap_or(false),
        _ => false,
    });
    let hidden = entry
        .file_name()
        .and_then(|n| n.to_str())
        .map(is_hidden_file)
        .unwrap_or(true);
    in_metadata_dir || hidden
}

/// `/`-joined relative path, falling back to the full path outside `root`.
pub fn relative_label(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Label of a file extracted from `archive`: `<archive rel>!/<entry path>`.
pub fn entry_label(root: &Path, archive: &Path, entry: &Path) -> String {
    format!("{}!/{}", relative_label(root, archive), relative_label(Path::new(""), entry))
}

/// Recursively discover archives and loose record files under `root`.
/// `exclude` lists directories to prune (e.g. a quarantine dir inside the root).
/// An unreadable root is fatal; unreadable sub-entries are logged and skipped.
pub fn discover(root: &Path, exclude: &[PathBuf]) -> Result<Discovered> {
    let meta = fs::metadata(root).with_context(|| format!("read input root {}", root.display()))?;
    if !meta.is_dir() {
        bail!("input root {} is not a directory", root.display());
    }
    let excluded: Vec<PathBuf> = exclude.iter().filter_map(|p| fs::canonicalize(p).ok()).collect();

    let mut found = Discovered::default();
    let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
        if e.depth() == 0 || !e.file_type().is_dir() {
            return true;
        }
        let name = e.file_name().to_string_lossy();
        if is_metadata_dir(&name) {
            return false;
        }
        if excluded.is_empty() {
            return true;
        }
        match fs::canonicalize(e.path()) {
            Ok(p) => !excluded.contains(&p),
            Err(_) => true,
        }
    });

    for entry in walker {
        let ent = match entry {
            Ok(ent) => ent,
            Err(e) if e.depth() == 0 => {
                return Err(e).with_context(|| format!("walk input root {}", root.display()));
            }
            Err(e) => {
                tracing::warn!(error=%e, "Skipping unreadable entry during discovery");
                continue;
            }
        };
        if !ent.file_type().is_file() {
            continue;
        }
        let name = ent.file_name().to_string_lossy();
        if is_hidden_file(&name) {
            continue;
        }
        let path = ent.path();
        if has_ext(path, ARCHIVE_EXT) {
            found.archives.push(path.to_path_buf());
        } else if has_ext(path, RECORD_EXT) {
            found.records.push(path.to_path_buf());
        }
    }

    found.archives.sort();
    found.records.sort();
    tracing::info!(
        root=%root.display(),
        archives=found.archives.len(),
        records=found.records.len(),
        "Discovery complete"
    );
    Ok(found)
}

/// Loose record files as jobs labelled relative to `root`.
pub fn loose_jobs(root: &Path, records: &[PathBuf]) -> Vec<FileJob> {
    records
        .iter()
        .map(|p| FileJob { path: p.clone(), label: relative_label(root, p) })
        .collect()
}
