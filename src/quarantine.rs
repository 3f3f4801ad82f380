//! Quarantine directory for inputs that failed to decode.

use crate::util::{copy_with_backoff, remove_with_backoff};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Clones share one admission lock, so two workers failing on files with the
/// same basename never write the same destination at once.
#[derive(Clone, Debug)]
pub struct Quarantine {
    dir: PathBuf,
    admit_lock: Arc<Mutex<()>>,
}

impl Quarantine {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf(), admit_lock: Arc::new(Mutex::new(())) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Empty the directory left by a previous run. A missing directory is fine;
    /// entries that cannot be removed are logged.
    pub fn clear(&self) -> Result<()> {
        let rd = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("read quarantine {}", self.dir.display())),
        };
        let mut removed = 0usize;
        for ent in rd.flatten() {
            let p = ent.path();
            let res = match ent.file_type() {
                Ok(t) if t.is_dir() => fs::remove_dir_all(&p).with_context(|| format!("remove {}", p.display())),
                _ => remove_with_backoff(&p, 8, 50),
            };
            match res {
                Ok(()) => removed += 1,
                Err(e) => tracing::error!(path=%p.display(), error=%format!("{:#}", e), "Failed to clear quarantine entry"),
            }
        }
        tracing::debug!(dir=%self.dir.display(), removed, "Cleared quarantine");
        Ok(())
    }

    /// Copy a failed input in, keyed by basename (same names overwrite).
    /// Never fails: copy problems are logged and `false` is returned.
    pub fn admit(&self, src: &Path) -> bool {
        let Some(name) = src.file_name() else {
            tracing::error!(path=%src.display(), "Cannot quarantine a path without a file name");
            return false;
        };
        let _guard = self.admit_lock.lock();
        let res = fs::create_dir_all(&self.dir)
            .with_context(|| format!("create quarantine {}", self.dir.display()))
            .and_then(|_| copy_with_backoff(src, &self.dir.join(name), 8, 50));
        match res {
            Ok(()) => {
                tracing::debug!(path=%src.display(), dir=%self.dir.display(), "Quarantined");
                true
            }
            Err(e) => {
                tracing::error!(path=%src.display(), error=%format!("{:#}", e), "Failed to quarantine file");
                false
            }
        }
    }
}
