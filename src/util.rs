use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Once;
use std::thread::sleep;
use std::time::Duration;

static TRACING: Once = Once::new();

/// Install the fmt subscriber once. `level` wins over `RUST_LOG`; default is `info`.
pub fn init_tracing_once(level: Option<&str>) {
    TRACING.call_once(|| {
        let env_filter = level
            .map(|l| l.to_lowercase())
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or_else(|| "info".to_string());
        let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
    });
}

// Raw OS codes for locks held briefly by scanners or network shares.
const TRANSIENT_OS_ERRORS: [i32; 5] = [5, 21, 32, 33, 1117];

fn is_transient(e: &io::Error) -> bool {
    e.raw_os_error().is_some_and(|code| TRANSIENT_OS_ERRORS.contains(&code))
}

fn with_backoff<T>(tries: usize, delay_ms: u64, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let attempts = tries.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if attempt < attempts && is_transient(&e) => {
                sleep(Duration::from_millis(delay_ms.saturating_mul(attempt as u64)));
                attempt += 1;
            }
            res => return res,
        }
    }
}

pub fn open_with_backoff(path: &Path, tries: usize, delay_ms: u64) -> io::Result<File> {
    with_backoff(tries, delay_ms, || File::open(path))
}

pub fn create_with_backoff(path: &Path, tries: usize, delay_ms: u64) -> io::Result<File> {
    with_backoff(tries, delay_ms, || File::create(path))
}

/// Copy a file with retries/backoff for transient errors. Overwrites `dest`.
pub fn copy_with_backoff(src: &Path, dest: &Path, tries: usize, delay_ms: u64) -> Result<()> {
    with_backoff(tries, delay_ms, || fs::copy(src, dest))
        .with_context(|| format!("copy {} -> {}", src.display(), dest.display()))?;
    Ok(())
}

/// Remove a file with retries/backoff. Succeeds if the file doesn't exist.
pub fn remove_with_backoff(path: &Path, tries: usize, delay_ms: u64) -> Result<()> {
    match with_backoff(tries, delay_ms, || fs::remove_file(path)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove {}", path.display())),
    }
}

/// Move a file. If rename fails (cross-device, sharing), fall back to copy+remove.
pub fn move_file_backoff(src: &Path, dest: &Path) -> Result<()> {
    const TRIES: usize = 20;
    const DELAY_MS: u64 = 50;
    if with_backoff(TRIES, DELAY_MS, || fs::rename(src, dest)).is_ok() {
        return Ok(());
    }
    copy_with_backoff(src, dest, TRIES, DELAY_MS)?;
    remove_with_backoff(src, TRIES, DELAY_MS)
}

/// Last component of a `/`-joined label (archive labels included).
pub fn basename(label: &str) -> &str {
    label.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(label)
}
