//! Progress reporting: count-style bars for archive expansion and decoding.

use indicatif::{ProgressBar, ProgressStyle};

/// Count-style progress bar (items processed out of total), with an optional label.
pub fn make_count_progress(total: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner:.green} {msg} {pos}/{len} [{bar:.cyan/blue}] {percent:>3}%  \
         it/s: {per_sec}  elapsed: {elapsed_precise}  eta: {eta_precise}"
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ");
    pb.set_style(style);
    if !label.is_empty() {
        pb.set_message(label.to_string());
    }
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Thin wrapper so callers can hold an `Option<ProgressScope>` and forget about it.
pub struct ProgressScope {
    pb: ProgressBar,
}

impl ProgressScope {
    pub fn count<T: Into<String>>(label: T, total: u64) -> Self {
        Self { pb: make_count_progress(total, &label.into()) }
    }
    /// `None` when progress is disabled.
    pub fn maybe<T: Into<String>>(enabled: bool, label: T, total: u64) -> Option<Self> {
        enabled.then(|| Self::count(label, total))
    }
    #[inline]
    pub fn inc_items(&self, delta: u64) {
        self.pb.inc(delta);
    }
    pub fn finish<T: Into<String>>(&self, msg: T) {
        self.pb.finish_with_message(msg.into());
    }
}
