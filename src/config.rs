use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Command line used to decode one file in a child process: `<program> <args...> <file>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self { program: program.as_ref().to_path_buf(), args: Vec::new() }
    }
    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }
}

/// How each decode task is isolated from its siblings and the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IsolationMode {
    /// Pool thread; decoder panics become errors. Cannot recover from hangs or aborts.
    Thread,
    /// One child process per file; crashes, aborts and timeouts become errors.
    Process(WorkerCommand),
}

/// How the filter stage keys files against the summary table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchMode {
    /// File basename only. Same-named files from different archives collide.
    Basename,
    /// Full label, `<archive>!/<entry>` or the loose file's relative path.
    RelativePath,
}

/// Order in which files are dealt into batches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOrder {
    /// Lexicographic by file name (deterministic).
    Sorted,
    /// Raw directory listing order.
    Listing,
}

/// User-facing options with sensible defaults and builder chaining.
#[derive(Clone, Debug)]
pub struct ETLOptions {
    pub root_dir: PathBuf,
    pub quarantine_dir: PathBuf,
    pub work_dir: Option<PathBuf>,      // parent of scratch dirs; None = system temp
    pub parallelism: Option<usize>,     // None = available parallelism
    pub isolation: IsolationMode,
    pub decode_timeout: Option<Duration>, // process isolation only
    pub match_mode: MatchMode,
    pub batch_size: usize,
    pub batch_order: BatchOrder,
    pub progress: bool,
    pub progress_label: Option<String>,
    pub cancel: Arc<AtomicBool>,
}

impl Default for ETLOptions {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            quarantine_dir: PathBuf::from("error_files"),
            work_dir: None,
            parallelism: None,
            isolation: IsolationMode::Thread,
            decode_timeout: None,
            match_mode: MatchMode::Basename,
            batch_size: 25,
            batch_order: BatchOrder::Sorted,
            progress: true,
            progress_label: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ETLOptions {
    pub fn with_root_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.root_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_quarantine_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.quarantine_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads.max(1));
        self
    }
    pub fn with_isolation(mut self, mode: IsolationMode) -> Self {
        self.isolation = mode;
        self
    }
    pub fn with_decode_timeout(mut self, timeout: Duration) -> Self {
        self.decode_timeout = Some(timeout);
        self
    }
    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }
    pub fn with_batch_order(mut self, order: BatchOrder) -> Self {
        self.batch_order = order;
        self
    }
    pub fn with_progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }
    pub fn with_progress_label(mut self, label: impl Into<String>) -> Self {
        self.progress_label = Some(label.into());
        self
    }
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn effective_parallelism(&self) -> usize {
        self.parallelism
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4))
            .max(1)
    }
}
