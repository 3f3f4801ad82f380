use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fitetl::{
    init_tracing_once, parse_cutoff, run_worker, BatchOrder, FitDecoder, FitETL, IsolationMode, MatchMode,
    WorkerCommand,
};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Hidden subcommand (`Cmd::DecodeOne`) the process pool re-invokes this binary with.
const WORKER_SUBCOMMAND: &str = "decode-one";

#[derive(Parser)]
#[command(name = "fitetl", version, about = "Summarize Garmin .fit files (loose or zipped) into CSV, filter by date and batch")]
struct Cli {
    /// Logging level (trace, debug, info, warn, error). Overrides RUST_LOG.
    #[arg(short = 'l', long = "log", global = true)]
    log_level: Option<String>,

    /// Disable progress bars.
    #[arg(long, global = true)]
    no_progress: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Decode every .fit file under a root into a summary CSV.
    Summarize(SummarizeArgs),
    /// Copy files recorded before a cutoff date into an output folder.
    Filter(FilterArgs),
    /// Move the files of a folder into batch_<n> sub-folders.
    Batch(BatchArgs),
    /// Summarize, filter and batch in one go.
    Run(RunArgs),
    #[command(hide = true)]
    DecodeOne { path: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Isolation {
    Thread,
    Process,
}

#[derive(Clone, Copy, ValueEnum)]
enum Match {
    Basename,
    Relative,
}

#[derive(Args)]
struct SummarizeArgs {
    /// Root directory containing .fit files or zip archives.
    root_dir: PathBuf,
    /// Output CSV file.
    #[arg(short, long, default_value = "activities_summary.csv")]
    output: PathBuf,
    /// Directory receiving files that failed to decode.
    #[arg(short, long = "error-dir", default_value = "error_files")]
    error_dir: PathBuf,
    /// Number of workers (default: number of CPUs).
    #[arg(short, long)]
    workers: Option<usize>,
    /// How decode tasks are isolated.
    #[arg(long, value_enum, default_value_t = Isolation::Process)]
    isolation: Isolation,
    /// Kill a decode worker process after this many seconds.
    #[arg(long)]
    decode_timeout: Option<u64>,
    /// Parent directory for scratch extraction (default: system temp).
    #[arg(long)]
    work_dir: Option<PathBuf>,
}

#[derive(Args)]
struct FilterOpts {
    /// Directory to save filtered files.
    #[arg(long = "output-folder")]
    output_folder: PathBuf,
    /// Cutoff date for filtering (YYYY-MM-DD).
    #[arg(long = "cutoff-date")]
    cutoff_date: String,
    /// How files are matched against the table.
    #[arg(long = "match", value_enum, default_value_t = Match::Basename)]
    match_mode: Match,
}

#[derive(Args)]
struct BatchOpts {
    /// Number of files per batch.
    #[arg(long, default_value_t = 25)]
    batch_size: usize,
    /// Keep directory listing order instead of sorting by name.
    #[arg(long)]
    unsorted: bool,
}

#[derive(Args)]
struct FilterArgs {
    /// Summary CSV produced by `summarize`.
    #[arg(long)]
    table: PathBuf,
    /// Directory containing the zip archives / .fit files.
    #[arg(long = "input-folder")]
    input_folder: PathBuf,
    #[command(flatten)]
    filter: FilterOpts,
    #[arg(long)]
    work_dir: Option<PathBuf>,
}

#[derive(Args)]
struct BatchArgs {
    /// Folder whose files are batched.
    dir: PathBuf,
    #[command(flatten)]
    batch: BatchOpts,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    summarize: SummarizeArgs,
    #[command(flatten)]
    filter: FilterOpts,
    #[command(flatten)]
    batch: BatchOpts,
}

fn match_mode(m: Match) -> MatchMode {
    match m {
        Match::Basename => MatchMode::Basename,
        Match::Relative => MatchMode::RelativePath,
    }
}

fn batch_order(opts: &BatchOpts) -> BatchOrder {
    if opts.unsorted { BatchOrder::Listing } else { BatchOrder::Sorted }
}

fn summarize_etl(args: &SummarizeArgs, progress: bool) -> Result<FitETL> {
    let mut etl = FitETL::new()
        .root_dir(&args.root_dir)
        .quarantine_dir(&args.error_dir)
        .progress(progress);
    if let Some(n) = args.workers {
        etl = etl.parallelism(n);
    }
    if let Some(w) = &args.work_dir {
        etl = etl.work_dir(w);
    }
    if let Some(secs) = args.decode_timeout {
        etl = etl.decode_timeout(Duration::from_secs(secs));
    }
    let isolation = match args.isolation {
        Isolation::Thread => IsolationMode::Thread,
        Isolation::Process => {
            let exe = std::env::current_exe().context("locate own executable for worker processes")?;
            IsolationMode::Process(WorkerCommand::new(exe).arg(WORKER_SUBCOMMAND))
        }
    };
    Ok(etl.isolation(isolation))
}

/// First Ctrl-C stops new decodes; the run finishes with a partial table.
fn install_interrupt(etl: &FitETL) -> Result<()> {
    let flag = etl.cancel_handle();
    ctrlc::set_handler(move || {
        if !flag.swap(true, Ordering::SeqCst) {
            tracing::warn!("Interrupt received (Ctrl-C); finishing in-flight files");
        }
    })
    .context("install Ctrl-C handler")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Cmd::DecodeOne { path } = &cli.command {
        // stdout carries the reply; no logging here
        return run_worker(&FitDecoder, path);
    }

    init_tracing_once(cli.log_level.as_deref());
    let progress = !cli.no_progress;

    match cli.command {
        Cmd::Summarize(args) => {
            let etl = summarize_etl(&args, progress)?;
            install_interrupt(&etl)?;
            etl.summarize(&args.output)?;
        }
        Cmd::Filter(args) => {
            let cutoff = parse_cutoff(&args.filter.cutoff_date)?;
            let mut etl = FitETL::new()
                .root_dir(&args.input_folder)
                .match_mode(match_mode(args.filter.match_mode))
                .progress(progress);
            if let Some(w) = &args.work_dir {
                etl = etl.work_dir(w);
            }
            etl.filter_and_copy(&args.table, cutoff, &args.filter.output_folder)?;
        }
        Cmd::Batch(args) => {
            FitETL::new()
                .batch_size(args.batch.batch_size)
                .batch_order(batch_order(&args.batch))
                .batch(&args.dir)?;
        }
        Cmd::Run(args) => {
            let cutoff = parse_cutoff(&args.filter.cutoff_date)?;
            let etl = summarize_etl(&args.summarize, progress)?
                .match_mode(match_mode(args.filter.match_mode))
                .batch_size(args.batch.batch_size)
                .batch_order(batch_order(&args.batch));
            install_interrupt(&etl)?;
            etl.run_all(&args.summarize.output, cutoff, &args.filter.output_folder)?;
        }
        Cmd::DecodeOne { .. } => {}
    }
    Ok(())
}
