mod config;
mod date;
mod paths;
mod util;
mod progress;

mod decode;
mod fit;
mod summary;

mod archive;
mod quarantine;
mod extract;
mod concurrency;
mod aggregate;

mod filter;
mod batch;
mod pipeline;

pub use crate::config::{BatchOrder, ETLOptions, IsolationMode, MatchMode, WorkerCommand};
pub use crate::date::{format_timestamp, parse_cutoff, parse_timestamp};
pub use crate::pipeline::{FitETL, RunReport};

// Decoder seam: plug in any record decoder.
pub use crate::decode::{Decoder, Field, FieldValue, TypedMessage};
pub use crate::fit::FitDecoder;
pub use crate::summary::{summarize, ActivitySummary, COLUMNS};

// Stage building blocks, usable without the `FitETL` facade.
pub use crate::paths::{discover, Discovered, FileJob};
pub use crate::archive::{extract_records, ArchiveTask, ExtractedEntry};
pub use crate::quarantine::Quarantine;
pub use crate::extract::{run_worker, DecodeInterrupted, ExtractionOutcome, TaskContext, WorkerReply};
pub use crate::concurrency::{build_pool, run_pool, PoolReport};
pub use crate::aggregate::{read_rows, write_rows, AggregatedTable};
pub use crate::filter::{filter_and_copy, FilterReport, TableIndex};
pub use crate::batch::{batch_dir_name, batch_files, BatchReport};

pub use crate::util::init_tracing_once;
