//! Bounded worker pool: one task per file on a local rayon pool, results
//! funnelled to a single controller over a channel.

use crate::config::IsolationMode;
use crate::extract::{decode_job, panic_message, settle, DecodeInterrupted, ExtractionOutcome, TaskContext};
use crate::paths::FileJob;
use anyhow::{Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

/// Build a private pool of `threads` workers. Stray task panics are logged,
/// never allowed to abort the process.
pub fn build_pool(threads: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("fitetl-worker-{}", i))
        .panic_handler(|payload| {
            tracing::error!(panic=%panic_message(payload.as_ref()), "Worker task panicked");
        })
        .build()
        .context("build worker pool")
}

/// How the pool run ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub completed: usize,
    /// Tasks that never ran (or were cut short) because of cancellation.
    pub skipped: usize,
    pub interrupted: bool,
}

/// Process every job on `pool`, calling `on_complete` on the controller thread
/// in completion order. Once `cancel` is raised, tasks that have not started
/// skip decoding; the call returns after in-flight tasks have finished, so
/// inputs can be safely deleted afterwards.
pub fn run_pool<F>(
    pool: &ThreadPool,
    jobs: Vec<FileJob>,
    ctx: Arc<TaskContext>,
    cancel: Arc<AtomicBool>,
    mut on_complete: F,
) -> PoolReport
where
    F: FnMut(FileJob, ExtractionOutcome),
{
    let (tx, rx) = mpsc::channel::<(FileJob, Option<ExtractionOutcome>)>();

    for job in jobs {
        let tx = tx.clone();
        let ctx = Arc::clone(&ctx);
        let cancel = Arc::clone(&cancel);
        pool.spawn(move || {
            let outcome = if cancel.load(Ordering::SeqCst) {
                None
            } else {
                match catch_unwind(AssertUnwindSafe(|| decode_job(&ctx, &job))) {
                    Ok(Err(e)) if e.is::<DecodeInterrupted>() => None,
                    Ok(Err(_)) if cancel.load(Ordering::SeqCst) && matches!(ctx.isolation, IsolationMode::Process(_)) => {
                        // the interrupt also reached the child; not a bad file
                        None
                    }
                    Ok(res) => Some(settle(&ctx, &job, res)),
                    Err(payload) => {
                        let err = anyhow::anyhow!("task panicked: {}", panic_message(payload.as_ref()));
                        Some(settle(&ctx, &job, Err(err)))
                    }
                }
            };
            let _ = tx.send((job, outcome));
        });
    }
    drop(tx);

    let mut report = PoolReport::default();
    let mut announced = false;
    for (job, outcome) in rx {
        match outcome {
            Some(o) => {
                report.completed += 1;
                on_complete(job, o);
            }
            None => report.skipped += 1,
        }
        if !announced && cancel.load(Ordering::SeqCst) {
            announced = true;
            tracing::warn!("Interrupted: no new files will be decoded, waiting for in-flight tasks");
        }
    }
    report.interrupted = cancel.load(Ordering::SeqCst);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{Decoder, FieldValue, TypedMessage};
    use crate::quarantine::Quarantine;
    use std::path::Path;

    /// Files named `cut*` report an interrupt; everything else is one session.
    struct CutShort;

    impl Decoder for CutShort {
        fn decode(&self, path: &Path) -> anyhow::Result<Vec<TypedMessage>> {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.starts_with("cut") {
                return Err(anyhow::Error::msg(DecodeInterrupted));
            }
            Ok(vec![TypedMessage::new("session").with_field("total_elapsed_time", FieldValue::Float(1.0))])
        }
    }

    #[test]
    fn interrupted_decodes_are_skipped_not_quarantined() {
        let tmp = tempfile::tempdir().unwrap();
        let qdir = tmp.path().join("q");
        let jobs: Vec<FileJob> = ["cut_a.fit", "ok_b.fit", "cut_c.fit"]
            .iter()
            .map(|n| FileJob { path: tmp.path().join(n), label: n.to_string() })
            .collect();
        let ctx = Arc::new(TaskContext {
            decoder: Arc::new(CutShort),
            isolation: IsolationMode::Thread,
            decode_timeout: None,
            quarantine: Quarantine::new(&qdir),
        });
        let pool = build_pool(2).unwrap();
        let mut done = Vec::new();

        let report = run_pool(&pool, jobs, ctx, Arc::new(AtomicBool::new(false)), |job, outcome| {
            done.push((job.label, matches!(outcome, ExtractionOutcome::Success(_))));
        });

        assert_eq!(report.completed, 1);
        assert_eq!(report.skipped, 2);
        assert!(!report.interrupted);
        assert_eq!(done, vec![("ok_b.fit".to_string(), true)]);
        assert!(!qdir.exists());
    }
}
