//! Per-file extraction task: decode, summarize, and on failure quarantine.
//! Also the child-process side of process isolation (`run_worker`).

use crate::config::{IsolationMode, WorkerCommand};
use crate::decode::Decoder;
use crate::paths::FileJob;
use crate::quarantine::Quarantine;
use crate::summary::{summarize, ActivitySummary};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::io::{Read, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

/// Result of processing one input file.
#[derive(Clone, Debug, PartialEq)]
pub enum ExtractionOutcome {
    /// One row per session (at least one).
    Success(Vec<ActivitySummary>),
    /// Decoded, but nothing to summarize.
    Empty,
    /// Decode failed; the file has been offered to the quarantine.
    Error(String),
}

/// Everything a task needs; shared read-only across the pool.
pub struct TaskContext {
    pub decoder: Arc<dyn Decoder>,
    pub isolation: IsolationMode,
    pub decode_timeout: Option<Duration>,
    pub quarantine: Quarantine,
}

/// Reply written by a worker process on stdout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum WorkerReply {
    Rows(Vec<ActivitySummary>),
    Failed(String),
}

/// Marker error: the decode was cut short by an interrupt, not by the input.
/// Carried inside `anyhow::Error`; test with `err.is::<DecodeInterrupted>()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeInterrupted;

impl std::fmt::Display for DecodeInterrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("decode interrupted")
    }
}

/// Ctrl-C reaches the whole foreground process group, so a worker child can die
/// of it before our own handler has raised the cancel flag.
#[cfg(unix)]
pub(crate) fn killed_by_interrupt(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    const SIGINT: i32 = 2;
    status.signal() == Some(SIGINT)
}

#[cfg(windows)]
pub(crate) fn killed_by_interrupt(status: &ExitStatus) -> bool {
    // STATUS_CONTROL_C_EXIT
    status.code() == Some(0xC000_013Au32 as i32)
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn killed_by_interrupt(_status: &ExitStatus) -> bool {
    false
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Decode and summarize in the calling thread, turning panics into errors.
pub fn decode_in_thread(decoder: &dyn Decoder, path: &Path, label: &str) -> Result<Vec<ActivitySummary>> {
    match catch_unwind(AssertUnwindSafe(|| decoder.decode(path).map(|msgs| summarize(&msgs, label)))) {
        Ok(res) => res,
        Err(payload) => Err(anyhow!("decoder panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus> {
    let Some(limit) = timeout else {
        return child.wait().context("wait for decode worker");
    };
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().context("poll decode worker")? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!("decode worker timed out after {:?}", limit);
        }
        sleep(Duration::from_millis(20));
    }
}

/// Decode in a child process. Abnormal exit, timeout or a garbled reply is an error.
pub fn decode_in_child(
    cmd: &WorkerCommand,
    path: &Path,
    label: &str,
    timeout: Option<Duration>,
) -> Result<Vec<ActivitySummary>> {
    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawn decode worker {}", cmd.program.display()))?;

    let mut stdout = child.stdout.take().ok_or_else(|| anyhow!("decode worker has no stdout"))?;
    // Drain stdout concurrently so a large reply cannot block the child.
    let reader = std::thread::spawn(move || {
        let mut buf = String::new();
        stdout.read_to_string(&mut buf).map(|_| buf)
    });

    let status = wait_with_deadline(&mut child, timeout)?;
    let text = reader
        .join()
        .map_err(|_| anyhow!("decode worker reader panicked"))?
        .context("read decode worker reply")?;
    if killed_by_interrupt(&status) {
        return Err(anyhow::Error::msg(DecodeInterrupted));
    }
    if !status.success() {
        bail!("decode worker exited abnormally ({})", status);
    }

    let reply: WorkerReply = serde_json::from_str(text.trim()).context("parse decode worker reply")?;
    match reply {
        WorkerReply::Rows(mut rows) => {
            for r in &mut rows {
                r.source_file = label.to_string();
            }
            Ok(rows)
        }
        WorkerReply::Failed(msg) => Err(anyhow!(msg)),
    }
}

/// Child-process entry point: decode `path` and print one `WorkerReply` line.
/// Decode failures are reported in the reply; only a broken stdout is an `Err`.
pub fn run_worker(decoder: &dyn Decoder, path: &Path) -> Result<()> {
    let label = path.to_string_lossy();
    let reply = match decode_in_thread(decoder, path, &label) {
        Ok(rows) => WorkerReply::Rows(rows),
        Err(e) => WorkerReply::Failed(format!("{:#}", e)),
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer(&mut out, &reply)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

/// Run one file through the configured isolation mode. Returns the raw decode
/// result; the caller decides between quarantine and cancellation.
pub fn decode_job(ctx: &TaskContext, job: &FileJob) -> Result<Vec<ActivitySummary>> {
    match &ctx.isolation {
        IsolationMode::Thread => decode_in_thread(ctx.decoder.as_ref(), &job.path, &job.label),
        IsolationMode::Process(cmd) => decode_in_child(cmd, &job.path, &job.label, ctx.decode_timeout),
    }
}

/// Map a decode result to an outcome, quarantining failures.
pub fn settle(ctx: &TaskContext, job: &FileJob, res: Result<Vec<ActivitySummary>>) -> ExtractionOutcome {
    match res {
        Ok(rows) if rows.is_empty() => {
            tracing::debug!(file=%job.label, "No session data found");
            ExtractionOutcome::Empty
        }
        Ok(rows) => {
            tracing::debug!(file=%job.label, sessions=rows.len(), "Extracted sessions");
            ExtractionOutcome::Success(rows)
        }
        Err(e) => {
            let msg = format!("{:#}", e);
            tracing::error!(file=%job.label, error=%msg, "Error processing file");
            ctx.quarantine.admit(&job.path);
            ExtractionOutcome::Error(msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{FieldValue, TypedMessage};

    struct Fixed(bool);

    impl Decoder for Fixed {
        fn decode(&self, _path: &Path) -> Result<Vec<TypedMessage>> {
            if self.0 {
                panic!("corrupt header");
            }
            Ok(vec![TypedMessage::new("session").with_field("total_distance", FieldValue::Null)])
        }
    }

    fn ctx(decoder: Fixed, qdir: &Path) -> TaskContext {
        TaskContext {
            decoder: Arc::new(decoder),
            isolation: IsolationMode::Thread,
            decode_timeout: None,
            quarantine: Quarantine::new(qdir),
        }
    }

    #[test]
    fn panic_becomes_error_and_is_quarantined() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("x.fit");
        std::fs::write(&input, b"bytes").unwrap();
        let ctx = ctx(Fixed(true), &tmp.path().join("q"));
        let job = FileJob { path: input, label: "x.fit".into() };

        let outcome = settle(&ctx, &job, decode_job(&ctx, &job));
        match outcome {
            ExtractionOutcome::Error(msg) => assert!(msg.contains("corrupt header")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(tmp.path().join("q").join("x.fit").exists());
    }

    #[cfg(unix)]
    #[test]
    fn sigint_exit_is_an_interrupt() {
        use std::os::unix::process::ExitStatusExt;
        // raw wait statuses: low bits carry the terminating signal
        assert!(killed_by_interrupt(&ExitStatus::from_raw(2)));
        assert!(!killed_by_interrupt(&ExitStatus::from_raw(9)));
        assert!(!killed_by_interrupt(&ExitStatus::from_raw(3 << 8)));
        assert!(!killed_by_interrupt(&ExitStatus::from_raw(0)));
    }

    #[test]
    fn null_distance_is_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx(Fixed(false), &tmp.path().join("q"));
        let job = FileJob { path: tmp.path().join("y.fit"), label: "y.fit".into() };
        match settle(&ctx, &job, decode_job(&ctx, &job)) {
            ExtractionOutcome::Success(rows) => {
                assert_eq!(rows[0].distance_km, Some(0.0));
                assert_eq!(rows[0].total_time_sec, None);
                assert_eq!(rows[0].source_file, "y.fit");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!tmp.path().join("q").exists());
    }
}
