#![cfg(unix)]

#[path = "common/mod.rs"]
mod common;

use common::{list_files, write_file, JsonDecoder};
use fitetl::{FitETL, IsolationMode, WorkerCommand, WorkerReply};
use std::time::Duration;

// Stand-in worker: replies by file name, like `fitetl decode-one <path>` would.
const WORKER: &str = r#"
case "$1" in
  *crash*) exit 3 ;;
  *hang*) exec sleep 10 ;;
  *garbled*) echo 'this is not json' ;;
  *refused*) echo '{"status":"failed","data":"bad header"}' ;;
  *) echo '{"status":"rows","data":[{"source_file":"ignored","start_time":"2023-01-01 00:00:00","total_time_sec":60.0,"distance_km":null,"avg_hr":null,"max_hr":null,"sport":"running","sub_sport":null}]}' ;;
esac
"#;

fn sh_worker() -> IsolationMode {
    IsolationMode::Process(WorkerCommand::new("sh").arg("-c").arg(WORKER).arg("fitetl-worker"))
}

#[test]
fn worker_failures_are_quarantined() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("in");
    for name in ["good.fit", "crash.fit", "hang.fit", "garbled.fit", "refused.fit"] {
        write_file(&root.join(name), b"payload");
    }
    let q = tmp.path().join("q");
    let out = tmp.path().join("table.csv");

    let table = FitETL::new()
        .root_dir(&root)
        .quarantine_dir(&q)
        .isolation(sh_worker())
        .decode_timeout(Duration::from_millis(500))
        .parallelism(5)
        .progress(false)
        .summarize(&out)?;

    assert_eq!(table.total, 5);
    assert_eq!(table.successful, 1);
    assert_eq!(table.errored, 4);
    assert_eq!(
        list_files(&q),
        vec!["crash.fit", "garbled.fit", "hang.fit", "refused.fit"]
    );
    // rows are relabelled by the parent
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0].source_file, "good.fit");
    assert_eq!(table.rows[0].sport.as_deref(), Some("running"));
    Ok(())
}

#[test]
fn worker_command_decodes_even_with_custom_decoder() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("in");
    // not JSON: the in-process test decoder would reject it
    write_file(&root.join("ride.fit"), b"payload");

    let table = FitETL::new()
        .root_dir(&root)
        .quarantine_dir(tmp.path().join("q"))
        .decoder(JsonDecoder)
        .isolation(sh_worker())
        .progress(false)
        .summarize(&tmp.path().join("table.csv"))?;

    assert_eq!(table.successful, 1);
    assert_eq!(table.rows[0].total_time_sec, Some(60.0));
    Ok(())
}

#[test]
fn worker_reply_wire_format() -> anyhow::Result<()> {
    let failed: WorkerReply = serde_json::from_str(r#"{"status":"failed","data":"boom"}"#)?;
    assert!(matches!(failed, WorkerReply::Failed(ref m) if m == "boom"));

    let json = serde_json::to_string(&WorkerReply::Rows(Vec::new()))?;
    assert_eq!(json, r#"{"status":"rows","data":[]}"#);
    Ok(())
}
