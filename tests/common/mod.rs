#![allow(dead_code)]

use anyhow::{anyhow, Context, Result};
use fitetl::{Decoder, FieldValue, TypedMessage};
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Test stand-in for the binary decoder. A "record file" is JSON:
/// `{"messages":[{"kind":"session","fields":{"start_time":"2023-01-01T00:00:00Z", ...}}]}`.
/// - strings in `start_time`/`timestamp` become timestamps, other strings text
/// - `{"enum": 1, "name": "running"}` becomes an enum value
/// - anything that is not JSON fails to decode
/// - the literal content `PANIC` makes the decoder panic
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonDecoder;

fn field_value(name: &str, v: &Value) -> Result<FieldValue> {
    Ok(match v {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Int(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Int(i),
            None => FieldValue::Float(n.as_f64().ok_or_else(|| anyhow!("bad number"))?),
        },
        Value::String(s) if name == "start_time" || name == "timestamp" => {
            FieldValue::Timestamp(fitetl::parse_timestamp(s).ok_or_else(|| anyhow!("bad timestamp {}", s))?)
        }
        Value::String(s) => FieldValue::Text(s.clone()),
        Value::Object(o) if o.contains_key("enum") => FieldValue::Enum {
            raw: o["enum"].as_i64().unwrap_or_default(),
            name: o.get("name").and_then(|n| n.as_str()).map(str::to_string),
        },
        other => return Err(anyhow!("unsupported field value {}", other)),
    })
}

impl Decoder for JsonDecoder {
    fn decode(&self, path: &Path) -> Result<Vec<TypedMessage>> {
        let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        if text.trim() == "PANIC" {
            panic!("decoder blew up on {}", path.display());
        }
        let doc: Value = serde_json::from_str(&text).context("not a record file")?;
        let msgs = doc["messages"].as_array().ok_or_else(|| anyhow!("missing messages"))?;
        let mut out = Vec::new();
        for m in msgs {
            let mut msg = TypedMessage::new(m["kind"].as_str().unwrap_or("unknown"));
            if let Some(fields) = m["fields"].as_object() {
                for (k, v) in fields {
                    msg = msg.with_field(k.as_str(), field_value(k, v)?);
                }
            }
            out.push(msg);
        }
        Ok(out)
    }
}

/// A record file with one session starting at `start`.
pub fn session_file(start: &str) -> String {
    json!({"messages": [
        {"kind": "file_id", "fields": {"serial_number": 1234}},
        {"kind": "session", "fields": {
            "start_time": start,
            "total_elapsed_time": 3600.5,
            "total_distance": 10500.0,
            "avg_heart_rate": 142,
            "max_heart_rate": 181,
            "sport": {"enum": 1, "name": "running"},
            "sub_sport": {"enum": 0, "name": "generic"}
        }},
        {"kind": "record", "fields": {"timestamp": start, "heart_rate": 90}}
    ]})
    .to_string()
}

/// A record file without sessions, only time-series samples.
pub fn records_only_file(timestamps: &[&str]) -> String {
    let recs: Vec<Value> = timestamps
        .iter()
        .map(|t| json!({"kind": "record", "fields": {"timestamp": t}}))
        .collect();
    json!({ "messages": recs }).to_string()
}

/// A decodable file with nothing to summarize.
pub fn empty_activity_file() -> String {
    json!({"messages": [{"kind": "file_id", "fields": {"serial_number": 1}}]}).to_string()
}

pub fn write_file(path: &Path, content: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut f = File::create(path).unwrap();
    f.write_all(content).unwrap();
}

/// Write a zip at `path` with the given `(entry name, content)` pairs.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let f = File::create(path).unwrap();
    let mut zw = ZipWriter::new(f);
    for (name, content) in entries {
        zw.start_file(*name, SimpleFileOptions::default()).unwrap();
        zw.write_all(content).unwrap();
    }
    zw.finish().unwrap();
}

/// Plain files directly inside `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Vec<String> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut v: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_file())
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    v.sort();
    v
}

/// Read a text file line-by-line into strings (skips empty lines).
pub fn read_lines(path: &Path) -> Vec<String> {
    let f = File::open(path).unwrap();
    let r = BufReader::new(f);
    r.lines().map(|l| l.unwrap()).filter(|s| !s.is_empty()).collect()
}

/// Workspace layout used by most tests:
/// - `input/export.zip` holding `activities/jan.fit` (session 2023-01-01) and
///   `activities/jun.fit` (records only, from 2023-06-01), plus macOS junk
/// - `input/broken.fit`, not decodable
pub struct Fixture {
    pub _tmp: tempfile::TempDir,
    pub base: PathBuf,
    pub input: PathBuf,
    pub quarantine: PathBuf,
    pub table: PathBuf,
}

pub fn make_fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path().to_path_buf();
    let input = base.join("input");

    let jan = session_file("2023-01-01T00:00:00Z");
    let jun = records_only_file(&["2023-06-01T00:30:00Z", "2023-06-01T00:00:00Z"]);
    write_zip(
        &input.join("export.zip"),
        &[
            ("activities/jan.fit", jan.as_bytes()),
            ("activities/jun.fit", jun.as_bytes()),
            ("__MACOSX/activities/._jan.fit", b"resource fork"),
            ("activities/._jun.fit", b"sidecar"),
            ("activities/readme.txt", b"not a record"),
        ],
    );
    write_file(&input.join("broken.fit"), b"\x0e\x10garbage");

    Fixture {
        base: base.clone(),
        input,
        quarantine: base.join("error_files"),
        table: base.join("out").join("activities_summary.csv"),
        _tmp: tmp,
    }
}
