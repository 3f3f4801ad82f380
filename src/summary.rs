//! Per-file summarization: typed messages in, zero or more table rows out.

use crate::decode::{FieldValue, TypedMessage};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Column order of the summary table.
pub const COLUMNS: [&str; 8] = [
    "source_file",
    "start_time",
    "total_time_sec",
    "distance_km",
    "avg_hr",
    "max_hr",
    "sport",
    "sub_sport",
];

/// One row of the summary table. Field order is the column order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub source_file: String,
    #[serde(with = "crate::date::table_ts")]
    pub start_time: Option<OffsetDateTime>,
    pub total_time_sec: Option<f64>,
    pub distance_km: Option<f64>,
    pub avg_hr: Option<u32>,
    pub max_hr: Option<u32>,
    pub sport: Option<String>,
    pub sub_sport: Option<String>,
}

impl ActivitySummary {
    pub fn empty(source_file: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            start_time: None,
            total_time_sec: None,
            distance_km: None,
            avg_hr: None,
            max_hr: None,
            sport: None,
            sub_sport: None,
        }
    }
}

const SESSION: &str = "session";
const RECORD: &str = "record";

fn heart_rate(v: &FieldValue) -> Option<u32> {
    v.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f.round() as u32)
}

fn from_session(msg: &TypedMessage, label: &str) -> ActivitySummary {
    let mut s = ActivitySummary::empty(label);
    for field in &msg.fields {
        let v = &field.value;
        match field.name.as_str() {
            "start_time" => s.start_time = v.as_timestamp(),
            // present-but-null counts as zero, absent stays empty
            "total_elapsed_time" => s.total_time_sec = Some(v.as_f64().unwrap_or(0.0)),
            "total_distance" => s.distance_km = Some(v.as_f64().unwrap_or(0.0) / 1000.0),
            "avg_heart_rate" => s.avg_hr = heart_rate(v),
            "max_heart_rate" => s.max_hr = heart_rate(v),
            "sport" => s.sport = v.symbol(),
            "sub_sport" => s.sub_sport = v.symbol(),
            _ => {}
        }
    }
    s
}

/// Earliest `timestamp` across time-series (`record`) messages.
pub fn min_record_timestamp(messages: &[TypedMessage]) -> Option<OffsetDateTime> {
    messages
        .iter()
        .filter(|m| m.kind == RECORD)
        .filter_map(|m| m.field("timestamp").and_then(FieldValue::as_timestamp))
        .min()
}

/// Build one summary per session. Sessions without a start time fall back to
/// the earliest record timestamp; a file with no sessions but timestamped
/// records yields a single start-time-only row. Empty result means no usable
/// activity data.
pub fn summarize(messages: &[TypedMessage], label: &str) -> Vec<ActivitySummary> {
    let mut rows: Vec<ActivitySummary> = messages
        .iter()
        .filter(|m| m.kind == SESSION)
        .map(|m| from_session(m, label))
        .collect();

    if rows.iter().all(|r| r.start_time.is_none()) {
        if let Some(min_ts) = min_record_timestamp(messages) {
            if rows.is_empty() {
                let mut row = ActivitySummary::empty(label);
                row.start_time = Some(min_ts);
                rows.push(row);
            } else {
                for row in &mut rows {
                    row.start_time = Some(min_ts);
                }
            }
        }
    }
    rows
}
