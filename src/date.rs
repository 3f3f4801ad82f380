//! Timestamp text handling for the summary table: one canonical output form
//! (`YYYY-MM-DD HH:MM:SS`, UTC), a tolerant reader, and the cutoff parser.

use anyhow::{anyhow, Result};
use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

const NAIVE_SPACE: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
);
const NAIVE_T: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
);
const OFFSET_SPACE: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]][offset_hour sign:mandatory]:[offset_minute]"
);
const DATE_ONLY: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Render an instant the way the summary table stores it.
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    let ts = ts.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        ts.year(),
        u8::from(ts.month()),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second()
    )
}

/// Parse a table timestamp. Naive values are taken as UTC.
/// Returns `None` for empty or unrecognised text.
pub fn parse_timestamp(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(ts);
    }
    if let Ok(ts) = OffsetDateTime::parse(s, OFFSET_SPACE) {
        return Some(ts);
    }
    if let Some(rest) = s.strip_suffix('Z') {
        if let Ok(dt) = PrimitiveDateTime::parse(rest, NAIVE_SPACE) {
            return Some(dt.assume_utc());
        }
    }
    for fmt in [NAIVE_SPACE, NAIVE_T] {
        if let Ok(dt) = PrimitiveDateTime::parse(s, fmt) {
            return Some(dt.assume_utc());
        }
    }
    Date::parse(s, DATE_ONLY)
        .ok()
        .map(|d| PrimitiveDateTime::new(d, Time::MIDNIGHT).assume_utc())
}

/// Parse the caller-supplied cutoff (`YYYY-MM-DD` means midnight UTC).
pub fn parse_cutoff(s: &str) -> Result<OffsetDateTime> {
    parse_timestamp(s).ok_or_else(|| anyhow!("invalid cutoff {:?}: expected YYYY-MM-DD", s))
}

/// Serde adapter storing `Option<OffsetDateTime>` in table text form.
pub(crate) mod table_ts {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(v: &Option<OffsetDateTime>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(ts) => s.serialize_some(&super::format_timestamp(*ts)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<OffsetDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            None => Ok(None),
            Some(text) => super::parse_timestamp(&text)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("bad timestamp {:?}", text))),
        }
    }
}
