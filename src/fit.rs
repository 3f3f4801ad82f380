//! Default decoder backed by the `fitparser` crate.

use crate::decode::{Decoder, Field, FieldValue, TypedMessage};
use crate::util::open_with_backoff;
use anyhow::{anyhow, Context, Result};
use fitparser::de::{from_reader_with_options, DecodeOption};
use fitparser::profile::field_types::MesgNum;
use fitparser::Value;
use std::collections::HashSet;
use std::io::BufReader;
use std::path::Path;
use time::OffsetDateTime;

/// Decodes with both header and data CRC checks disabled: exports often carry
/// a stale trailing checksum on otherwise intact files.
#[derive(Clone, Copy, Debug, Default)]
pub struct FitDecoder;

fn lenient_options() -> HashSet<DecodeOption> {
    [DecodeOption::SkipHeaderCrcValidation, DecodeOption::SkipDataCrcValidation]
        .into_iter()
        .collect()
}

impl Decoder for FitDecoder {
    fn decode(&self, path: &Path) -> Result<Vec<TypedMessage>> {
        let file = open_with_backoff(path, 8, 50).with_context(|| format!("open {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let records = from_reader_with_options(&mut reader, &lenient_options())
            .map_err(|e| anyhow!("decode {}: {}", path.display(), e))?;

        Ok(records
            .into_iter()
            .map(|rec| {
                let kind = match rec.kind() {
                    MesgNum::Session => "session".to_string(),
                    MesgNum::Record => "record".to_string(),
                    other => format!("{:?}", other).to_lowercase(),
                };
                let fields = rec
                    .fields()
                    .iter()
                    .map(|f| Field { name: f.name().to_string(), value: convert(f.value()) })
                    .collect();
                TypedMessage { kind, fields }
            })
            .collect())
    }
}

fn convert(v: &Value) -> FieldValue {
    match v {
        Value::Timestamp(dt) => OffsetDateTime::from_unix_timestamp(dt.timestamp())
            .map(FieldValue::Timestamp)
            .unwrap_or(FieldValue::Null),
        Value::Enum(n) => FieldValue::Enum { raw: i64::from(*n), name: None },
        Value::Byte(n) | Value::UInt8(n) | Value::UInt8z(n) => FieldValue::Int(i64::from(*n)),
        Value::SInt8(n) => FieldValue::Int(i64::from(*n)),
        Value::SInt16(n) => FieldValue::Int(i64::from(*n)),
        Value::UInt16(n) | Value::UInt16z(n) => FieldValue::Int(i64::from(*n)),
        Value::SInt32(n) => FieldValue::Int(i64::from(*n)),
        Value::UInt32(n) | Value::UInt32z(n) => FieldValue::Int(i64::from(*n)),
        Value::SInt64(n) => FieldValue::Int(*n),
        Value::UInt64(n) | Value::UInt64z(n) => i64::try_from(*n)
            .map(FieldValue::Int)
            .unwrap_or(FieldValue::Float(*n as f64)),
        Value::Float32(f) => FieldValue::Float(f64::from(*f)),
        Value::Float64(f) => FieldValue::Float(*f),
        // fitparser resolves known enum symbols (sport, sub_sport, ...) to strings.
        Value::String(s) => FieldValue::Text(s.clone()),
        other => FieldValue::Text(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::summarize;
    use time::macros::datetime;

    const FIT_EPOCH_OFFSET: u32 = 631_065_600;
    const SESSION: u16 = 18;
    const RECORD: u16 = 20;
    const ENUM: u8 = 0x00;
    const UINT8: u8 = 0x02;
    const UINT32: u8 = 0x86;

    fn fit_time(ts: OffsetDateTime) -> u32 {
        ts.unix_timestamp() as u32 - FIT_EPOCH_OFFSET
    }

    fn crc16(bytes: &[u8]) -> u16 {
        const TABLE: [u16; 16] = [
            0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401,
            0xA001, 0x6C00, 0x7800, 0xB401, 0x5000, 0x9C01, 0x8801, 0x4400,
        ];
        let mut crc = 0u16;
        for &b in bytes {
            let tmp = TABLE[(crc & 0xF) as usize];
            crc = ((crc >> 4) & 0x0FFF) ^ tmp ^ TABLE[(b & 0xF) as usize];
            let tmp = TABLE[(crc & 0xF) as usize];
            crc = ((crc >> 4) & 0x0FFF) ^ tmp ^ TABLE[((b >> 4) & 0xF) as usize];
        }
        crc
    }

    /// Minimal little-endian FIT writer: one local type per global message.
    #[derive(Default)]
    struct FitBytes {
        data: Vec<u8>,
    }

    impl FitBytes {
        /// `fields`: (field number, base type, little-endian value bytes).
        fn message(mut self, local: u8, global: u16, fields: &[(u8, u8, Vec<u8>)]) -> Self {
            self.data.push(0x40 | local);
            self.data.extend_from_slice(&[0, 0]);
            self.data.extend_from_slice(&global.to_le_bytes());
            self.data.push(fields.len() as u8);
            for (num, base, value) in fields {
                self.data.extend_from_slice(&[*num, value.len() as u8, *base]);
            }
            self.data.push(local);
            for (_, _, value) in fields {
                self.data.extend_from_slice(value);
            }
            self
        }

        fn finish(self) -> Vec<u8> {
            let mut out = vec![14u8, 0x10];
            out.extend_from_slice(&2100u16.to_le_bytes());
            out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
            out.extend_from_slice(b".FIT");
            let header_crc = crc16(&out);
            out.extend_from_slice(&header_crc.to_le_bytes());
            out.extend_from_slice(&self.data);
            let file_crc = crc16(&out);
            out.extend_from_slice(&file_crc.to_le_bytes());
            out
        }
    }

    fn session_bytes() -> Vec<u8> {
        let start = fit_time(datetime!(2023-01-01 00:00:00 UTC));
        FitBytes::default()
            .message(
                0,
                SESSION,
                &[
                    (2, UINT32, start.to_le_bytes().to_vec()),
                    (7, UINT32, 3_600_500u32.to_le_bytes().to_vec()),
                    (9, UINT32, 1_050_000u32.to_le_bytes().to_vec()),
                    (16, UINT8, vec![142]),
                    (17, UINT8, vec![181]),
                    (5, ENUM, vec![1]),
                    (6, ENUM, vec![0]),
                ],
            )
            .finish()
    }

    fn records_bytes() -> Vec<u8> {
        let later = fit_time(datetime!(2023-06-01 00:30:00 UTC));
        let first = fit_time(datetime!(2023-06-01 00:00:00 UTC));
        let mut fit = FitBytes::default();
        for ts in [later, first] {
            fit = fit.message(0, RECORD, &[(253, UINT32, ts.to_le_bytes().to_vec()), (3, UINT8, vec![95])]);
        }
        fit.finish()
    }

    fn decode_bytes(bytes: &[u8]) -> Result<Vec<TypedMessage>> {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("activity.fit");
        std::fs::write(&path, bytes).unwrap();
        FitDecoder.decode(&path)
    }

    #[test]
    fn session_fields_are_mapped() {
        let msgs = decode_bytes(&session_bytes()).unwrap();
        assert!(msgs.iter().any(|m| m.kind == "session"));

        let rows = summarize(&msgs, "a.fit");
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.start_time, Some(datetime!(2023-01-01 00:00:00 UTC)));
        assert_eq!(r.total_time_sec, Some(3600.5));
        assert_eq!(r.distance_km, Some(10.5));
        assert_eq!(r.avg_hr, Some(142));
        assert_eq!(r.max_hr, Some(181));
        assert_eq!(r.sport.as_deref(), Some("running"));
        assert_eq!(r.sub_sport.as_deref(), Some("generic"));
    }

    #[test]
    fn records_only_file_uses_earliest_sample() {
        let msgs = decode_bytes(&records_bytes()).unwrap();
        assert_eq!(msgs.iter().filter(|m| m.kind == "record").count(), 2);

        let rows = summarize(&msgs, "b.fit");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start_time, Some(datetime!(2023-06-01 00:00:00 UTC)));
        assert_eq!(rows[0].total_time_sec, None);
    }

    #[test]
    fn bad_checksums_are_tolerated() {
        let mut bytes = session_bytes();
        let n = bytes.len();
        bytes[n - 1] ^= 0xFF;
        bytes[12] ^= 0xFF;
        let rows = summarize(&decode_bytes(&bytes).unwrap(), "c.fit");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start_time, Some(datetime!(2023-01-01 00:00:00 UTC)));
    }

    #[test]
    fn non_fit_bytes_fail() {
        assert!(decode_bytes(b"definitely not a fit file").is_err());
    }
}
