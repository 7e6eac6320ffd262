//! Timestamp normalization.
//!
//! Three encodings show up across the system: remote listings use ISO-8601
//! with a `Z` suffix, Drive reports ISO-8601 (sometimes with an explicit
//! offset), and the filesystem hands back seconds since the epoch. All of
//! them are folded into a `DateTime<Utc>` before any comparison.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// A timestamp as it arrived from a source, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

impl RawTimestamp {
    pub fn normalize(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Epoch(secs) => from_epoch_seconds(*secs),
            RawTimestamp::Text(text) => parse_timestamp(text),
        }
    }
}

impl From<&str> for RawTimestamp {
    fn from(value: &str) -> Self {
        RawTimestamp::Text(value.to_string())
    }
}

impl From<f64> for RawTimestamp {
    fn from(value: f64) -> Self {
        RawTimestamp::Epoch(value)
    }
}

/// Parse any of the textual encodings: RFC 3339 (`Z` or explicit offset),
/// offset-less ISO (taken as UTC), or a bare epoch number.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    trimmed.parse::<f64>().ok().and_then(from_epoch_seconds)
}

pub fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

/// Filesystem modification times go through the epoch path.
pub fn from_system_time(time: SystemTime) -> Option<DateTime<Utc>> {
    let secs = match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    };
    RawTimestamp::Epoch(secs).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_encodings_of_one_instant_compare_equal() {
        let zulu = parse_timestamp("2024-11-29T12:00:00Z").unwrap();
        let offset = parse_timestamp("2024-11-29T12:00:00+00:00").unwrap();
        let epoch = RawTimestamp::Epoch(1732881600.0).normalize().unwrap();
        assert_eq!(zulu, offset);
        assert_eq!(offset, epoch);
    }

    #[test]
    fn non_zero_offsets_are_shifted_to_utc() {
        let local = parse_timestamp("2024-11-29T14:00:00+02:00").unwrap();
        let zulu = parse_timestamp("2024-11-29T12:00:00Z").unwrap();
        assert_eq!(local, zulu);
    }

    #[test]
    fn fractional_drive_timestamps_parse() {
        let drive = parse_timestamp("2024-11-29T12:00:00.000Z").unwrap();
        assert_eq!(drive.timestamp(), 1732881600);
    }

    #[test]
    fn offsetless_iso_is_taken_as_utc() {
        let naive = parse_timestamp("2024-11-29T12:00:00").unwrap();
        assert_eq!(naive.timestamp(), 1732881600);
    }

    #[test]
    fn numeric_strings_are_epoch_seconds() {
        assert_eq!(
            parse_timestamp("1732881600").unwrap(),
            parse_timestamp("2024-11-29T12:00:00Z").unwrap()
        );
    }

    #[test]
    fn garbage_does_not_parse() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(from_epoch_seconds(f64::NAN).is_none());
    }

    #[test]
    fn untagged_deserialization_accepts_numbers_and_strings() {
        let n: RawTimestamp = serde_json::from_str("1732881600").unwrap();
        let s: RawTimestamp = serde_json::from_str("\"2024-11-29T12:00:00Z\"").unwrap();
        assert_eq!(n.normalize(), s.normalize());
    }

    #[test]
    fn system_time_round_trips_through_epoch() {
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1732881600);
        assert_eq!(
            from_system_time(t).unwrap(),
            parse_timestamp("2024-11-29T12:00:00Z").unwrap()
        );
    }
}
