//! Timestamp recognition for allowlisted fields.
//!
//! The API reports times as unix epochs (seconds, occasionally milliseconds)
//! and a few endpoints as ISO-8601 text. Epoch `0` means "not set".

use super::types::Scalar;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Epoch values at or above this are milliseconds (10^11 s is year 5138)
pub const MILLIS_THRESHOLD: i64 = 100_000_000_000;

static EPOCH_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d{1,16}$").unwrap());

static ISO_DATETIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?$").unwrap()
});

static ISO_DATE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Interpret `value` as a timestamp. Returns `None` when it does not look
/// like one, in which case the caller keeps the original value.
pub fn to_timestamp(value: &Scalar) -> Option<Scalar> {
    match value {
        Scalar::Number(n) => {
            if let Some(epoch) = n.as_i64() {
                from_epoch(epoch)
            } else {
                n.as_f64().and_then(from_epoch_f64)
            }
        }
        Scalar::String(s) => parse_str(s.trim()),
        _ => None,
    }
}

fn from_epoch(epoch: i64) -> Option<Scalar> {
    if epoch == 0 {
        return Some(Scalar::Null);
    }
    let ts = if epoch.unsigned_abs() >= MILLIS_THRESHOLD.unsigned_abs() {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    };
    ts.map(Scalar::Timestamp)
}

fn from_epoch_f64(epoch: f64) -> Option<Scalar> {
    if !epoch.is_finite() {
        return None;
    }
    if epoch == 0.0 {
        return Some(Scalar::Null);
    }
    let millis = if epoch.abs() >= MILLIS_THRESHOLD as f64 {
        epoch
    } else {
        epoch * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64).map(Scalar::Timestamp)
}

fn parse_str(s: &str) -> Option<Scalar> {
    let len = s.len();
    if len == 0 {
        return None;
    }

    if EPOCH_REGEX.is_match(s) {
        return s.parse::<i64>().ok().and_then(from_epoch);
    }

    if len == 10 && ISO_DATE_REGEX.is_match(s) {
        return NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| Scalar::Timestamp(dt.and_utc()));
    }

    if len >= 19 && ISO_DATETIME_REGEX.is_match(s) {
        return parse_datetime(s).map(Scalar::Timestamp);
    }

    None
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let normalized = s.replacen(' ', "T", 1);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.with_timezone(&Utc));
    }
    // Offsets written without a colon, e.g. +0000
    if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    // No offset: read as UTC
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc())
}
