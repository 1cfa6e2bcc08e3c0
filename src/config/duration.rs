//! ISO-8601 durations as used by the endpoint config (`PT15M`, `P1D`).
//!
//! Calendar units are approximated: a year is 365 days, a month 30 days.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static ISO_DURATION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$",
    )
    .unwrap()
});

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

pub fn parse_iso_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    let invalid = || Error::Config(format!("invalid ISO-8601 duration `{text}`"));

    let caps = ISO_DURATION_REGEX.captures(text).ok_or_else(invalid)?;
    if text.ends_with('T') || text == "P" {
        return Err(invalid());
    }

    let unit = |index: usize, seconds: u64| -> Result<u64> {
        match caps.get(index) {
            Some(m) => m
                .as_str()
                .parse::<u64>()
                .ok()
                .and_then(|n| n.checked_mul(seconds))
                .ok_or_else(invalid),
            None => Ok(0),
        }
    };

    let whole = [
        unit(1, 365 * DAY)?,
        unit(2, 30 * DAY)?,
        unit(3, 7 * DAY)?,
        unit(4, DAY)?,
        unit(5, HOUR)?,
        unit(6, MINUTE)?,
    ]
    .into_iter()
    .try_fold(0u64, u64::checked_add)
    .ok_or_else(invalid)?;

    let fraction = match caps.get(7) {
        Some(m) => m
            .as_str()
            .parse::<f64>()
            .ok()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .ok_or_else(invalid)?,
        None => Duration::ZERO,
    };

    let duration = Duration::from_secs(whole)
        .checked_add(fraction)
        .ok_or_else(invalid)?;
    if duration.is_zero() {
        return Err(Error::Config(format!("duration `{text}` must be greater than zero")));
    }
    Ok(duration)
}

/// Compact human form, e.g. `1h30m`, `2d`, `45s`.
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if secs == 0 {
        return format!("{}ms", duration.as_millis());
    }
    let mut out = String::new();
    for (unit, label) in [(DAY, "d"), (HOUR, "h"), (MINUTE, "m"), (1, "s")] {
        if secs >= unit {
            out.push_str(&format!("{}{}", secs / unit, label));
            secs %= unit;
        }
    }
    out
}
