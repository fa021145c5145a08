//! Time normalization.
//!
//! Every instant handled by the engine is a `DateTime<Utc>`. Local wall-clock
//! values are converted once, at the boundary, and all comparisons are done on
//! absolute instants so DST transitions never move a match in or out of a
//! tolerance window.

use crate::error::{DeepScanError, Result};
use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use lazy_static::lazy_static;
use regex::Regex;
use std::time::{SystemTime, UNIX_EPOCH};

lazy_static! {
    static ref EPOCH_DIGITS: Regex = Regex::new(r"^(?:\d{10}|\d{13})$").unwrap();
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Convert a local wall-clock time in `zone` to UTC.
///
/// Ambiguous local times (the repeated hour when clocks fall back) resolve to
/// the earlier instant. Local times inside a spring-forward gap do not exist
/// and are rejected.
pub fn to_utc(local: NaiveDateTime, zone: Tz) -> Result<DateTime<Utc>> {
    let resolved = match zone.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            return Err(DeepScanError::InvalidTimestamp(format!(
                "{} does not exist in {}",
                local,
                zone.name()
            )))
        }
    };
    reject_pre_epoch(resolved.with_timezone(&Utc))
}

/// True when `a` and `b` are at most `tolerance` apart.
pub fn within_tolerance(a: DateTime<Utc>, b: DateTime<Utc>, tolerance: Duration) -> bool {
    if tolerance < Duration::zero() {
        return false;
    }
    (a - b).abs() <= tolerance
}

/// Signed distance from `reference` to `other`.
pub fn delta(reference: DateTime<Utc>, other: DateTime<Utc>) -> Duration {
    other - reference
}

pub fn from_unix_seconds(secs: i64) -> Result<DateTime<Utc>> {
    if secs < 0 {
        return Err(DeepScanError::InvalidTimestamp(format!(
            "pre-epoch seconds value {}",
            secs
        )));
    }
    DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| {
        DeepScanError::InvalidTimestamp(format!("seconds value {} out of range", secs))
    })
}

pub fn from_unix_millis(millis: i64) -> Result<DateTime<Utc>> {
    if millis < 0 {
        return Err(DeepScanError::InvalidTimestamp(format!(
            "pre-epoch millisecond value {}",
            millis
        )));
    }
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        DeepScanError::InvalidTimestamp(format!("millisecond value {} out of range", millis))
    })
}

/// Filesystem timestamps before 1970 are not representable as match instants.
pub fn system_time_to_utc(time: SystemTime) -> Result<DateTime<Utc>> {
    let since_epoch = time
        .duration_since(UNIX_EPOCH)
        .map_err(|_| DeepScanError::InvalidTimestamp("pre-epoch file time".to_string()))?;
    let secs = i64::try_from(since_epoch.as_secs())
        .map_err(|_| DeepScanError::InvalidTimestamp("file time out of range".to_string()))?;
    DateTime::<Utc>::from_timestamp(secs, since_epoch.subsec_nanos())
        .ok_or_else(|| DeepScanError::InvalidTimestamp("file time out of range".to_string()))
}

/// Parse a timestamp string as produced by artifact extractors.
///
/// Accepted forms: RFC 3339 (offset carried in the string), naive
/// `YYYY-MM-DD[T ]HH:MM:SS[.fff]` interpreted in `zone`, 10-digit epoch
/// seconds and 13-digit epoch milliseconds.
pub fn parse_timestamp(text: &str, zone: Tz) -> Result<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DeepScanError::InvalidTimestamp("empty timestamp".to_string()));
    }

    if EPOCH_DIGITS.is_match(trimmed) {
        let value: i64 = trimmed
            .parse()
            .map_err(|e| DeepScanError::InvalidTimestamp(format!("{}: {}", trimmed, e)))?;
        return if trimmed.len() == 13 {
            from_unix_millis(value)
        } else {
            from_unix_seconds(value)
        };
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return reject_pre_epoch(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return to_utc(naive, zone);
        }
    }

    Err(DeepScanError::InvalidTimestamp(format!(
        "unrecognized timestamp '{}'",
        trimmed
    )))
}

/// Parse an IANA zone name such as `Asia/Seoul`.
pub fn parse_zone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| DeepScanError::InvalidArgument(format!("unknown time zone '{}': {}", name, e)))
}

fn reject_pre_epoch(dt: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if dt.timestamp() < 0 {
        return Err(DeepScanError::InvalidTimestamp(format!("{} is before the epoch", dt)));
    }
    Ok(dt)
}
