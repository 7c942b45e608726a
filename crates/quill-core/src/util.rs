//! Shared utility functions used across multiple modules.

use chrono::{DateTime, Timelike, Utc};

use crate::error::{Error, Result};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Drop sub-microsecond precision so timestamps survive a storage round trip unchanged.
pub fn truncate_to_micros(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = timestamp.nanosecond() / 1_000 * 1_000;
    timestamp.with_nanosecond(nanos).unwrap_or(timestamp)
}

/// Storage encoding for timestamps (Unix microseconds).
pub fn to_micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

/// Decode a stored Unix-microsecond timestamp.
pub fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::Database(format!("Stored timestamp out of range: {micros}")))
}

/// The lower bound used when a device has never synced.
pub const fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" phone-1 ".to_string())),
            Some("phone-1".to_string())
        );
    }

    #[test]
    fn micros_round_trip_after_truncation() {
        let precise: DateTime<Utc> = "2024-05-01T10:00:00.123456789Z".parse().unwrap();
        let truncated = truncate_to_micros(precise);
        assert_eq!(truncated.nanosecond(), 123_456_000);
        assert_eq!(from_micros(to_micros(truncated)).unwrap(), truncated);
    }
}
