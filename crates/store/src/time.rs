//! Timestamp encoding.
//!
//! Every timestamp column holds a fixed-width RFC 3339 UTC string with
//! microseconds, so lexical order equals chronological order and SQLite's
//! date functions can still read it.

use chrono::{DateTime, SecondsFormat, Utc};

/// Encode a timestamp for storage.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time, encoded for storage.
pub fn now_ts() -> String {
    format_ts(Utc::now())
}

/// Decode a stored timestamp.
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{raw}': {e}"))
}
