//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Parse a backend timestamp (RFC 3339, e.g. `2024-03-01T10:00:00.123Z`)
///
/// Returns `None` for anything unparseable; callers treat that as "never".
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Seconds elapsed since `start`, clamped at zero
pub fn seconds_since(start: DateTime<Utc>) -> f64 {
    let elapsed = now().signed_duration_since(start);
    (elapsed.num_milliseconds().max(0) as f64) / 1000.0
}
