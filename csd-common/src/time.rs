//! Timestamp helpers
//!
//! All persisted timestamps are UTC RFC 3339 strings with microsecond
//! precision and a `Z` suffix, so lexical order equals chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Error, Result};

/// Current time formatted for storage
pub fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

/// Format a timestamp for storage
pub fn to_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Invalid timestamp '{}': {}", value, e)))
}
