//! Wire timestamps
//!
//! Result timestamps are wall-clock UTC with microseconds, e.g.
//! `2024/03/01 12:00:00.250000`. Parsing accepts any fraction length or none.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Format used when writing timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.6f";

const PARSE_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.f";

/// Render a timestamp in wire format
pub fn format(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a wire timestamp
pub fn parse(value: &str) -> ProtocolResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, PARSE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| ProtocolError::InvalidTimestamp {
            value: value.to_string(),
        })
}

/// serde adapter for `#[serde(with = "timestamp")]`
pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(ts))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
}
