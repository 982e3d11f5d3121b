//! Core value types: stream and projection names, categories and the
//! timestamp format shared by stored events and projection locks.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use nutype::nutype;

use crate::errors::{EventStoreError, EventStoreResult};

/// The logical name of an event stream.
///
/// Stream names are non-empty and at most 255 characters. They are used
/// verbatim in the stream registry; the physical collection name is derived
/// from them by a persistence strategy.
#[nutype(
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct StreamName(String);

impl StreamName {
    /// Category of the stream: the part of the name before the first `-`.
    ///
    /// A name without a dash, or one starting with a dash, has no category.
    pub fn category(&self) -> Option<&str> {
        category_of(self.as_ref())
    }

    /// System streams start with `$` and are excluded from `from_all` projections.
    pub fn is_system(&self) -> bool {
        self.as_ref().starts_with('$')
    }
}

/// The unique name of a projection.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ProjectionName(String);

/// Derive the category of a raw stream name.
pub fn category_of(name: &str) -> Option<&str> {
    match name.find('-') {
        Some(position) if position > 0 => Some(&name[..position]),
        _ => None,
    }
}

const TIMESTAMP_WRITE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const TIMESTAMP_READ_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const WHOLE_SECOND_LENGTH: usize = 19;

/// Format a timestamp as `YYYY-MM-DDTHH:mm:ss.ffffff` (UTC, microseconds).
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_WRITE_FORMAT).to_string()
}

/// Parse a stored timestamp.
///
/// Whole-second values (`YYYY-MM-DDTHH:mm:ss`) are padded with `.000` before
/// parsing. The result is truncated to microseconds.
pub fn parse_timestamp(raw: &str) -> EventStoreResult<DateTime<Utc>> {
    let padded;
    let input = if raw.len() == WHOLE_SECOND_LENGTH {
        padded = format!("{raw}.000");
        padded.as_str()
    } else {
        raw
    };

    NaiveDateTime::parse_from_str(input, TIMESTAMP_READ_FORMAT)
        .map(|naive| naive.and_utc().trunc_subsecs(6))
        .map_err(|e| EventStoreError::Serialization(format!("invalid timestamp {raw:?}: {e}")))
}

/// The current time at microsecond precision.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
