//! Timestamp and date formats shared by the store and the backup pipeline.
//!
//! Readings carry their timestamp as a string inside the payload, always in
//! `YYYY-MM-DDTHH:MM:SS` form and always UTC. Topology dates use `YYYY-MM-DD`.

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::error::{ParseError, ParseResult};

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Parse a reading timestamp (`YYYY-MM-DDTHH:MM:SS`, UTC).
pub fn parse_timestamp(text: &str) -> ParseResult<OffsetDateTime> {
    PrimitiveDateTime::parse(text.trim(), TIMESTAMP_FORMAT)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| ParseError::InvalidTimestamp(text.to_string()))
}

/// Format an instant as a reading timestamp, normalized to UTC and truncated
/// to whole seconds.
pub fn format_timestamp(at: OffsetDateTime) -> String {
    // Every component of the description is present, so formatting is total.
    at.to_offset(UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
        .unwrap_or_default()
}

/// Parse a topology date (`YYYY-MM-DD`).
pub fn parse_date(text: &str) -> ParseResult<Date> {
    Date::parse(text.trim(), DATE_FORMAT)
        .map_err(|_| ParseError::InvalidTimestamp(text.to_string()))
}

/// Format a topology date as `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    date.format(DATE_FORMAT).unwrap_or_default()
}

/// Drop sub-second precision and normalize to UTC.
pub fn truncate_to_second(at: OffsetDateTime) -> OffsetDateTime {
    let at = at.to_offset(UtcOffset::UTC);
    at - Duration::nanoseconds(i64::from(at.nanosecond()))
}

/// An inclusive time range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl TimeRange {
    /// Create a range; both bounds are inclusive.
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Self {
        Self { start, end }
    }

    /// A range covering exactly one instant.
    pub fn instant(at: OffsetDateTime) -> Self {
        Self { start: at, end: at }
    }

    /// Whether `at` falls within the range, bounds included.
    pub fn contains(&self, at: OffsetDateTime) -> bool {
        self.start <= at && at <= self.end
    }

    /// Whether the range is empty (start after end).
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}
