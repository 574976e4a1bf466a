//! Sensor readings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::timestamp::format_timestamp;

/// One timestamped sensor measurement.
///
/// Readings are immutable once written; the value's shape depends on the
/// sensor kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Storage row id; insertion order.
    pub id: i64,
    pub sensor_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub value: Value,
}

/// The semi-structured payload stored with every reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingPayload {
    /// `YYYY-MM-DDTHH:MM:SS`, UTC.
    pub timestamp: String,
    pub value: Value,
}

impl ReadingPayload {
    /// Build the payload for a value captured at `at`.
    pub fn new(at: OffsetDateTime, value: Value) -> Self {
        Self {
            timestamp: format_timestamp(at),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn test_payload_shape() {
        let payload = ReadingPayload::new(datetime!(2023-01-01 12:00:00.5 UTC), json!({"t": 21.5}));
        let encoded = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            encoded,
            json!({"timestamp": "2023-01-01T12:00:00", "value": {"t": 21.5}})
        );
    }
}
