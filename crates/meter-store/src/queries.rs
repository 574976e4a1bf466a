//! Query builder for sensor readings.
//!
//! # Example
//!
//! ```
//! use meter_store::{Store, ReadingQuery};
//!
//! let store = Store::open_in_memory()?;
//!
//! // Readings strictly after a point in time, projected to one value field
//! let query = ReadingQuery::new(17)
//!     .from_raw("2023-01-01T00:00:00")
//!     .field("speed");
//! let readings = store.query_readings(&query)?;
//! assert!(readings.is_empty());
//! # Ok::<(), meter_store::Error>(())
//! ```

use time::OffsetDateTime;
use tracing::warn;

use meter_types::{format_timestamp, parse_timestamp};

/// Field alias accepted for the reading timestamp.
const TIMESTAMP_ALIAS: &str = "time_stamp";

/// Fluent query builder for one sensor's readings.
///
/// Results are ordered by storage order (insertion).
#[derive(Debug, Clone)]
pub struct ReadingQuery {
    /// Sensor whose readings are returned.
    pub sensor_id: i64,
    /// Only readings strictly after this time.
    pub from: Option<OffsetDateTime>,
    /// Only readings whose value carries this key, projected to it.
    pub field: Option<String>,
    /// Maximum number of results.
    pub limit: Option<u32>,
}

impl ReadingQuery {
    /// Query every reading of `sensor_id`.
    pub fn new(sensor_id: i64) -> Self {
        Self {
            sensor_id,
            from: None,
            field: None,
            limit: None,
        }
    }

    /// Only return readings strictly after `time`.
    pub fn from(mut self, time: OffsetDateTime) -> Self {
        self.from = Some(time);
        self
    }

    /// Parse a `YYYY-MM-DDTHH:MM:SS` lower bound supplied by a user.
    ///
    /// A malformed value is logged and ignored: the query then has no lower
    /// bound.
    pub fn from_raw(mut self, text: &str) -> Self {
        match parse_timestamp(text) {
            Ok(time) => self.from = Some(time),
            Err(e) => {
                warn!(
                    "Ignoring 'from' filter: {}; expected YYYY-MM-DDTHH:MM:SS",
                    e
                );
                self.from = None;
            }
        }
        self
    }

    /// Keep only readings whose value has `name`, projecting the value down to
    /// `{name: value[name]}`. `time_stamp` is accepted for `timestamp`.
    pub fn field(mut self, name: &str) -> Self {
        let name = if name == TIMESTAMP_ALIAS {
            "timestamp"
        } else {
            name
        };
        self.field = Some(name.to_string());
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = vec!["sensor_id = ?"];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(self.sensor_id)];

        if let Some(from) = self.from {
            conditions.push("datetime(json_extract(data, '$.timestamp')) > datetime(?)");
            params.push(Box::new(format_timestamp(from)));
        }

        (format!("WHERE {}", conditions.join(" AND ")), params)
    }

    /// Build the full SQL query.
    ///
    /// The field filter is applied after decoding, so `LIMIT` is only pushed
    /// into SQL when no field filter is set.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let mut sql = format!(
            "SELECT id, sensor_id, data FROM sensor_data {} ORDER BY id",
            where_clause
        );

        if let (Some(limit), None) = (self.limit, &self.field) {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        sql
    }
}
