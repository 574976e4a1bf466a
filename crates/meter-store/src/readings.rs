//! Reading write path and time-range queries.
//!
//! Each reading is stored as a JSON payload `{"timestamp": ..., "value": ...}`.
//! Time filters compare the embedded timestamp as a date via SQLite's
//! `datetime()`, so rows with an unparseable timestamp never match a range.

use rusqlite::{OptionalExtension, params};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{debug, warn};

use meter_types::{Reading, ReadingPayload, TimeRange, format_timestamp, parse_timestamp};

use crate::error::{Error, Result};
use crate::models::SensorWithValue;
use crate::queries::ReadingQuery;
use crate::store::Store;

const TIMESTAMP_EXPR: &str = "datetime(json_extract(data, '$.timestamp'))";

fn decode_row(id: i64, sensor_id: i64, data: &str) -> Option<Reading> {
    let payload: ReadingPayload = match serde_json::from_str(data) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Skipping reading {} with malformed payload: {}", id, e);
            return None;
        }
    };
    match parse_timestamp(&payload.timestamp) {
        Ok(timestamp) => Some(Reading {
            id,
            sensor_id,
            timestamp,
            value: payload.value,
        }),
        Err(e) => {
            warn!("Skipping reading {}: {}", id, e);
            None
        }
    }
}

impl Store {
    /// Store a reading captured at `at`. Returns the new row id.
    pub fn insert_reading(&self, sensor_id: i64, at: OffsetDateTime, value: Value) -> Result<i64> {
        let payload = ReadingPayload::new(at, value);
        self.conn.execute(
            "INSERT INTO sensor_data (sensor_id, data) VALUES (?1, ?2)",
            params![sensor_id, serde_json::to_string(&payload)?],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Readings of `sensor_id` whose timestamp lies in `range`, both bounds
    /// inclusive, in storage order.
    pub fn readings_in_range(&self, sensor_id: i64, range: TimeRange) -> Result<Vec<Reading>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, sensor_id, data FROM sensor_data
             WHERE sensor_id = ?1
               AND {TIMESTAMP_EXPR} >= datetime(?2)
               AND {TIMESTAMP_EXPR} <= datetime(?3)
             ORDER BY id"
        ))?;

        let rows = stmt
            .query_map(
                params![
                    sensor_id,
                    format_timestamp(range.start),
                    format_timestamp(range.end)
                ],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let readings: Vec<Reading> = rows
            .iter()
            .filter_map(|(id, sensor, data)| decode_row(*id, *sensor, data))
            .collect();

        debug!(
            "Sensor {}: {} readings in [{}, {}]",
            sensor_id,
            readings.len(),
            format_timestamp(range.start),
            format_timestamp(range.end)
        );
        Ok(readings)
    }

    /// Earliest reading timestamp of a sensor, regardless of insertion order.
    pub fn first_reading_timestamp(&self, sensor_id: i64) -> Result<Option<OffsetDateTime>> {
        let first: Option<String> = self.conn.query_row(
            &format!(
                "SELECT strftime('%Y-%m-%dT%H:%M:%S', MIN({TIMESTAMP_EXPR}))
                 FROM sensor_data WHERE sensor_id = ?1"
            ),
            [sensor_id],
            |row| row.get(0),
        )?;

        first
            .map(|text| parse_timestamp(&text).map_err(|_| Error::InvalidTimestamp(text)))
            .transpose()
    }

    /// Value of the most recently inserted reading of a sensor.
    ///
    /// A malformed latest payload is logged and reported as no value.
    pub fn latest_reading_value(&self, sensor_id: i64) -> Result<Option<Value>> {
        let row: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT id, data FROM sensor_data WHERE sensor_id = ?1 ORDER BY id DESC LIMIT 1",
                [sensor_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, data)) = row else {
            return Ok(None);
        };
        match serde_json::from_str::<ReadingPayload>(&data) {
            Ok(payload) => Ok(Some(payload.value)),
            Err(e) => {
                warn!("Ignoring reading {} with malformed payload: {}", id, e);
                Ok(None)
            }
        }
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<Reading>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let decoded = rows
            .iter()
            .filter_map(|(id, sensor, data)| decode_row(*id, *sensor, data));

        let Some(field) = &query.field else {
            return Ok(decoded.collect());
        };

        let projected = decoded.filter_map(|mut reading| {
            let picked = reading.value.get(field).filter(|v| !v.is_null())?.clone();
            let mut map = Map::new();
            map.insert(field.clone(), picked);
            reading.value = Value::Object(map);
            Some(reading)
        });

        Ok(match query.limit {
            Some(limit) => projected.take(limit as usize).collect(),
            None => projected.collect(),
        })
    }

    /// Count readings of a sensor.
    pub fn count_readings(&self, sensor_id: i64) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sensor_data WHERE sensor_id = ?1",
            [sensor_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Every sensor with the value of its latest reading, for status display.
    pub fn sensors_with_last_value(&self) -> Result<Vec<SensorWithValue>> {
        self.list_sensors()?
            .iter()
            .map(|sensor| -> Result<SensorWithValue> {
                let last = self.latest_reading_value(sensor.id)?;
                Ok(SensorWithValue::new(sensor, last))
            })
            .collect()
    }
}
