//! Serialization of reading windows before encryption.

use meter_types::{Reading, format_timestamp};

use crate::error::BackupError;

/// Turns one window of readings into bytes.
pub trait Serializer: Send + Sync {
    /// File extension of the serialized form, without the dot.
    fn extension(&self) -> &'static str;

    fn serialize(&self, readings: &[Reading]) -> Result<Vec<u8>, BackupError>;
}

/// CSV with a `timestamp,value` header; `value` is the reading's JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSerializer;

impl Serializer for CsvSerializer {
    fn extension(&self) -> &'static str {
        "csv"
    }

    fn serialize(&self, readings: &[Reading]) -> Result<Vec<u8>, BackupError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["timestamp", "value"])?;
        for reading in readings {
            writer.write_record([format_timestamp(reading.timestamp), reading.value.to_string()])?;
        }
        writer
            .into_inner()
            .map_err(|e| BackupError::Serialization(csv::Error::from(e.into_error())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn test_csv_layout() {
        let readings = vec![
            Reading {
                id: 1,
                sensor_id: 3,
                timestamp: datetime!(2023-01-01 00:00:00 UTC),
                value: json!({"lat": 55.75, "lon": 37.61}),
            },
            Reading {
                id: 2,
                sensor_id: 3,
                timestamp: datetime!(2023-01-01 00:00:10 UTC),
                value: json!(42),
            },
        ];

        let bytes = CsvSerializer.serialize(&readings).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "timestamp,value");
        assert_eq!(
            lines[1],
            r#"2023-01-01T00:00:00,"{""lat"":55.75,""lon"":37.61}""#
        );
        assert_eq!(lines[2], "2023-01-01T00:00:10,42");
    }

    #[test]
    fn test_csv_reads_back() {
        let readings = vec![Reading {
            id: 1,
            sensor_id: 1,
            timestamp: datetime!(2024-02-29 23:59:59 UTC),
            value: json!({"note": "a,b\"c"}),
        }];
        let bytes = CsvSerializer.serialize(&readings).unwrap();

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "2024-02-29T23:59:59");
        let value: serde_json::Value = serde_json::from_str(&rows[0][1]).unwrap();
        assert_eq!(value, json!({"note": "a,b\"c"}));
    }
}
