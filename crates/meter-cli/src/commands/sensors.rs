//! Sensors and readings commands - inspect the local database.

use std::path::Path;

use anyhow::Result;
use meter_store::{ReadingQuery, SensorWithValue};
use meter_types::{Reading, SensorKind, format_timestamp};

use super::open_store;
use crate::cli::OutputFormat;

/// Execute the sensors command.
pub fn cmd_sensors(format: OutputFormat, database: &Path) -> Result<()> {
    let store = open_store(database)?;
    let sensors = store.sensors_with_last_value()?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sensors)?),
        OutputFormat::Text => print!("{}", format_sensors(&sensors)),
    }
    Ok(())
}

/// Arguments for the readings command.
pub struct ReadingsArgs {
    pub sensor: i64,
    pub from: Option<String>,
    pub field: Option<String>,
    pub limit: Option<u32>,
    pub format: OutputFormat,
}

/// Execute the readings command.
pub fn cmd_readings(args: ReadingsArgs, database: &Path) -> Result<()> {
    let mut query = ReadingQuery::new(args.sensor);
    if let Some(from) = &args.from {
        query = query.from_raw(from);
    }
    if let Some(field) = &args.field {
        query = query.field(field);
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }

    let store = open_store(database)?;
    let readings = store.query_readings(&query)?;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&readings)?),
        OutputFormat::Text => print!("{}", format_readings(&readings)),
    }
    Ok(())
}

fn format_sensors(sensors: &[SensorWithValue]) -> String {
    if sensors.is_empty() {
        return "No sensors; run `meter sync` first\n".to_string();
    }
    let mut out = format!(
        "{:>6}  {:<20} {:<8} {:>10}  {}\n",
        "ID", "NAME", "TYPE", "CONTROLLER", "LAST VALUE"
    );
    for sensor in sensors {
        let controller = sensor
            .controller_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let last = sensor
            .last_value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:>6}  {:<20} {:<8} {:>10}  {}\n",
            sensor.id,
            sensor.name,
            SensorKind::from_code(sensor.sensor_type).to_string(),
            controller,
            last
        ));
    }
    out
}

fn format_readings(readings: &[Reading]) -> String {
    readings
        .iter()
        .map(|r| format!("{}  {}\n", format_timestamp(r.timestamp), r.value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn test_format_sensors() {
        let sensors = vec![
            SensorWithValue {
                id: 1,
                name: "OBD".to_string(),
                sensor_type: 5,
                controller_id: Some(10),
                last_value: Some(json!({"speed": 42})),
            },
            SensorWithValue {
                id: 3,
                name: "Idle".to_string(),
                sensor_type: 9,
                controller_id: None,
                last_value: None,
            },
        ];
        let text = format_sensors(&sensors);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("OBD"));
        assert!(lines[1].ends_with(r#"{"speed":42}"#));
        assert!(lines[2].contains("type 9"));
        assert!(lines[2].ends_with('-'));

        assert!(format_sensors(&[]).starts_with("No sensors"));
    }

    #[test]
    fn test_format_readings() {
        let readings = vec![Reading {
            id: 1,
            sensor_id: 2,
            timestamp: datetime!(2023-01-02 10:00:00 UTC),
            value: json!({"lat": 55.7}),
        }];
        assert_eq!(
            format_readings(&readings),
            "2023-01-02T10:00:00  {\"lat\":55.7}\n"
        );
    }
}
