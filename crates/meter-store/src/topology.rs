//! Topology tables: objects, controllers and sensors.

use rusqlite::{Connection, OptionalExtension, Row, params};
use time::{Date, OffsetDateTime};
use tracing::debug;

use meter_types::{
    ControllerRecord, ObjectRecord, Record, SensorKind, SensorRecord, format_date, parse_date,
};

use crate::error::{Error, Result, insert_error};
use crate::store::Store;

/// A record kind backed by its own topology table.
///
/// Writes are column-scoped: `overwrite` sets exactly the columns the remote
/// snapshot carries, so local-only columns survive reconciliation.
pub trait TopologyTable: Record {
    /// Table name.
    const TABLE: &'static str;

    /// Load every row, ordered by id.
    fn load_all(conn: &Connection) -> rusqlite::Result<Vec<Self>>;

    /// Insert as a new row.
    fn insert(&self, conn: &Connection) -> rusqlite::Result<()>;

    /// Overwrite the snapshot columns of the row with this id.
    fn overwrite(&self, conn: &Connection) -> rusqlite::Result<usize>;

    /// Delete the row with this id.
    fn delete(conn: &Connection, id: i64) -> rusqlite::Result<usize> {
        conn.execute(&format!("DELETE FROM {} WHERE id = ?1", Self::TABLE), [id])
    }
}

fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Date>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => parse_date(&text).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
        None => Ok(None),
    }
}

fn object_from_row(row: &Row<'_>) -> rusqlite::Result<ObjectRecord> {
    Ok(ObjectRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        user_id: row.get(2)?,
    })
}

fn controller_from_row(row: &Row<'_>) -> rusqlite::Result<ControllerRecord> {
    Ok(ControllerRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        object_id: row.get(2)?,
        meta: row.get(3)?,
        activation_date: date_column(row, 4)?,
        status: row.get(5)?,
        mac: row.get(6)?,
        deactivation_date: row.get(7)?,
        controller_type: row.get(8)?,
    })
}

fn sensor_from_row(row: &Row<'_>) -> rusqlite::Result<SensorRecord> {
    Ok(SensorRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        status: row.get(2)?,
        kind: SensorKind::from_code(row.get(3)?),
        controller_id: row.get(4)?,
    })
}

const OBJECT_COLUMNS: &str = "id, name, user_id";
const CONTROLLER_COLUMNS: &str = "id, name, object_id, meta, activation_date, status, mac, \
     deactivation_date, controller_type";
const SENSOR_COLUMNS: &str = "id, name, status, sensor_type, controller_id";

impl TopologyTable for ObjectRecord {
    const TABLE: &'static str = "objects";

    fn load_all(conn: &Connection) -> rusqlite::Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {OBJECT_COLUMNS} FROM objects ORDER BY id"))?;
        let rows = stmt
            .query_map([], object_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO objects (id, name, user_id) VALUES (?1, ?2, ?3)",
            params![self.id, self.name, self.user_id],
        )?;
        Ok(())
    }

    fn overwrite(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE objects SET name = ?2, user_id = ?3 WHERE id = ?1",
            params![self.id, self.name, self.user_id],
        )
    }
}

impl TopologyTable for ControllerRecord {
    const TABLE: &'static str = "controllers";

    fn load_all(conn: &Connection) -> rusqlite::Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONTROLLER_COLUMNS} FROM controllers ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], controller_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO controllers (id, name, object_id, meta, activation_date, status, mac,
             deactivation_date, controller_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                self.id,
                self.name,
                self.object_id,
                self.meta,
                self.activation_date.map(format_date),
                self.status,
                self.mac,
                self.deactivation_date,
                self.controller_type,
            ],
        )?;
        Ok(())
    }

    fn overwrite(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE controllers SET name = ?2, object_id = ?3, meta = ?4, activation_date = ?5,
             status = ?6, mac = ?7, deactivation_date = ?8, controller_type = ?9
             WHERE id = ?1",
            params![
                self.id,
                self.name,
                self.object_id,
                self.meta,
                self.activation_date.map(format_date),
                self.status,
                self.mac,
                self.deactivation_date,
                self.controller_type,
            ],
        )
    }
}

impl TopologyTable for SensorRecord {
    const TABLE: &'static str = "sensors";

    fn load_all(conn: &Connection) -> rusqlite::Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!("SELECT {SENSOR_COLUMNS} FROM sensors ORDER BY id"))?;
        let rows = stmt
            .query_map([], sensor_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO sensors (id, name, status, sensor_type, controller_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.id,
                self.name,
                self.status,
                self.kind.code(),
                self.controller_id
            ],
        )?;
        Ok(())
    }

    fn overwrite(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE sensors SET name = ?2, status = ?3, sensor_type = ?4, controller_id = ?5
             WHERE id = ?1",
            params![
                self.id,
                self.name,
                self.status,
                self.kind.code(),
                self.controller_id
            ],
        )
    }
}

// Lookups
impl Store {
    /// Get an object by id.
    pub fn get_object(&self, id: i64) -> Result<ObjectRecord> {
        self.conn
            .query_row(
                &format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE id = ?1"),
                [id],
                object_from_row,
            )
            .optional()?
            .ok_or(Error::NotFound {
                kind: ObjectRecord::KIND,
                id,
            })
    }

    /// Get a controller by id.
    pub fn get_controller(&self, id: i64) -> Result<ControllerRecord> {
        self.conn
            .query_row(
                &format!("SELECT {CONTROLLER_COLUMNS} FROM controllers WHERE id = ?1"),
                [id],
                controller_from_row,
            )
            .optional()?
            .ok_or(Error::NotFound {
                kind: ControllerRecord::KIND,
                id,
            })
    }

    /// Get a sensor by id.
    pub fn get_sensor(&self, id: i64) -> Result<SensorRecord> {
        self.conn
            .query_row(
                &format!("SELECT {SENSOR_COLUMNS} FROM sensors WHERE id = ?1"),
                [id],
                sensor_from_row,
            )
            .optional()?
            .ok_or(Error::NotFound {
                kind: SensorRecord::KIND,
                id,
            })
    }

    /// List all objects, ordered by id.
    pub fn list_objects(&self) -> Result<Vec<ObjectRecord>> {
        Ok(ObjectRecord::load_all(&self.conn)?)
    }

    /// List all controllers, ordered by id.
    pub fn list_controllers(&self) -> Result<Vec<ControllerRecord>> {
        Ok(ControllerRecord::load_all(&self.conn)?)
    }

    /// List all sensors, ordered by id.
    pub fn list_sensors(&self) -> Result<Vec<SensorRecord>> {
        Ok(SensorRecord::load_all(&self.conn)?)
    }

    /// Sensors owned by a controller, ordered by id.
    pub fn sensors_for_controller(&self, controller_id: i64) -> Result<Vec<SensorRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SENSOR_COLUMNS} FROM sensors WHERE controller_id = ?1 ORDER BY id"
        ))?;
        let sensors = stmt
            .query_map([controller_id], sensor_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sensors)
    }
}

// Direct CRUD
impl Store {
    /// Insert a new object. Fails with `AlreadyExists` on an id collision.
    pub fn create_object(&self, object: &ObjectRecord) -> Result<()> {
        object
            .insert(&self.conn)
            .map_err(|e| insert_error(e, ObjectRecord::KIND, object.id))
    }

    /// Insert a new controller. Fails with `AlreadyExists` on an id collision.
    pub fn create_controller(&self, controller: &ControllerRecord) -> Result<()> {
        controller
            .insert(&self.conn)
            .map_err(|e| insert_error(e, ControllerRecord::KIND, controller.id))
    }

    /// Insert a new sensor. Fails with `AlreadyExists` on an id collision.
    pub fn create_sensor(&self, sensor: &SensorRecord) -> Result<()> {
        sensor
            .insert(&self.conn)
            .map_err(|e| insert_error(e, SensorRecord::KIND, sensor.id))
    }

    /// Register a sensor reported by local hardware, or update it if known.
    ///
    /// A new sensor without a name gets its kind's default name (`OBD`,
    /// `GPS`) or `Sensor <id>`, and is stamped with today's activation date.
    /// An existing sensor keeps its name unless one is given.
    pub fn register_sensor(
        &self,
        id: i64,
        name: Option<&str>,
        kind: SensorKind,
        controller_id: Option<i64>,
    ) -> Result<SensorRecord> {
        match self.get_sensor(id) {
            Ok(existing) => {
                let updated = SensorRecord {
                    name: name.map(str::to_string).unwrap_or(existing.name),
                    kind,
                    controller_id,
                    ..existing
                };
                updated.overwrite(&self.conn)?;
                debug!("Updated sensor {}", id);
                Ok(updated)
            }
            Err(Error::NotFound { .. }) => {
                let name = name
                    .map(str::to_string)
                    .or_else(|| kind.default_name().map(str::to_string))
                    .unwrap_or_else(|| format!("Sensor {}", id));
                let sensor = SensorRecord {
                    id,
                    name,
                    status: None,
                    kind,
                    controller_id,
                };
                self.create_sensor(&sensor)?;
                self.conn.execute(
                    "UPDATE sensors SET activation_date = ?2 WHERE id = ?1",
                    params![id, format_date(OffsetDateTime::now_utc().date())],
                )?;
                debug!("Registered sensor {} ({})", id, sensor.name);
                Ok(sensor)
            }
            Err(e) => Err(e),
        }
    }

    /// Local-only activation date of a sensor, set at registration.
    pub fn sensor_activation_date(&self, id: i64) -> Result<Option<Date>> {
        self.conn
            .query_row(
                "SELECT activation_date FROM sensors WHERE id = ?1",
                [id],
                |row| date_column(row, 0),
            )
            .optional()?
            .ok_or(Error::NotFound {
                kind: SensorRecord::KIND,
                id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn controller(id: i64, mac: Option<&str>) -> ControllerRecord {
        ControllerRecord {
            id,
            name: format!("ctrl-{id}"),
            object_id: Some(1),
            meta: None,
            activation_date: Some(date!(2020 - 01 - 15)),
            status: Some(1),
            mac: mac.map(str::to_string),
            deactivation_date: None,
            controller_type: Some(1),
        }
    }

    #[test]
    fn test_get_missing_returns_not_found() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.get_object(42),
            Err(Error::NotFound { kind: "object", id: 42 })
        ));
        assert!(matches!(store.get_sensor(1), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_create_duplicate_returns_already_exists() {
        let store = Store::open_in_memory().unwrap();
        let object = ObjectRecord {
            id: 1,
            name: "Home".to_string(),
            user_id: Some(7),
        };
        store.create_object(&object).unwrap();

        let err = store.create_object(&object).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { kind: "object", id: 1 }));
        assert_eq!(store.get_object(1).unwrap(), object);
    }

    #[test]
    fn test_controller_round_trips_dates() {
        let store = Store::open_in_memory().unwrap();
        let ctrl = controller(5, Some("b8:27:eb:01:02:03"));
        store.create_controller(&ctrl).unwrap();
        assert_eq!(store.get_controller(5).unwrap(), ctrl);
    }

    #[test]
    fn test_sensors_for_controller() {
        let store = Store::open_in_memory().unwrap();
        for (id, ctrl) in [(1, 10), (2, 11), (3, 10)] {
            store
                .create_sensor(&SensorRecord {
                    id,
                    name: format!("s{id}"),
                    status: None,
                    kind: SensorKind::Other(1),
                    controller_id: Some(ctrl),
                })
                .unwrap();
        }

        let ids: Vec<i64> = store
            .sensors_for_controller(10)
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_register_sensor_default_names() {
        let store = Store::open_in_memory().unwrap();

        let obd = store.register_sensor(1, None, SensorKind::Obd, Some(1)).unwrap();
        let gps = store.register_sensor(2, None, SensorKind::Gps, Some(1)).unwrap();
        let other = store.register_sensor(3, None, SensorKind::Other(9), None).unwrap();

        assert_eq!(obd.name, "OBD");
        assert_eq!(gps.name, "GPS");
        assert_eq!(other.name, "Sensor 3");
        assert!(store.sensor_activation_date(1).unwrap().is_some());
    }

    #[test]
    fn test_register_existing_sensor_keeps_name() {
        let store = Store::open_in_memory().unwrap();
        store.register_sensor(1, Some("engine"), SensorKind::Obd, Some(1)).unwrap();

        let updated = store.register_sensor(1, None, SensorKind::Obd, Some(2)).unwrap();
        assert_eq!(updated.name, "engine");
        assert_eq!(store.get_sensor(1).unwrap().controller_id, Some(2));
    }
}
