//! Database schema and migrations.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if version < SCHEMA_VERSION {
        migrate(conn, version)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Topology tables mirror the remote snapshot; `sensors.activation_date` is
/// local-only and never touched by reconciliation.
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS objects (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            user_id INTEGER
        );

        CREATE TABLE IF NOT EXISTS controllers (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            object_id INTEGER,
            meta TEXT,
            activation_date TEXT,
            status INTEGER,
            mac TEXT,
            deactivation_date TEXT,
            controller_type INTEGER
        );

        CREATE TABLE IF NOT EXISTS sensors (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            status INTEGER,
            sensor_type INTEGER NOT NULL,
            controller_id INTEGER,
            activation_date TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sensors_controller ON sensors(controller_id);

        -- Readings: JSON payload {"timestamp": "...", "value": ...}
        CREATE TABLE IF NOT EXISTS sensor_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sensor_id INTEGER NOT NULL,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sensor_data_sensor ON sensor_data(sensor_id);

        CREATE TABLE IF NOT EXISTS user_info (
            user_id INTEGER PRIMARY KEY,
            encrypt_key TEXT
        );

        CREATE TABLE IF NOT EXISTS backup_destinations (
            user_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            location TEXT NOT NULL,
            secret TEXT,
            PRIMARY KEY (user_id, kind)
        );
        "#,
    )?;

    Ok(())
}

fn migrate(conn: &Connection, old_version: i32) -> Result<()> {
    // if old_version < 2 { migrate_to_v2(conn)?; }
    let _ = old_version;
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}
