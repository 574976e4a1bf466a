//! Local data persistence for meter4 topology and sensor readings.
//!
//! This crate provides SQLite-based storage for the device topology mirrored
//! from the remote service, the sensor readings written by ingestion, and the
//! per-user settings that drive encrypted backup.
//!
//! # Features
//!
//! - Transactional reconciliation of objects, controllers and sensors
//! - Time-range queries over readings with an embedded JSON timestamp
//! - Per-user encryption keys and linked backup destinations
//!
//! # Example
//!
//! ```no_run
//! use meter_store::{Store, TimeRange};
//! use time::macros::datetime;
//!
//! let store = Store::open_default()?;
//!
//! let day = TimeRange::new(
//!     datetime!(2023-01-02 00:00:00 UTC),
//!     datetime!(2023-01-02 23:59:59 UTC),
//! );
//! let readings = store.readings_in_range(17, day)?;
//! # Ok::<(), meter_store::Error>(())
//! ```

mod error;
mod keys;
mod models;
mod queries;
mod readings;
mod reconcile;
mod schema;
mod store;
mod topology;

pub use error::{Error, Result};
pub use meter_types::TimeRange;
pub use models::{DestinationSpec, EncryptionKey, SensorWithValue};
pub use queries::ReadingQuery;
pub use reconcile::{ReconcilePlan, ReconcileStats, TopologyReport, plan};
pub use store::Store;
pub use topology::TopologyTable;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/meter4/data.db`
/// - macOS: `~/Library/Application Support/meter4/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\meter4\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("meter4")
        .join("data.db")
}
