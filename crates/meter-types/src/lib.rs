//! Shared types for meter4 topology sync and sensor backup.
//!
//! This crate holds the typed records exchanged between the remote relations
//! service, the local store and the backup pipeline.
//!
//! # Features
//!
//! - Topology records (objects, controllers, sensors) with explicit decoding
//! - Sensor readings and their stored payload shape
//! - Timestamp helpers for the `YYYY-MM-DDTHH:MM:SS` reading format
//!
//! # Example
//!
//! ```
//! use meter_types::{TopologySnapshot, parse_timestamp};
//!
//! let envelope = serde_json::json!({
//!     "msg": {"objects": [], "controllers": [], "sensors": []}
//! });
//! let snapshot = TopologySnapshot::from_envelope(&envelope)?;
//! assert!(snapshot.is_empty());
//!
//! let at = parse_timestamp("2023-01-02T00:00:00")?;
//! assert_eq!(at.year(), 2023);
//! # Ok::<(), meter_types::ParseError>(())
//! ```

pub mod error;
mod fields;
pub mod reading;
pub mod records;
pub mod timestamp;

pub use error::{ParseError, ParseResult};
pub use reading::{Reading, ReadingPayload};
pub use records::{
    ControllerRecord, ObjectRecord, Record, SensorKind, SensorRecord, TopologySnapshot,
};
pub use timestamp::{
    TimeRange, format_date, format_timestamp, parse_date, parse_timestamp, truncate_to_second,
};
