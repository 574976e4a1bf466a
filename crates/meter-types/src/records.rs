//! Topology records: objects, controllers and sensors.

use core::fmt;

use serde_json::Value;
use time::Date;

use crate::error::{ParseError, ParseResult};
use crate::fields::Fields;

/// A topology record keyed by a stable integer id.
///
/// The id is unique within a record kind and is the only key used when
/// reconciling a local collection against a remote snapshot.
pub trait Record: Clone + PartialEq + fmt::Debug {
    /// Human-readable kind, used in errors and logs.
    const KIND: &'static str;

    /// Stable identifier.
    fn id(&self) -> i64;
}

/// A monitored object (a site or a vehicle) owning controllers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub id: i64,
    pub name: String,
    pub user_id: Option<i64>,
}

impl ObjectRecord {
    /// Decode an object from its snapshot JSON. Objects carry more
    /// attributes than are mirrored here; those are ignored.
    pub fn from_json(value: &Value) -> ParseResult<Self> {
        let f = Fields::open(Self::KIND, value)?;
        Ok(Self {
            id: f.int("id")?,
            name: f.string("name")?,
            user_id: f.opt_int("user_id")?,
        })
    }
}

impl Record for ObjectRecord {
    const KIND: &'static str = "object";

    fn id(&self) -> i64 {
        self.id
    }
}

/// A hardware controller that hosts sensors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRecord {
    pub id: i64,
    pub name: String,
    pub object_id: Option<i64>,
    pub meta: Option<String>,
    pub activation_date: Option<Date>,
    pub status: Option<i64>,
    /// Hardware MAC address (or hardware id) of the controller.
    pub mac: Option<String>,
    /// Kept verbatim; the remote service does not guarantee a date layout here.
    pub deactivation_date: Option<String>,
    pub controller_type: Option<i64>,
}

impl ControllerRecord {
    const FIELDS: &'static [&'static str] = &[
        "id",
        "name",
        "object_id",
        "meta",
        "activation_date",
        "status",
        "mac",
        "deactivation_date",
        "controller_type",
    ];

    /// Decode a controller from its snapshot JSON.
    pub fn from_json(value: &Value) -> ParseResult<Self> {
        let f = Fields::new(Self::KIND, value, Self::FIELDS)?;
        Ok(Self {
            id: f.int("id")?,
            name: f.string("name")?,
            object_id: f.opt_int("object_id")?,
            meta: f.opt_string("meta")?,
            activation_date: f.opt_date("activation_date")?,
            status: f.opt_int("status")?,
            mac: f.opt_string("mac")?,
            deactivation_date: f.opt_string("deactivation_date")?,
            controller_type: f.opt_int("controller_type")?,
        })
    }
}

impl Record for ControllerRecord {
    const KIND: &'static str = "controller";

    fn id(&self) -> i64 {
        self.id
    }
}

/// Kind of sensor, as reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// On-board diagnostics adapter.
    Obd,
    /// GPS receiver.
    Gps,
    /// Any other numeric kind.
    Other(i64),
}

impl SensorKind {
    /// Map the wire code to a kind.
    pub fn from_code(code: i64) -> Self {
        match code {
            5 => SensorKind::Obd,
            6 => SensorKind::Gps,
            other => SensorKind::Other(other),
        }
    }

    /// Wire code for this kind.
    pub fn code(self) -> i64 {
        match self {
            SensorKind::Obd => 5,
            SensorKind::Gps => 6,
            SensorKind::Other(code) => code,
        }
    }

    /// Name given to a sensor registered without one.
    pub fn default_name(self) -> Option<&'static str> {
        match self {
            SensorKind::Obd => Some("OBD"),
            SensorKind::Gps => Some("GPS"),
            SensorKind::Other(_) => None,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Obd => write!(f, "OBD"),
            SensorKind::Gps => write!(f, "GPS"),
            SensorKind::Other(code) => write!(f, "type {}", code),
        }
    }
}

/// A sensor owned by a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorRecord {
    pub id: i64,
    pub name: String,
    pub status: Option<i64>,
    pub kind: SensorKind,
    pub controller_id: Option<i64>,
}

impl SensorRecord {
    const FIELDS: &'static [&'static str] = &["id", "name", "status", "type", "controller_id"];

    /// Decode a sensor from its snapshot JSON.
    pub fn from_json(value: &Value) -> ParseResult<Self> {
        let f = Fields::new(Self::KIND, value, Self::FIELDS)?;
        Ok(Self {
            id: f.int("id")?,
            name: f.string("name")?,
            status: f.opt_int("status")?,
            kind: SensorKind::from_code(f.int("type")?),
            controller_id: f.opt_int("controller_id")?,
        })
    }
}

impl Record for SensorRecord {
    const KIND: &'static str = "sensor";

    fn id(&self) -> i64 {
        self.id
    }
}

/// The remote service's point-in-time view of a user's topology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySnapshot {
    pub objects: Vec<ObjectRecord>,
    pub controllers: Vec<ControllerRecord>,
    pub sensors: Vec<SensorRecord>,
}

impl TopologySnapshot {
    /// Decode the `{"msg": {"objects": [...], "controllers": [...], "sensors": [...]}}`
    /// envelope returned by the relations endpoint.
    ///
    /// Fails closed: one malformed element rejects the whole snapshot.
    pub fn from_envelope(envelope: &Value) -> ParseResult<Self> {
        let msg = envelope
            .get("msg")
            .ok_or_else(|| ParseError::MissingField {
                kind: "envelope",
                field: "msg".to_string(),
            })?;
        if !msg.is_object() {
            return Err(ParseError::NotAnObject { kind: "msg" });
        }

        Ok(Self {
            objects: decode_list(msg, "objects", ObjectRecord::from_json)?,
            controllers: decode_list(msg, "controllers", ControllerRecord::from_json)?,
            sensors: decode_list(msg, "sensors", SensorRecord::from_json)?,
        })
    }

    /// Total number of records across all kinds.
    pub fn len(&self) -> usize {
        self.objects.len() + self.controllers.len() + self.sensors.len()
    }

    /// Whether the snapshot holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn decode_list<T>(
    msg: &Value,
    field: &str,
    decode: impl Fn(&Value) -> ParseResult<T>,
) -> ParseResult<Vec<T>> {
    let items = msg
        .get(field)
        .ok_or_else(|| ParseError::MissingField {
            kind: "msg",
            field: field.to_string(),
        })?
        .as_array()
        .ok_or_else(|| ParseError::InvalidField {
            kind: "msg",
            field: field.to_string(),
            reason: "expected an array".to_string(),
        })?;

    items.iter().map(decode).collect()
}
