//! Data models for stored data.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use meter_types::SensorRecord;

/// A user's backup encryption key, as stored (base64 text).
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey(String);

impl EncryptionKey {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// The stored key text.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// A backup destination linked to a user account.
///
/// A user may link at most one destination of each kind.
#[derive(Clone, PartialEq, Eq)]
pub enum DestinationSpec {
    /// A directory on the local filesystem (or a mounted share).
    LocalDirectory { path: PathBuf },
    /// A WebDAV collection authorized with an OAuth token.
    WebDav { url: String, token: String },
}

impl DestinationSpec {
    pub const LOCAL_KIND: &'static str = "local";
    pub const WEBDAV_KIND: &'static str = "webdav";

    /// Storage key for this destination kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DestinationSpec::LocalDirectory { .. } => Self::LOCAL_KIND,
            DestinationSpec::WebDav { .. } => Self::WEBDAV_KIND,
        }
    }

    /// Where the data goes, without credentials.
    pub fn location(&self) -> String {
        match self {
            DestinationSpec::LocalDirectory { path } => path.display().to_string(),
            DestinationSpec::WebDav { url, .. } => url.clone(),
        }
    }

    pub(crate) fn secret(&self) -> Option<&str> {
        match self {
            DestinationSpec::LocalDirectory { .. } => None,
            DestinationSpec::WebDav { token, .. } => Some(token),
        }
    }

    pub(crate) fn from_row(kind: &str, location: String, secret: Option<String>) -> Option<Self> {
        match kind {
            Self::LOCAL_KIND => Some(DestinationSpec::LocalDirectory {
                path: PathBuf::from(location),
            }),
            Self::WEBDAV_KIND => Some(DestinationSpec::WebDav {
                url: location,
                token: secret.unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

impl fmt::Debug for DestinationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationSpec::LocalDirectory { path } => f
                .debug_struct("LocalDirectory")
                .field("path", path)
                .finish(),
            DestinationSpec::WebDav { url, .. } => f
                .debug_struct("WebDav")
                .field("url", url)
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

impl fmt::Display for DestinationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind(), self.location())
    }
}

/// A sensor with the value of its most recent reading, for status display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorWithValue {
    pub id: i64,
    pub name: String,
    pub sensor_type: i64,
    pub controller_id: Option<i64>,
    pub last_value: Option<Value>,
}

impl SensorWithValue {
    pub(crate) fn new(sensor: &SensorRecord, last_value: Option<Value>) -> Self {
        Self {
            id: sensor.id,
            name: sensor.name.clone(),
            sensor_type: sensor.kind.code(),
            controller_id: sensor.controller_id,
            last_value,
        }
    }
}
