//! Backup destinations and the incremental window sync they share.
//!
//! A destination keeps its own "synced until" cursor per sensor, so the
//! backup run holds no state between invocations. [`Destination::sync`]
//! asks for that cursor, plans the remaining windows with
//! [`pending_windows`] and exports them one by one, advancing the cursor
//! after each stored window.

mod local;
mod webdav;

pub use local::LocalDirectory;
pub use webdav::{WebDav, YANDEX_WEBDAV_URL};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use meter_store::DestinationSpec;
use meter_types::{Reading, TimeRange, format_timestamp, parse_timestamp, truncate_to_second};

use crate::SharedStore;
use crate::crypto::StreamEncryptor;
use crate::error::{BackupError, DestinationError};
use crate::serialize::Serializer;

/// Name of the per-sensor cursor object.
pub const CURSOR_NAME: &str = ".cursor";
/// Suffix appended to every encrypted object.
pub const ENCRYPTED_SUFFIX: &str = "enc";

/// Destination-side identity of a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRef {
    pub name: String,
    pub hardware_id: String,
}

impl ControllerRef {
    /// Directory (or collection) name for this controller.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", sanitize(&self.name), sanitize(&self.hardware_id))
    }
}

/// Destination-side identity of a sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorRef {
    pub id: i64,
    pub name: String,
    pub controller: ControllerRef,
}

impl SensorRef {
    /// Directory (or collection) name for this sensor.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.id, sanitize(&self.name))
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` so names are safe as path
/// segments and URL segments alike.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// `20230101T000000` style timestamp used in object names.
pub fn compact_timestamp(at: OffsetDateTime) -> String {
    format_timestamp(at).replace(['-', ':'], "")
}

/// Object name for one exported window, e.g.
/// `20230101T000000_20230101T235959.csv.enc`.
pub fn window_file_name(window: &TimeRange, extension: &str) -> String {
    format!(
        "{}_{}.{}.{}",
        compact_timestamp(window.start),
        compact_timestamp(window.end),
        extension,
        ENCRYPTED_SUFFIX
    )
}

pub(crate) fn encode_cursor(until: OffsetDateTime) -> String {
    format_timestamp(until)
}

pub(crate) fn decode_cursor(location: &str, text: &str) -> Result<OffsetDateTime, DestinationError> {
    parse_timestamp(text).map_err(|_| DestinationError::CorruptCursor {
        location: location.to_string(),
        value: text.trim().to_string(),
    })
}

/// Reads the readings of one sensor inside a window.
#[async_trait]
pub trait RangeReader: Send + Sync {
    async fn readings(
        &self,
        sensor_id: i64,
        range: TimeRange,
    ) -> Result<Vec<Reading>, meter_store::Error>;
}

/// [`RangeReader`] over the shared local store.
#[derive(Clone)]
pub struct StoreReader {
    store: SharedStore,
}

impl StoreReader {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RangeReader for StoreReader {
    async fn readings(
        &self,
        sensor_id: i64,
        range: TimeRange,
    ) -> Result<Vec<Reading>, meter_store::Error> {
        let store = self.store.lock().await;
        store.readings_in_range(sensor_id, range)
    }
}

/// How pending data is cut into windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Window length; windows are aligned to multiples of it since the epoch.
    pub length: time::Duration,
    /// Last second exported; nothing after it is read.
    pub until: OffsetDateTime,
}

impl WindowPolicy {
    /// Windows of `hours` hours up to the current time.
    pub fn hours(hours: u32) -> Self {
        Self::at(hours, OffsetDateTime::now_utc())
    }

    /// Windows of `hours` hours up to, but excluding, the second `now` falls
    /// in. Readings are stamped with whole seconds, so that second may still
    /// receive readings after the export.
    pub fn at(hours: u32, now: OffsetDateTime) -> Self {
        Self {
            length: time::Duration::hours(i64::from(hours.max(1))),
            until: truncate_to_second(now) - time::Duration::SECOND,
        }
    }
}

/// Windows still to export for a sensor.
///
/// Export starts at `first` (the earliest stored reading) or one second after
/// `cutoff`, whichever is later, and ends at `policy.until`. Windows are
/// inclusive on both ends and aligned to `policy.length`; the first one may
/// start mid-window and the last one is cut off at `until`.
pub fn pending_windows(
    first: OffsetDateTime,
    cutoff: Option<OffsetDateTime>,
    policy: &WindowPolicy,
) -> Vec<TimeRange> {
    let second = time::Duration::SECOND;
    let first = truncate_to_second(first);
    let mut start = match cutoff {
        Some(cutoff) => first.max(truncate_to_second(cutoff) + second),
        None => first,
    };

    let length = policy.length.whole_seconds().max(1);
    let mut windows = Vec::new();
    while start <= policy.until {
        let offset = start.unix_timestamp().rem_euclid(length);
        let boundary = start - time::Duration::seconds(offset) + policy.length;
        let end = (boundary - second).min(policy.until);
        windows.push(TimeRange::new(start, end));
        start = end + second;
    }
    windows
}

/// What one sensor sync exported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub windows_exported: usize,
    pub readings_exported: usize,
    pub bytes_written: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub synced_until: Option<OffsetDateTime>,
}

/// An external store for encrypted sensor data.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Where the data goes, for logs and reports.
    fn describe(&self) -> String;

    /// Make sure the controller's place exists. Idempotent.
    async fn ensure_controller(&self, controller: &ControllerRef) -> Result<(), DestinationError>;

    /// Make sure the sensor's place exists. Idempotent.
    async fn ensure_sensor(&self, sensor: &SensorRef) -> Result<(), DestinationError>;

    /// The backup cutoff: the last instant already exported for `sensor`.
    async fn synced_until(
        &self,
        sensor: &SensorRef,
    ) -> Result<Option<OffsetDateTime>, DestinationError>;

    /// Store one encrypted window.
    async fn store_window(
        &self,
        sensor: &SensorRef,
        window: &TimeRange,
        extension: &str,
        data: Vec<u8>,
    ) -> Result<(), DestinationError>;

    /// Advance the backup cutoff.
    async fn mark_synced(
        &self,
        sensor: &SensorRef,
        until: OffsetDateTime,
    ) -> Result<(), DestinationError>;

    /// Export everything newer than the cutoff, window by window.
    ///
    /// Readings go through `reader`, then `serializer`, then `encryptor`
    /// before reaching the destination. Windows without readings store
    /// nothing but still move the cutoff forward.
    async fn sync(
        &self,
        sensor: &SensorRef,
        serializer: &dyn Serializer,
        encryptor: &StreamEncryptor,
        first_date: OffsetDateTime,
        reader: &dyn RangeReader,
        policy: &WindowPolicy,
    ) -> Result<SyncSummary, BackupError> {
        let cutoff = self.synced_until(sensor).await?;
        let windows = pending_windows(first_date, cutoff, policy);
        let mut summary = SyncSummary {
            synced_until: cutoff,
            ..Default::default()
        };

        let mut marked = cutoff;
        for window in &windows {
            let readings = reader.readings(sensor.id, *window).await?;
            if !readings.is_empty() {
                let plain = serializer.serialize(&readings)?;
                let sealed = encryptor.encrypt(&plain)?;
                let size = sealed.len() as u64;
                self.store_window(sensor, window, serializer.extension(), sealed)
                    .await?;
                self.mark_synced(sensor, window.end).await?;
                marked = Some(window.end);

                debug!(
                    "Sensor {}: exported {} readings for {} .. {}",
                    sensor.id,
                    readings.len(),
                    format_timestamp(window.start),
                    format_timestamp(window.end)
                );
                summary.windows_exported += 1;
                summary.readings_exported += readings.len();
                summary.bytes_written += size;
            }
            summary.synced_until = Some(window.end);
        }

        if let Some(until) = summary.synced_until
            && marked != Some(until)
        {
            self.mark_synced(sensor, until).await?;
        }
        Ok(summary)
    }
}

/// Opens destinations from their stored specs.
pub trait DestinationFactory: Send + Sync {
    fn open(&self, spec: &DestinationSpec) -> Result<Arc<dyn Destination>, DestinationError>;
}

/// Factory for the built-in destination kinds.
#[derive(Debug, Clone)]
pub struct StandardDestinations {
    timeout: Duration,
}

impl StandardDestinations {
    /// `timeout` applies to each WebDAV request.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for StandardDestinations {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl DestinationFactory for StandardDestinations {
    fn open(&self, spec: &DestinationSpec) -> Result<Arc<dyn Destination>, DestinationError> {
        match spec {
            DestinationSpec::LocalDirectory { path } => Ok(Arc::new(LocalDirectory::new(path))),
            DestinationSpec::WebDav { url, token } => {
                Ok(Arc::new(WebDav::new(url, token, self.timeout)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use serde_json::json;
    use time::macros::datetime;

    use crate::serialize::CsvSerializer;

    fn day_policy(until: OffsetDateTime) -> WindowPolicy {
        WindowPolicy {
            length: time::Duration::DAY,
            until,
        }
    }

    #[test]
    fn test_policy_stops_before_current_second() {
        let policy = WindowPolicy::at(24, datetime!(2023-01-03 12:00:00.400 UTC));
        assert_eq!(policy.until, datetime!(2023-01-03 11:59:59 UTC));
        assert_eq!(policy.length, time::Duration::hours(24));
    }

    #[test]
    fn test_windows_from_first_reading() {
        let windows = pending_windows(
            datetime!(2023-01-01 06:30:00 UTC),
            None,
            &day_policy(datetime!(2023-01-03 12:00:00 UTC)),
        );
        assert_eq!(
            windows,
            vec![
                TimeRange::new(
                    datetime!(2023-01-01 06:30:00 UTC),
                    datetime!(2023-01-01 23:59:59 UTC)
                ),
                TimeRange::new(
                    datetime!(2023-01-02 00:00:00 UTC),
                    datetime!(2023-01-02 23:59:59 UTC)
                ),
                TimeRange::new(
                    datetime!(2023-01-03 00:00:00 UTC),
                    datetime!(2023-01-03 12:00:00 UTC)
                ),
            ]
        );
    }

    #[test]
    fn test_windows_resume_after_cutoff() {
        let policy = day_policy(datetime!(2023-01-03 12:00:00 UTC));
        let windows = pending_windows(
            datetime!(2023-01-01 00:00:00 UTC),
            Some(datetime!(2023-01-02 23:59:59 UTC)),
            &policy,
        );
        assert_eq!(
            windows,
            vec![TimeRange::new(
                datetime!(2023-01-03 00:00:00 UTC),
                datetime!(2023-01-03 12:00:00 UTC)
            )]
        );

        let caught_up = pending_windows(
            datetime!(2023-01-01 00:00:00 UTC),
            Some(datetime!(2023-01-03 12:00:00 UTC)),
            &policy,
        );
        assert!(caught_up.is_empty());
    }

    #[test]
    fn test_windows_for_single_instant() {
        let at = datetime!(2023-01-02 00:00:00 UTC);
        assert_eq!(
            pending_windows(at, None, &day_policy(at)),
            vec![TimeRange::instant(at)]
        );
        assert!(pending_windows(at + time::Duration::SECOND, None, &day_policy(at)).is_empty());
    }

    #[test]
    fn test_names_are_sanitized() {
        let controller = ControllerRef {
            name: "Pi / garage".to_string(),
            hardware_id: "b8:27:eb:00:00:01".to_string(),
        };
        assert_eq!(controller.dir_name(), "Pi___garage_b8_27_eb_00_00_01");

        let sensor = SensorRef {
            id: 5,
            name: "..".to_string(),
            controller,
        };
        assert_eq!(sensor.dir_name(), "5_unnamed");

        let window = TimeRange::new(
            datetime!(2023-01-01 00:00:00 UTC),
            datetime!(2023-01-01 23:59:59 UTC),
        );
        assert_eq!(
            window_file_name(&window, "csv"),
            "20230101T000000_20230101T235959.csv.enc"
        );
    }

    #[test]
    fn test_cursor_round_trip() {
        let at = datetime!(2023-01-04 12:00:00 UTC);
        assert_eq!(decode_cursor("x", &encode_cursor(at)).unwrap(), at);
        assert!(matches!(
            decode_cursor("x", "yesterday"),
            Err(DestinationError::CorruptCursor { .. })
        ));
    }

    /// In-memory destination recording every call.
    #[derive(Default)]
    struct MemoryDestination {
        cursor: Mutex<Option<OffsetDateTime>>,
        objects: Mutex<BTreeMap<String, Vec<u8>>>,
        marks: Mutex<Vec<OffsetDateTime>>,
    }

    #[async_trait]
    impl Destination for MemoryDestination {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        async fn ensure_controller(&self, _: &ControllerRef) -> Result<(), DestinationError> {
            Ok(())
        }

        async fn ensure_sensor(&self, _: &SensorRef) -> Result<(), DestinationError> {
            Ok(())
        }

        async fn synced_until(
            &self,
            _: &SensorRef,
        ) -> Result<Option<OffsetDateTime>, DestinationError> {
            Ok(*self.cursor.lock().unwrap())
        }

        async fn store_window(
            &self,
            _: &SensorRef,
            window: &TimeRange,
            extension: &str,
            data: Vec<u8>,
        ) -> Result<(), DestinationError> {
            self.objects
                .lock()
                .unwrap()
                .insert(window_file_name(window, extension), data);
            Ok(())
        }

        async fn mark_synced(
            &self,
            _: &SensorRef,
            until: OffsetDateTime,
        ) -> Result<(), DestinationError> {
            *self.cursor.lock().unwrap() = Some(until);
            self.marks.lock().unwrap().push(until);
            Ok(())
        }
    }

    struct FixedReader(Vec<Reading>);

    #[async_trait]
    impl RangeReader for FixedReader {
        async fn readings(
            &self,
            _: i64,
            range: TimeRange,
        ) -> Result<Vec<Reading>, meter_store::Error> {
            Ok(self
                .0
                .iter()
                .filter(|r| range.contains(r.timestamp))
                .cloned()
                .collect())
        }
    }

    fn sensor() -> SensorRef {
        SensorRef {
            id: 1,
            name: "GPS".to_string(),
            controller: ControllerRef {
                name: "Pi".to_string(),
                hardware_id: "42".to_string(),
            },
        }
    }

    fn reading(id: i64, at: OffsetDateTime) -> Reading {
        Reading {
            id,
            sensor_id: 1,
            timestamp: at,
            value: json!(id),
        }
    }

    #[tokio::test]
    async fn test_sync_skips_empty_windows_and_marks_cutoff() {
        let dest = MemoryDestination::default();
        let encryptor = StreamEncryptor::from_bytes(&[3u8; 32]).unwrap();
        let reader = FixedReader(vec![
            reading(1, datetime!(2023-01-01 00:00:00 UTC)),
            reading(2, datetime!(2023-01-01 10:00:00 UTC)),
        ]);
        let policy = day_policy(datetime!(2023-01-03 08:00:00 UTC));

        let summary = dest
            .sync(
                &sensor(),
                &CsvSerializer,
                &encryptor,
                datetime!(2023-01-01 00:00:00 UTC),
                &reader,
                &policy,
            )
            .await
            .unwrap();

        assert_eq!(summary.windows_exported, 1);
        assert_eq!(summary.readings_exported, 2);
        assert_eq!(summary.synced_until, Some(datetime!(2023-01-03 08:00:00 UTC)));

        let objects = dest.objects.lock().unwrap();
        let sealed = objects
            .get("20230101T000000_20230101T235959.csv.enc")
            .unwrap();
        assert_eq!(summary.bytes_written, sealed.len() as u64);
        let csv = String::from_utf8(encryptor.decrypt(sealed).unwrap()).unwrap();
        assert_eq!(
            csv,
            "timestamp,value\n2023-01-01T00:00:00,1\n2023-01-01T10:00:00,2\n"
        );

        assert_eq!(
            *dest.marks.lock().unwrap(),
            vec![
                datetime!(2023-01-01 23:59:59 UTC),
                datetime!(2023-01-03 08:00:00 UTC)
            ]
        );
    }

    #[tokio::test]
    async fn test_sync_when_caught_up_writes_nothing() {
        let dest = MemoryDestination::default();
        *dest.cursor.lock().unwrap() = Some(datetime!(2023-01-03 08:00:00 UTC));
        let encryptor = StreamEncryptor::from_bytes(&[3u8; 32]).unwrap();
        let reader = FixedReader(vec![reading(1, datetime!(2023-01-01 00:00:00 UTC))]);

        let summary = dest
            .sync(
                &sensor(),
                &CsvSerializer,
                &encryptor,
                datetime!(2023-01-01 00:00:00 UTC),
                &reader,
                &day_policy(datetime!(2023-01-03 08:00:00 UTC)),
            )
            .await
            .unwrap();

        assert_eq!(summary.windows_exported, 0);
        assert_eq!(summary.synced_until, Some(datetime!(2023-01-03 08:00:00 UTC)));
        assert!(dest.objects.lock().unwrap().is_empty());
        assert!(dest.marks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reading_stamped_in_export_second_is_kept_for_next_run() {
        let dest = MemoryDestination::default();
        let encryptor = StreamEncryptor::from_bytes(&[3u8; 32]).unwrap();
        let mut readings = vec![reading(1, datetime!(2023-01-03 11:00:00 UTC))];

        let first = dest
            .sync(
                &sensor(),
                &CsvSerializer,
                &encryptor,
                datetime!(2023-01-03 11:00:00 UTC),
                &FixedReader(readings.clone()),
                &WindowPolicy::at(24, datetime!(2023-01-03 12:00:00.400 UTC)),
            )
            .await
            .unwrap();
        assert_eq!(first.readings_exported, 1);
        assert_eq!(first.synced_until, Some(datetime!(2023-01-03 11:59:59 UTC)));

        // Written after the first export, stamped with the second it ran in.
        readings.push(reading(2, datetime!(2023-01-03 12:00:00 UTC)));
        let second = dest
            .sync(
                &sensor(),
                &CsvSerializer,
                &encryptor,
                datetime!(2023-01-03 11:00:00 UTC),
                &FixedReader(readings),
                &WindowPolicy::at(24, datetime!(2023-01-04 12:00:00 UTC)),
            )
            .await
            .unwrap();
        assert_eq!(second.readings_exported, 1);
        assert!(
            dest.objects
                .lock()
                .unwrap()
                .contains_key("20230103T120000_20230103T235959.csv.enc")
        );
    }
}
