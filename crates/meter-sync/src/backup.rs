//! Encrypted incremental backup of every sensor to a user's destinations.
//!
//! A run is gated on the user's encryption key: no key, or no linked
//! destination, means nothing happens and nothing is reported as an error.
//! Otherwise each (destination, sensor) pair is an independent unit of work.
//! Units run on a bounded pool, each under its own timeout; failures are
//! collected into the [`BackupReport`] unless `fail_fast` is set.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::SharedStore;
use crate::config::BackupConfig;
use crate::crypto::StreamEncryptor;
use crate::destination::{
    ControllerRef, Destination, DestinationFactory, RangeReader, SensorRef, StoreReader,
    SyncSummary, WindowPolicy,
};
use crate::error::BackupError;
use crate::hardware::HardwareId;
use crate::serialize::{CsvSerializer, Serializer};

/// Tuning for a backup run.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Sensors exported concurrently.
    pub workers: usize,
    /// Time budget for one sensor on one destination.
    pub sensor_timeout: Duration,
    /// Abort the run at the first failed sensor.
    pub fail_fast: bool,
    /// Length of one exported window, in hours.
    pub window_hours: u32,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self::from(&BackupConfig::default())
    }
}

impl From<&BackupConfig> for BackupOptions {
    fn from(config: &BackupConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            sensor_timeout: Duration::from_secs(config.sensor_timeout_secs),
            fail_fast: config.fail_fast,
            window_hours: config.window_hours,
        }
    }
}

/// Why a run did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The user has no encryption key.
    NoKey,
    /// The user has no linked destination.
    NoDestination,
}

/// Result of one sensor on one destination.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SensorStatus {
    /// New windows were written.
    Exported(SyncSummary),
    /// The destination already had everything.
    UpToDate,
    /// The sensor has no readings yet.
    NoData,
    Failed { error: String, retryable: bool },
    /// Not started because the run was cancelled.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorOutcome {
    pub destination: String,
    pub controller: String,
    pub sensor_id: i64,
    pub sensor_name: String,
    #[serde(flatten)]
    pub status: SensorStatus,
}

/// Aggregated result of [`BackupOrchestrator::sync_all`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupReport {
    pub user_id: i64,
    pub skipped: Option<SkipReason>,
    pub outcomes: Vec<SensorOutcome>,
    pub cancelled: bool,
}

impl BackupReport {
    fn skipped(user_id: i64, reason: SkipReason) -> Self {
        Self {
            user_id,
            skipped: Some(reason),
            outcomes: Vec::new(),
            cancelled: false,
        }
    }

    /// Outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &SensorOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, SensorStatus::Failed { .. }))
    }

    /// Number of sensors that exported new data.
    pub fn exported_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, SensorStatus::Exported(_)))
            .count()
    }

    /// Whether every attempted sensor succeeded and nothing was cancelled.
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failures().next().is_none()
    }
}

/// One sensor, as read from the local topology.
#[derive(Debug, Clone)]
struct SensorPlan {
    sensor: SensorRef,
    first_reading: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
struct ControllerPlan {
    controller: ControllerRef,
    sensors: Vec<SensorPlan>,
}

/// Where a unit's sensor goes.
#[derive(Clone)]
enum Target {
    Ready(Arc<dyn Destination>),
    /// The destination could not be opened or prepared for the controller.
    Blocked { error: String, retryable: bool },
}

/// A unit of work: one sensor on one destination.
struct Unit {
    index: usize,
    label: String,
    target: Target,
    plan: SensorPlan,
}

/// Runs backups for users.
pub struct BackupOrchestrator {
    store: SharedStore,
    factory: Arc<dyn DestinationFactory>,
    serializer: Arc<dyn Serializer>,
    hardware_id: HardwareId,
    options: BackupOptions,
}

impl BackupOrchestrator {
    /// `hardware_id` stands in for controllers without a MAC.
    pub fn new(
        store: SharedStore,
        factory: Arc<dyn DestinationFactory>,
        hardware_id: HardwareId,
    ) -> Self {
        Self {
            store,
            factory,
            serializer: Arc::new(CsvSerializer),
            hardware_id,
            options: BackupOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: BackupOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn options(&self) -> &BackupOptions {
        &self.options
    }

    /// Back up every sensor of the local topology for `user_id`.
    pub async fn sync_all(&self, user_id: i64) -> Result<BackupReport, BackupError> {
        self.sync_all_with_cancel(user_id, &CancellationToken::new())
            .await
    }

    /// Like [`sync_all`](Self::sync_all), stopping between sensors once
    /// `cancel` fires. Sensors not started are reported as cancelled.
    pub async fn sync_all_with_cancel(
        &self,
        user_id: i64,
        cancel: &CancellationToken,
    ) -> Result<BackupReport, BackupError> {
        let policy = WindowPolicy::hours(self.options.window_hours);
        self.run(user_id, policy, cancel).await
    }

    async fn run(
        &self,
        user_id: i64,
        policy: WindowPolicy,
        cancel: &CancellationToken,
    ) -> Result<BackupReport, BackupError> {
        let (key, specs, controllers) = {
            let store = self.store.lock().await;
            let Some(key) = store.encryption_key(user_id)? else {
                debug!("User {} has no encryption key, skipping backup", user_id);
                return Ok(BackupReport::skipped(user_id, SkipReason::NoKey));
            };
            let specs = store.destinations(user_id)?;
            let controllers = if specs.is_empty() {
                Vec::new()
            } else {
                self.load_topology(&store)?
            };
            (key, specs, controllers)
        };

        let encryptor = StreamEncryptor::from_base64(key.expose())?;
        if specs.is_empty() {
            debug!("User {} has no backup destination, skipping", user_id);
            return Ok(BackupReport::skipped(user_id, SkipReason::NoDestination));
        }

        info!(
            "Backing up {} controllers to {} destination(s) for user {}",
            controllers.len(),
            specs.len(),
            user_id
        );

        let mut units = Vec::new();
        for spec in &specs {
            let opened = match self.factory.open(spec) {
                Ok(destination) => Ok(destination),
                Err(e) => {
                    warn!("Cannot open destination {}: {}", spec, e);
                    if self.options.fail_fast {
                        return Err(e.into());
                    }
                    Err(Target::Blocked {
                        retryable: e.is_retryable(),
                        error: e.to_string(),
                    })
                }
            };
            let label = match &opened {
                Ok(destination) => destination.describe(),
                Err(_) => spec.to_string(),
            };

            for controller in &controllers {
                let target = match &opened {
                    Ok(destination) => {
                        match destination.ensure_controller(&controller.controller).await {
                            Ok(()) => Target::Ready(destination.clone()),
                            Err(e) => {
                                warn!(
                                    "Cannot prepare controller {} on {}: {}",
                                    controller.controller.name, label, e
                                );
                                if self.options.fail_fast {
                                    return Err(e.into());
                                }
                                Target::Blocked {
                                    retryable: e.is_retryable(),
                                    error: e.to_string(),
                                }
                            }
                        }
                    }
                    Err(blocked) => blocked.clone(),
                };

                for plan in &controller.sensors {
                    units.push(Unit {
                        index: units.len(),
                        label: label.clone(),
                        target: target.clone(),
                        plan: plan.clone(),
                    });
                }
            }
        }

        let reader: Arc<dyn RangeReader> = Arc::new(StoreReader::new(self.store.clone()));
        let workers = self.options.workers.max(1);
        let mut results = futures::stream::iter(units)
            .map(|unit| {
                let encryptor = &encryptor;
                let reader = reader.clone();
                async move {
                    let status = if cancel.is_cancelled() {
                        Ok(SensorStatus::Cancelled)
                    } else {
                        match &unit.target {
                            Target::Ready(destination) => {
                                self.export_sensor(
                                    destination.as_ref(),
                                    &unit.plan,
                                    encryptor,
                                    reader.as_ref(),
                                    &policy,
                                )
                                .await
                            }
                            Target::Blocked { error, retryable } => Ok(SensorStatus::Failed {
                                error: error.clone(),
                                retryable: *retryable,
                            }),
                        }
                    };
                    (unit.index, unit.label, unit.plan.sensor, status)
                }
            })
            .buffer_unordered(workers);

        let mut outcomes = Vec::new();
        while let Some((index, label, sensor, status)) = results.next().await {
            let status = match status {
                Ok(status) => status,
                Err(e) => {
                    warn!("Backup of sensor {} to {} failed: {}", sensor.id, label, e);
                    if self.options.fail_fast {
                        return Err(e);
                    }
                    SensorStatus::Failed {
                        retryable: e.is_retryable(),
                        error: e.to_string(),
                    }
                }
            };
            outcomes.push((
                index,
                SensorOutcome {
                    destination: label,
                    controller: sensor.controller.name,
                    sensor_id: sensor.id,
                    sensor_name: sensor.name,
                    status,
                },
            ));
        }
        outcomes.sort_by_key(|(index, _)| *index);

        let report = BackupReport {
            user_id,
            skipped: None,
            outcomes: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
            cancelled: cancel.is_cancelled(),
        };
        info!(
            "Backup for user {} finished: {} exported, {} failed{}",
            user_id,
            report.exported_count(),
            report.failures().count(),
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    fn load_topology(&self, store: &meter_store::Store) -> Result<Vec<ControllerPlan>, BackupError> {
        let mut plans = Vec::new();
        for controller in store.list_controllers()? {
            let hardware_id = controller
                .mac
                .clone()
                .filter(|mac| !mac.trim().is_empty())
                .unwrap_or_else(|| self.hardware_id.to_string());
            let controller_ref = ControllerRef {
                name: controller.name.clone(),
                hardware_id,
            };

            let mut sensors = Vec::new();
            for sensor in store.sensors_for_controller(controller.id)? {
                sensors.push(SensorPlan {
                    first_reading: store.first_reading_timestamp(sensor.id)?,
                    sensor: SensorRef {
                        id: sensor.id,
                        name: sensor.name,
                        controller: controller_ref.clone(),
                    },
                });
            }
            plans.push(ControllerPlan {
                controller: controller_ref,
                sensors,
            });
        }
        Ok(plans)
    }

    async fn export_sensor(
        &self,
        destination: &dyn Destination,
        plan: &SensorPlan,
        encryptor: &StreamEncryptor,
        reader: &dyn RangeReader,
        policy: &WindowPolicy,
    ) -> Result<SensorStatus, BackupError> {
        let work = self.export_windows(destination, plan, encryptor, reader, policy);
        match tokio::time::timeout(self.options.sensor_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(BackupError::Timeout {
                sensor_id: plan.sensor.id,
                after: self.options.sensor_timeout,
            }),
        }
    }

    async fn export_windows(
        &self,
        destination: &dyn Destination,
        plan: &SensorPlan,
        encryptor: &StreamEncryptor,
        reader: &dyn RangeReader,
        policy: &WindowPolicy,
    ) -> Result<SensorStatus, BackupError> {
        destination.ensure_sensor(&plan.sensor).await?;
        let Some(first) = plan.first_reading else {
            return Ok(SensorStatus::NoData);
        };

        let summary = destination
            .sync(
                &plan.sensor,
                self.serializer.as_ref(),
                encryptor,
                first,
                reader,
                policy,
            )
            .await?;
        if summary.windows_exported == 0 {
            Ok(SensorStatus::UpToDate)
        } else {
            Ok(SensorStatus::Exported(summary))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use meter_store::{DestinationSpec, EncryptionKey, Store};
    use meter_types::{ControllerRecord, SensorKind, SensorRecord, TimeRange};
    use serde_json::json;
    use time::macros::datetime;
    use tokio::sync::Mutex;

    use crate::destination::StandardDestinations;
    use crate::error::DestinationError;

    const USER: i64 = 9;

    /// Wraps the standard destinations, counting opens and injecting faults.
    #[derive(Default)]
    struct TestFactory {
        opens: AtomicUsize,
        fail_sensor: Option<i64>,
        hang_sensor: Option<i64>,
    }

    impl DestinationFactory for TestFactory {
        fn open(&self, spec: &DestinationSpec) -> Result<Arc<dyn Destination>, DestinationError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Faulty {
                inner: StandardDestinations::default().open(spec)?,
                fail_sensor: self.fail_sensor,
                hang_sensor: self.hang_sensor,
            }))
        }
    }

    struct Faulty {
        inner: Arc<dyn Destination>,
        fail_sensor: Option<i64>,
        hang_sensor: Option<i64>,
    }

    #[async_trait]
    impl Destination for Faulty {
        fn describe(&self) -> String {
            self.inner.describe()
        }

        async fn ensure_controller(
            &self,
            controller: &ControllerRef,
        ) -> Result<(), DestinationError> {
            self.inner.ensure_controller(controller).await
        }

        async fn ensure_sensor(&self, sensor: &SensorRef) -> Result<(), DestinationError> {
            if self.fail_sensor == Some(sensor.id) {
                return Err(DestinationError::Rejected {
                    operation: "MKCOL".to_string(),
                    status: 503,
                    message: "busy".to_string(),
                });
            }
            if self.hang_sensor == Some(sensor.id) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.inner.ensure_sensor(sensor).await
        }

        async fn synced_until(
            &self,
            sensor: &SensorRef,
        ) -> Result<Option<OffsetDateTime>, DestinationError> {
            self.inner.synced_until(sensor).await
        }

        async fn store_window(
            &self,
            sensor: &SensorRef,
            window: &TimeRange,
            extension: &str,
            data: Vec<u8>,
        ) -> Result<(), DestinationError> {
            self.inner.store_window(sensor, window, extension, data).await
        }

        async fn mark_synced(
            &self,
            sensor: &SensorRef,
            until: OffsetDateTime,
        ) -> Result<(), DestinationError> {
            self.inner.mark_synced(sensor, until).await
        }
    }

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .create_controller(&ControllerRecord {
                id: 10,
                name: "Pi".to_string(),
                object_id: None,
                meta: None,
                activation_date: None,
                status: Some(1),
                mac: None,
                deactivation_date: None,
                controller_type: None,
            })
            .unwrap();
        for (id, name, kind) in [
            (1, "OBD", SensorKind::Obd),
            (2, "GPS", SensorKind::Gps),
            (3, "Idle", SensorKind::Other(9)),
        ] {
            store
                .create_sensor(&SensorRecord {
                    id,
                    name: name.to_string(),
                    status: Some(1),
                    kind,
                    controller_id: Some(10),
                })
                .unwrap();
        }
        store
            .insert_reading(1, datetime!(2023-01-01 00:00:00 UTC), json!({"rpm": 800}))
            .unwrap();
        store
            .insert_reading(1, datetime!(2023-01-02 00:00:00 UTC), json!({"rpm": 900}))
            .unwrap();
        store
            .insert_reading(2, datetime!(2023-01-02 12:00:00 UTC), json!({"lat": 55.7}))
            .unwrap();
        store
    }

    /// Store with a key and a local destination; returns the key text.
    fn ready_store(dir: &Path) -> (SharedStore, String) {
        let store = seeded_store();
        let key = StreamEncryptor::generate_key();
        store
            .set_encryption_key(USER, &EncryptionKey::new(key.clone()))
            .unwrap();
        store
            .link_destination(
                USER,
                &DestinationSpec::LocalDirectory {
                    path: dir.to_path_buf(),
                },
            )
            .unwrap();
        (Arc::new(Mutex::new(store)), key)
    }

    fn orchestrator(store: SharedStore, factory: Arc<TestFactory>) -> BackupOrchestrator {
        BackupOrchestrator::new(store, factory, HardwareId::new("hw-1"))
    }

    fn at(now: OffsetDateTime) -> WindowPolicy {
        WindowPolicy::at(24, now)
    }

    fn status_of(report: &BackupReport, sensor_id: i64) -> &SensorStatus {
        &report
            .outcomes
            .iter()
            .find(|o| o.sensor_id == sensor_id)
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_no_key_touches_no_destination() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store();
        store
            .link_destination(
                USER,
                &DestinationSpec::LocalDirectory {
                    path: dir.path().to_path_buf(),
                },
            )
            .unwrap();
        let factory = Arc::new(TestFactory::default());
        let backup = orchestrator(Arc::new(Mutex::new(store)), factory.clone());

        let report = backup.sync_all(USER).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::NoKey));
        assert!(report.outcomes.is_empty());
        assert_eq!(factory.opens.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_no_destination_is_silent() {
        let store = seeded_store();
        store
            .set_encryption_key(USER, &EncryptionKey::new(StreamEncryptor::generate_key()))
            .unwrap();
        let factory = Arc::new(TestFactory::default());
        let backup = orchestrator(Arc::new(Mutex::new(store)), factory.clone());

        let report = backup.sync_all(USER).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::NoDestination));
        assert!(report.is_success());
        assert_eq!(factory.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_key_fails_before_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = ready_store(dir.path());
        store
            .lock()
            .await
            .set_encryption_key(USER, &EncryptionKey::new("c2hvcnQ="))
            .unwrap();
        let factory = Arc::new(TestFactory::default());
        let backup = orchestrator(store, factory.clone());

        assert!(matches!(
            backup.sync_all(USER).await,
            Err(BackupError::InvalidKey(_))
        ));
        assert_eq!(factory.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_backup_round_trip_and_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let (store, key) = ready_store(dir.path());
        let backup = orchestrator(store.clone(), Arc::new(TestFactory::default()));
        let cancel = CancellationToken::new();

        let report = backup
            .run(USER, at(datetime!(2023-01-03 12:00:00 UTC)), &cancel)
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.exported_count(), 2);
        match status_of(&report, 1) {
            SensorStatus::Exported(summary) => {
                assert_eq!(summary.windows_exported, 2);
                assert_eq!(summary.readings_exported, 2);
                assert_eq!(summary.synced_until, Some(datetime!(2023-01-03 11:59:59 UTC)));
            }
            other => panic!("expected export, got {:?}", other),
        }
        assert_eq!(status_of(&report, 3), &SensorStatus::NoData);

        let sensor_dir = dir.path().join("Pi_hw-1").join("1_OBD");
        let sealed =
            std::fs::read(sensor_dir.join("20230101T000000_20230101T235959.csv.enc")).unwrap();
        let plain = StreamEncryptor::from_base64(&key)
            .unwrap()
            .decrypt(&sealed)
            .unwrap();
        let mut reader = csv::Reader::from_reader(plain.as_slice());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "2023-01-01T00:00:00");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&rows[0][1]).unwrap(),
            json!({"rpm": 800})
        );
        assert!(
            dir.path()
                .join("Pi_hw-1/2_GPS/20230102T120000_20230102T235959.csv.enc")
                .is_file()
        );
        assert_eq!(
            std::fs::read_to_string(sensor_dir.join(".cursor")).unwrap(),
            "2023-01-03T11:59:59"
        );

        // Same instant again: nothing new anywhere.
        let rerun = backup
            .run(USER, at(datetime!(2023-01-03 12:00:00 UTC)), &cancel)
            .await
            .unwrap();
        assert_eq!(status_of(&rerun, 1), &SensorStatus::UpToDate);
        assert_eq!(status_of(&rerun, 2), &SensorStatus::UpToDate);

        store
            .lock()
            .await
            .insert_reading(1, datetime!(2023-01-03 18:00:00 UTC), json!({"rpm": 1000}))
            .unwrap();
        let later = backup
            .run(USER, at(datetime!(2023-01-04 00:00:00 UTC)), &cancel)
            .await
            .unwrap();
        match status_of(&later, 1) {
            SensorStatus::Exported(summary) => {
                assert_eq!(summary.windows_exported, 1);
                assert_eq!(summary.readings_exported, 1);
            }
            other => panic!("expected export, got {:?}", other),
        }
        assert!(
            sensor_dir
                .join("20230103T120000_20230103T235959.csv.enc")
                .is_file()
        );
        assert_eq!(status_of(&later, 2), &SensorStatus::UpToDate);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = ready_store(dir.path());
        let factory = Arc::new(TestFactory {
            fail_sensor: Some(1),
            ..Default::default()
        });
        let backup = orchestrator(store, factory).with_options(BackupOptions {
            workers: 2,
            ..Default::default()
        });

        let report = backup
            .run(
                USER,
                at(datetime!(2023-01-03 12:00:00 UTC)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);
        assert!(matches!(
            status_of(&report, 1),
            SensorStatus::Failed {
                retryable: true,
                ..
            }
        ));
        assert!(matches!(status_of(&report, 2), SensorStatus::Exported(_)));
        let ids: Vec<i64> = report.outcomes.iter().map(|o| o.sensor_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fail_fast_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = ready_store(dir.path());
        let factory = Arc::new(TestFactory {
            fail_sensor: Some(1),
            ..Default::default()
        });
        let backup = orchestrator(store, factory).with_options(BackupOptions {
            fail_fast: true,
            ..Default::default()
        });

        let err = backup
            .run(
                USER,
                at(datetime!(2023-01-03 12:00:00 UTC)),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Destination(_)));
        assert!(!dir.path().join("Pi_hw-1/2_GPS").exists());
    }

    #[tokio::test]
    async fn test_cancelled_run_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = ready_store(dir.path());
        let backup = orchestrator(store, Arc::new(TestFactory::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = backup.sync_all_with_cancel(USER, &cancel).await.unwrap();
        assert!(report.cancelled);
        assert!(!report.is_success());
        assert!(
            report
                .outcomes
                .iter()
                .all(|o| o.status == SensorStatus::Cancelled)
        );
        assert!(!dir.path().join("Pi_hw-1/1_OBD").exists());
    }

    #[tokio::test]
    async fn test_sensor_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = ready_store(dir.path());
        let factory = Arc::new(TestFactory {
            hang_sensor: Some(2),
            ..Default::default()
        });
        let backup = orchestrator(store, factory).with_options(BackupOptions {
            sensor_timeout: Duration::from_secs(1),
            ..Default::default()
        });

        let report = backup
            .run(
                USER,
                at(datetime!(2023-01-03 12:00:00 UTC)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        match status_of(&report, 2) {
            SensorStatus::Failed { error, retryable } => {
                assert!(error.contains("timed out"));
                assert!(*retryable);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(matches!(status_of(&report, 1), SensorStatus::Exported(_)));
    }

    #[test]
    fn test_report_serializes_flat_status() {
        let report = BackupReport {
            user_id: 1,
            skipped: None,
            outcomes: vec![SensorOutcome {
                destination: "local (/tmp)".to_string(),
                controller: "Pi".to_string(),
                sensor_id: 3,
                sensor_name: "Idle".to_string(),
                status: SensorStatus::NoData,
            }],
            cancelled: false,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["outcomes"][0]["status"], "no_data");
        assert_eq!(value["outcomes"][0]["sensor_id"], 3);
    }
}
