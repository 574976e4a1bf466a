//! Topology sync and encrypted sensor backup for meter4.
//!
//! This crate connects the local store to the outside world:
//!
//! - [`SnapshotFetcher`] pulls the authoritative topology from the relations
//!   endpoint and [`sync_topology`] reconciles the local store with it.
//! - [`BackupOrchestrator`] exports every sensor's readings, window by
//!   window, to the destinations a user has linked, as encrypted CSV.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use meter_store::Store;
//! use meter_sync::{
//!     BackupOrchestrator, HardwareId, SnapshotFetcher, StandardDestinations, sync_topology,
//! };
//! use tokio::sync::Mutex;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(Mutex::new(Store::open_default()?));
//!
//! let fetcher = SnapshotFetcher::new("https://api.meter4.me", std::time::Duration::from_secs(30))?;
//! let report = sync_topology(&fetcher, &store, "token").await?;
//! println!("{} sensors inserted", report.sensors.inserted);
//!
//! let backup = BackupOrchestrator::new(
//!     store.clone(),
//!     Arc::new(StandardDestinations::default()),
//!     HardwareId::detect(),
//! );
//! let outcome = backup.sync_all(1).await?;
//! println!("{} sensors exported", outcome.exported_count());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use meter_store::Store;
use tokio::sync::Mutex;

pub mod backup;
pub mod config;
pub mod crypto;
pub mod destination;
pub mod error;
pub mod fetch;
pub mod hardware;
pub mod retry;
pub mod serialize;
pub mod topology;

/// The local store shared between sync tasks.
pub type SharedStore = Arc<Mutex<Store>>;

pub use backup::{
    BackupOptions, BackupOrchestrator, BackupReport, SensorOutcome, SensorStatus, SkipReason,
};
pub use config::{
    BackupConfig, Config, ConfigError, RemoteConfig, StorageConfig, ValidationError,
    default_config_path,
};
pub use crypto::{CryptoError, StreamEncryptor};
pub use destination::{
    ControllerRef, Destination, DestinationFactory, LocalDirectory, RangeReader, SensorRef,
    StandardDestinations, StoreReader, SyncSummary, WebDav, WindowPolicy, YANDEX_WEBDAV_URL,
    pending_windows,
};
pub use error::{BackupError, DestinationError, FetchError, SyncError};
pub use fetch::SnapshotFetcher;
pub use hardware::HardwareId;
pub use retry::{RetryConfig, Retryable, with_retry};
pub use serialize::{CsvSerializer, Serializer};
pub use topology::sync_topology;
