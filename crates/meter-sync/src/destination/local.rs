//! Backup into a local (or mounted) directory.
//!
//! Layout under the root:
//!
//! ```text
//! <controller>_<hardware id>/<sensor id>_<sensor name>/
//!     .cursor
//!     20230101T000000_20230101T235959.csv.enc
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::debug;

use meter_types::TimeRange;

use super::{
    CURSOR_NAME, ControllerRef, Destination, SensorRef, decode_cursor, encode_cursor,
    window_file_name,
};
use crate::error::DestinationError;

/// A directory destination.
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    root: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DestinationError + '_ {
    move |source| DestinationError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl LocalDirectory {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn controller_dir(&self, controller: &ControllerRef) -> PathBuf {
        self.root.join(controller.dir_name())
    }

    /// Directory holding a sensor's objects.
    pub fn sensor_dir(&self, sensor: &SensorRef) -> PathBuf {
        self.controller_dir(&sensor.controller).join(sensor.dir_name())
    }

    /// Write through a temporary file so readers never see a partial object.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), DestinationError> {
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await.map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, path).await.map_err(io_error(path))
    }
}

#[async_trait]
impl Destination for LocalDirectory {
    fn describe(&self) -> String {
        format!("local ({})", self.root.display())
    }

    async fn ensure_controller(&self, controller: &ControllerRef) -> Result<(), DestinationError> {
        let dir = self.controller_dir(controller);
        tokio::fs::create_dir_all(&dir).await.map_err(io_error(&dir))
    }

    async fn ensure_sensor(&self, sensor: &SensorRef) -> Result<(), DestinationError> {
        let dir = self.sensor_dir(sensor);
        tokio::fs::create_dir_all(&dir).await.map_err(io_error(&dir))
    }

    async fn synced_until(
        &self,
        sensor: &SensorRef,
    ) -> Result<Option<OffsetDateTime>, DestinationError> {
        let path = self.sensor_dir(sensor).join(CURSOR_NAME);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => decode_cursor(&path.display().to_string(), &text).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    async fn store_window(
        &self,
        sensor: &SensorRef,
        window: &TimeRange,
        extension: &str,
        data: Vec<u8>,
    ) -> Result<(), DestinationError> {
        let path = self
            .sensor_dir(sensor)
            .join(window_file_name(window, extension));
        debug!("Writing {} bytes to {}", data.len(), path.display());
        self.write_atomic(&path, &data).await
    }

    async fn mark_synced(
        &self,
        sensor: &SensorRef,
        until: OffsetDateTime,
    ) -> Result<(), DestinationError> {
        let path = self.sensor_dir(sensor).join(CURSOR_NAME);
        self.write_atomic(&path, encode_cursor(until).as_bytes())
            .await
    }
}
