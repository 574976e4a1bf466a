//! Command implementations for the CLI.

mod backup;
mod decrypt;
mod key;
mod link;
mod sensors;
mod sync;

pub use backup::{BackupArgs, cmd_backup};
pub use decrypt::{cmd_decrypt, cmd_hardware_id};
pub use key::cmd_key;
pub use link::{cmd_link, cmd_unlink};
pub use sensors::{ReadingsArgs, cmd_readings, cmd_sensors};
pub use sync::{SyncArgs, cmd_sync};

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use meter_store::Store;
use meter_sync::{
    BackupOptions, BackupOrchestrator, Config, HardwareId, SharedStore, StandardDestinations,
};
use tokio::sync::Mutex;

/// Load and validate the configuration, from `path` or the default location.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load_default().context("Failed to load configuration")?,
    };
    config.validate()?;
    Ok(config)
}

pub(crate) fn open_store(path: &Path) -> Result<Store> {
    Store::open(path).with_context(|| format!("Failed to open database {}", path.display()))
}

pub(crate) fn open_shared(path: &Path) -> Result<SharedStore> {
    Ok(Arc::new(Mutex::new(open_store(path)?)))
}

/// Orchestrator over the built-in destinations, tuned by `config`.
pub(crate) fn orchestrator(store: SharedStore, config: &Config) -> BackupOrchestrator {
    BackupOrchestrator::new(
        store,
        Arc::new(StandardDestinations::new(config.remote.timeout())),
        HardwareId::detect(),
    )
    .with_options(BackupOptions::from(&config.backup))
}
