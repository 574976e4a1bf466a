//! One fetch-and-reconcile pass over a user's topology.

use meter_store::TopologyReport;
use tracing::info;

use crate::SharedStore;
use crate::error::SyncError;
use crate::fetch::SnapshotFetcher;

/// Fetch the snapshot for `token` and make the local topology match it.
///
/// The store lock is taken only after the snapshot has been fully decoded,
/// so a failed fetch never touches local state. Wrap this in
/// [`with_retry`](crate::with_retry) to rerun the whole pass on retryable
/// failures.
pub async fn sync_topology(
    fetcher: &SnapshotFetcher,
    store: &SharedStore,
    token: &str,
) -> Result<TopologyReport, SyncError> {
    let snapshot = fetcher.fetch(token).await?;
    info!(
        "Fetched topology from {}: {} records",
        fetcher.base_url(),
        snapshot.len()
    );

    let mut store = store.lock().await;
    let report = store.reconcile_topology(&snapshot)?;
    Ok(report)
}
