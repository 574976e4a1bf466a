//! Sync command - one fetch-and-reconcile pass over the topology.

use std::path::Path;

use anyhow::{Context, Result};
use meter_store::{ReconcileStats, TopologyReport};
use meter_sync::{Config, RetryConfig, SnapshotFetcher, sync_topology, with_retry};
use tracing::info;

use super::open_shared;
use crate::cli::OutputFormat;

/// Arguments for the sync command.
pub struct SyncArgs {
    pub token: String,
    pub target: Option<String>,
    pub retries: Option<u32>,
    pub format: OutputFormat,
}

/// Execute the sync command.
pub async fn cmd_sync(args: SyncArgs, config: &Config, database: &Path) -> Result<()> {
    let target = args
        .target
        .unwrap_or_else(|| config.remote.target.clone());
    let fetcher = SnapshotFetcher::new(&target, config.remote.timeout())?;
    let store = open_shared(database)?;
    let retry = RetryConfig::new(args.retries.unwrap_or(config.remote.retries));

    info!("Syncing topology from {}", fetcher.base_url());
    let report = with_retry(&retry, "Topology sync", || {
        sync_topology(&fetcher, &store, &args.token)
    })
    .await
    .context("Topology sync failed")?;

    match args.format {
        OutputFormat::Json => {
            let result = serde_json::json!({
                "target": fetcher.base_url(),
                "objects": report.objects,
                "controllers": report.controllers,
                "sensors": report.sensors,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => print!("{}", format_report(fetcher.base_url(), &report)),
    }
    Ok(())
}

fn format_stats(label: &str, stats: &ReconcileStats) -> String {
    format!(
        "  {:<12} {} inserted, {} updated, {} unchanged, {} deleted\n",
        label, stats.inserted, stats.updated, stats.unchanged, stats.deleted
    )
}

fn format_report(target: &str, report: &TopologyReport) -> String {
    let mut out = format!("Topology synced from {}\n", target);
    out.push_str(&format_stats("objects", &report.objects));
    out.push_str(&format_stats("controllers", &report.controllers));
    out.push_str(&format_stats("sensors", &report.sensors));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_report() {
        let report = TopologyReport {
            objects: ReconcileStats {
                inserted: 1,
                updated: 1,
                unchanged: 0,
                deleted: 1,
            },
            ..Default::default()
        };
        let text = format_report("https://api.meter4.me", &report);
        assert!(text.starts_with("Topology synced from https://api.meter4.me\n"));
        assert!(text.contains("objects      1 inserted, 1 updated, 0 unchanged, 1 deleted"));
        assert_eq!(text.lines().count(), 4);
    }
}
