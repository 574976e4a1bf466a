//! Backup command - export sensor readings to linked destinations.

use std::path::Path;

use anyhow::{Context, Result, bail};
use meter_sync::{BackupConfig, BackupOrchestrator, BackupReport, Config, SensorStatus, SkipReason};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{open_shared, orchestrator};
use crate::cli::OutputFormat;

/// Arguments for the backup command.
pub struct BackupArgs {
    pub user: Option<i64>,
    pub all: bool,
    pub workers: Option<usize>,
    pub fail_fast: bool,
    pub format: OutputFormat,
}

/// Execute the backup command.
pub async fn cmd_backup(args: BackupArgs, config: &Config, database: &Path) -> Result<()> {
    if let Some(workers) = args.workers
        && !(1..=BackupConfig::MAX_WORKERS).contains(&workers)
    {
        bail!(
            "--workers must be between 1 and {}, got {}",
            BackupConfig::MAX_WORKERS,
            workers
        );
    }

    let store = open_shared(database)?;
    let users: Vec<i64> = if args.all {
        store.lock().await.users_with_keys()?
    } else {
        args.user.into_iter().collect()
    };

    let mut backup = orchestrator(store, config);
    let mut options = backup.options().clone();
    if let Some(workers) = args.workers {
        options.workers = workers;
    }
    options.fail_fast |= args.fail_fast;
    backup = backup.with_options(options);

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing sensors in progress");
            watcher.cancel();
        }
    });

    let runs = run_users(&backup, &users, &cancel).await?;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&runs)?),
        OutputFormat::Text => {
            if users.is_empty() {
                println!("No user has an encryption key; nothing to back up");
            }
            print!("{}", format_runs(&runs));
        }
    }
    runs.check()
}

/// A user whose backup run could not complete.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct UserFailure {
    pub user_id: i64,
    pub error: String,
}

/// Reports of every user that ran, and the users whose run failed.
#[derive(Debug, Default, Serialize)]
pub(crate) struct UserRuns {
    pub reports: Vec<BackupReport>,
    pub failed_users: Vec<UserFailure>,
}

impl UserRuns {
    /// Fail when any user or sensor failed, or the run was interrupted.
    pub(crate) fn check(&self) -> Result<()> {
        let failed: usize = self.reports.iter().map(|r| r.failures().count()).sum();
        if !self.failed_users.is_empty() {
            bail!(
                "Backup failed for {} user(s) and {} sensor(s)",
                self.failed_users.len(),
                failed
            );
        }
        if failed > 0 {
            bail!("{} sensor backup(s) failed", failed);
        }
        if self.reports.iter().any(|r| r.cancelled) {
            bail!("Backup interrupted");
        }
        Ok(())
    }
}

/// Back up `users` in turn. A failed user run is recorded and the next user
/// still runs, unless the orchestrator is set to fail fast.
pub(crate) async fn run_users(
    backup: &BackupOrchestrator,
    users: &[i64],
    cancel: &CancellationToken,
) -> Result<UserRuns> {
    let mut runs = UserRuns::default();
    for &user in users {
        if cancel.is_cancelled() {
            break;
        }
        match backup.sync_all_with_cancel(user, cancel).await {
            Ok(report) => runs.reports.push(report),
            Err(e) if backup.options().fail_fast => {
                return Err(e).with_context(|| format!("Backup for user {} failed", user));
            }
            Err(e) => {
                warn!("Backup for user {} failed: {}", user, e);
                runs.failed_users.push(UserFailure {
                    user_id: user,
                    error: e.to_string(),
                });
            }
        }
    }
    Ok(runs)
}

/// Human-readable summary of a multi-user run.
pub(crate) fn format_runs(runs: &UserRuns) -> String {
    let mut out: String = runs.reports.iter().map(format_report).collect();
    for failure in &runs.failed_users {
        out.push_str(&format!(
            "User {}: backup failed: {}\n",
            failure.user_id, failure.error
        ));
    }
    out
}

fn describe_status(status: &SensorStatus) -> String {
    match status {
        SensorStatus::Exported(summary) => format!(
            "exported {} readings in {} window(s), {} bytes",
            summary.readings_exported, summary.windows_exported, summary.bytes_written
        ),
        SensorStatus::UpToDate => "up to date".to_string(),
        SensorStatus::NoData => "no readings".to_string(),
        SensorStatus::Failed { error, retryable } => {
            if *retryable {
                format!("failed (will retry next run): {}", error)
            } else {
                format!("failed: {}", error)
            }
        }
        SensorStatus::Cancelled => "cancelled".to_string(),
    }
}

/// Human-readable report for one user.
pub(crate) fn format_report(report: &BackupReport) -> String {
    match report.skipped {
        Some(SkipReason::NoKey) => {
            return format!("User {}: skipped, no encryption key\n", report.user_id);
        }
        Some(SkipReason::NoDestination) => {
            return format!("User {}: skipped, no linked destination\n", report.user_id);
        }
        None => {}
    }

    let mut out = format!(
        "User {}: {} sensor(s) exported, {} failed{}\n",
        report.user_id,
        report.exported_count(),
        report.failures().count(),
        if report.cancelled { ", interrupted" } else { "" }
    );
    for outcome in &report.outcomes {
        out.push_str(&format!(
            "  {} {}/{} (#{}): {}\n",
            outcome.destination,
            outcome.controller,
            outcome.sensor_name,
            outcome.sensor_id,
            describe_status(&outcome.status)
        ));
    }
    out
}
