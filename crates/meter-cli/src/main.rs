//! `meter`: topology sync and encrypted sensor backup for meter4.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::{BackupArgs, ReadingsArgs, SyncArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays clean.
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::HardwareId = cli.command {
        return commands::cmd_hardware_id();
    }

    let config = commands::load_config(cli.config.as_deref())?;
    let database = cli
        .database
        .clone()
        .unwrap_or_else(|| config.storage.path.clone());
    tracing::debug!("Using database {}", database.display());

    match cli.command {
        Commands::Sync {
            token,
            target,
            retries,
            output,
        } => {
            commands::cmd_sync(
                SyncArgs {
                    token,
                    target,
                    retries,
                    format: output.format,
                },
                &config,
                &database,
            )
            .await
        }
        Commands::Backup {
            users,
            workers,
            fail_fast,
            output,
        } => {
            commands::cmd_backup(
                BackupArgs {
                    user: users.user,
                    all: users.all,
                    workers,
                    fail_fast,
                    format: output.format,
                },
                &config,
                &database,
            )
            .await
        }
        Commands::Key { action } => commands::cmd_key(action, &database),
        Commands::Link {
            user,
            target,
            no_backup,
        } => commands::cmd_link(user, target, no_backup, &config, &database).await,
        Commands::Unlink { user, kind } => commands::cmd_unlink(user, kind, &database),
        Commands::Sensors { output } => commands::cmd_sensors(output.format, &database),
        Commands::Readings {
            sensor,
            from,
            field,
            limit,
            output,
        } => commands::cmd_readings(
            ReadingsArgs {
                sensor,
                from,
                field,
                limit,
                format: output.format,
            },
            &database,
        ),
        Commands::Decrypt { user, file } => commands::cmd_decrypt(user, &file, &database),
        Commands::HardwareId => commands::cmd_hardware_id(),
    }
}
