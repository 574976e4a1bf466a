//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "meter")]
#[command(author, version, about = "Topology sync and encrypted sensor backup for meter4", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, env = "METER4_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database file (overrides the config file)
    #[arg(long, global = true, env = "METER4_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Reusable output format argument
#[derive(Debug, Clone, Args)]
pub struct FormatArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch the remote topology once and reconcile the local store with it
    Sync {
        /// Authentication token for the relations endpoint
        #[arg(long, env = "METER4_TOKEN", hide_env_values = true)]
        token: String,

        /// Remote service address (overrides the config file)
        #[arg(long)]
        target: Option<String>,

        /// Retries after a retryable failure (overrides the config file)
        #[arg(long)]
        retries: Option<u32>,

        #[command(flatten)]
        output: FormatArgs,
    },

    /// Back up sensor readings to every linked destination
    Backup {
        #[command(flatten)]
        users: UserSelection,

        /// Sensors exported concurrently (overrides the config file)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Stop at the first failed sensor
        #[arg(long)]
        fail_fast: bool,

        #[command(flatten)]
        output: FormatArgs,
    },

    /// Manage a user's backup encryption key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Link a backup destination to a user and run a backup
    Link {
        /// User id
        #[arg(short, long)]
        user: i64,

        #[command(flatten)]
        target: LinkTarget,

        /// Only store the link, do not back up now
        #[arg(long)]
        no_backup: bool,
    },

    /// Remove a linked backup destination
    Unlink {
        /// User id
        #[arg(short, long)]
        user: i64,

        /// Destination kind
        #[arg(long, value_enum)]
        kind: DestinationKind,
    },

    /// List sensors with their most recent value
    Sensors {
        #[command(flatten)]
        output: FormatArgs,
    },

    /// Show stored readings of a sensor
    Readings {
        /// Sensor id
        #[arg(short, long)]
        sensor: i64,

        /// Only readings after this timestamp (YYYY-MM-DDTHH:MM:SS, UTC)
        #[arg(long)]
        from: Option<String>,

        /// Keep only this field of each value
        #[arg(long)]
        field: Option<String>,

        /// Maximum number of readings
        #[arg(short, long)]
        limit: Option<u32>,

        #[command(flatten)]
        output: FormatArgs,
    },

    /// Decrypt a backup object with a user's key and print it
    Decrypt {
        /// User id whose key sealed the object
        #[arg(short, long)]
        user: i64,

        /// Encrypted object (`*.enc`)
        file: PathBuf,
    },

    /// Print the hardware identifier of this machine
    HardwareId,
}

/// Which users a backup covers.
#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
pub struct UserSelection {
    /// User id
    #[arg(short, long)]
    pub user: Option<i64>,

    /// Every user with an encryption key
    #[arg(long)]
    pub all: bool,
}

/// Where a linked destination points.
#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = true)]
pub struct LinkTarget {
    /// Local (or mounted) directory
    #[arg(long, conflicts_with_all = ["yandex_token", "webdav_url"])]
    pub dir: Option<PathBuf>,

    /// Yandex.Disk OAuth token
    #[arg(long, conflicts_with = "webdav_url")]
    pub yandex_token: Option<String>,

    /// WebDAV server address
    #[arg(long, requires = "token")]
    pub webdav_url: Option<String>,

    /// WebDAV OAuth token
    #[arg(long, requires = "webdav_url")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DestinationKind {
    Local,
    Webdav,
}

#[derive(Debug, Subcommand)]
pub enum KeyAction {
    /// Generate and store a fresh key, printing it once
    Generate {
        /// User id
        #[arg(short, long)]
        user: i64,

        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },

    /// Store a base64-encoded 32-byte key
    Set {
        /// User id
        #[arg(short, long)]
        user: i64,

        /// The key
        #[arg(long, env = "METER4_KEY", hide_env_values = true)]
        key: String,
    },

    /// Remove a user's key, which disables backup for that user
    Clear {
        /// User id
        #[arg(short, long)]
        user: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sync_requires_token() {
        let result = Cli::try_parse_from(["meter", "sync", "--target", "http://x"]);
        if std::env::var_os("METER4_TOKEN").is_none() {
            assert!(result.is_err());
        }

        let cli = Cli::try_parse_from(["meter", "sync", "--token", "t"]).unwrap();
        match cli.command {
            Commands::Sync { token, target, .. } => {
                assert_eq!(token, "t");
                assert!(target.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_backup_user_selection() {
        assert!(Cli::try_parse_from(["meter", "backup"]).is_err());
        assert!(Cli::try_parse_from(["meter", "backup", "--user", "1", "--all"]).is_err());

        let cli = Cli::try_parse_from(["meter", "backup", "--all", "--fail-fast"]).unwrap();
        match cli.command {
            Commands::Backup {
                users, fail_fast, ..
            } => {
                assert!(users.all);
                assert!(fail_fast);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_link_targets() {
        assert!(
            Cli::try_parse_from(["meter", "link", "--user", "1", "--dir", "/b"]).is_ok()
        );
        assert!(
            Cli::try_parse_from(["meter", "link", "--user", "1", "--yandex-token", "y"]).is_ok()
        );
        assert!(
            Cli::try_parse_from([
                "meter",
                "link",
                "--user",
                "1",
                "--webdav-url",
                "https://dav",
                "--token",
                "t"
            ])
            .is_ok()
        );
        assert!(Cli::try_parse_from(["meter", "link", "--user", "1"]).is_err());
        assert!(
            Cli::try_parse_from([
                "meter", "link", "--user", "1", "--dir", "/b", "--yandex-token", "y"
            ])
            .is_err()
        );
        assert!(
            Cli::try_parse_from(["meter", "link", "--user", "1", "--webdav-url", "https://dav"])
                .is_err()
        );
    }
}
