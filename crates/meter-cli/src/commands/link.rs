//! Link and unlink commands - manage backup destinations.

use std::path::Path;

use anyhow::{Context, Result, bail};
use meter_store::DestinationSpec;
use meter_sync::{Config, YANDEX_WEBDAV_URL};
use tokio_util::sync::CancellationToken;

use super::backup::{format_runs, run_users};
use super::{open_shared, open_store, orchestrator};
use crate::cli::{DestinationKind, LinkTarget};

/// Turn the command-line target into a destination spec.
fn destination_spec(target: LinkTarget) -> Result<DestinationSpec> {
    match target {
        LinkTarget { dir: Some(dir), .. } => {
            let path = std::path::absolute(&dir)
                .with_context(|| format!("Invalid directory {}", dir.display()))?;
            Ok(DestinationSpec::LocalDirectory { path })
        }
        LinkTarget {
            yandex_token: Some(token),
            ..
        } => Ok(DestinationSpec::WebDav {
            url: YANDEX_WEBDAV_URL.to_string(),
            token,
        }),
        LinkTarget {
            webdav_url: Some(url),
            token: Some(token),
            ..
        } => Ok(DestinationSpec::WebDav { url, token }),
        _ => bail!("Specify --dir, --yandex-token, or --webdav-url with --token"),
    }
}

/// Execute the link command: store the destination, then back up the user.
pub async fn cmd_link(
    user: i64,
    target: LinkTarget,
    no_backup: bool,
    config: &Config,
    database: &Path,
) -> Result<()> {
    let spec = destination_spec(target)?;
    let store = open_shared(database)?;
    store.lock().await.link_destination(user, &spec)?;
    println!("Linked {} for user {}", spec, user);

    if no_backup {
        return Ok(());
    }

    let backup = orchestrator(store, config);
    let runs = run_users(&backup, &[user], &CancellationToken::new()).await?;
    print!("{}", format_runs(&runs));
    runs.check()
}

/// Execute the unlink command.
pub fn cmd_unlink(user: i64, kind: DestinationKind, database: &Path) -> Result<()> {
    let kind = match kind {
        DestinationKind::Local => DestinationSpec::LOCAL_KIND,
        DestinationKind::Webdav => DestinationSpec::WEBDAV_KIND,
    };
    let store = open_store(database)?;
    if store.unlink_destination(user, kind)? {
        println!("Unlinked {} destination for user {}", kind, user);
    } else {
        println!("User {} has no {} destination", user, kind);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn target() -> LinkTarget {
        LinkTarget {
            dir: None,
            yandex_token: None,
            webdav_url: None,
            token: None,
        }
    }

    #[test]
    fn test_destination_specs() {
        let yandex = destination_spec(LinkTarget {
            yandex_token: Some("y-token".to_string()),
            ..target()
        })
        .unwrap();
        assert_eq!(
            yandex,
            DestinationSpec::WebDav {
                url: YANDEX_WEBDAV_URL.to_string(),
                token: "y-token".to_string()
            }
        );

        let dav = destination_spec(LinkTarget {
            webdav_url: Some("https://dav.example.com".to_string()),
            token: Some("t".to_string()),
            ..target()
        })
        .unwrap();
        assert_eq!(dav.kind(), DestinationSpec::WEBDAV_KIND);

        let local = destination_spec(LinkTarget {
            dir: Some(PathBuf::from("backups")),
            ..target()
        })
        .unwrap();
        match local {
            DestinationSpec::LocalDirectory { path } => {
                assert!(path.is_absolute());
                assert!(path.ends_with("backups"));
            }
            other => panic!("expected local directory, got {:?}", other),
        }

        assert!(destination_spec(target()).is_err());
    }
}
