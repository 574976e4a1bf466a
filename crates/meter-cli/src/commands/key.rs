//! Key command - manage backup encryption keys.

use std::path::Path;

use anyhow::{Context, Result, bail};
use meter_store::{EncryptionKey, Store};
use meter_sync::StreamEncryptor;
use tracing::info;

use super::open_store;
use crate::cli::KeyAction;

/// Execute a key subcommand.
pub fn cmd_key(action: KeyAction, database: &Path) -> Result<()> {
    let store = open_store(database)?;
    match action {
        KeyAction::Generate { user, force } => {
            let key = generate_key(&store, user, force)?;
            println!("{}", key);
            eprintln!("Keep this key safe: backups for user {} cannot be read without it.", user);
        }
        KeyAction::Set { user, key } => {
            set_key(&store, user, &key)?;
            println!("Encryption key stored for user {}", user);
        }
        KeyAction::Clear { user } => {
            store.clear_encryption_key(user)?;
            info!("Cleared encryption key for user {}", user);
            println!("Backup disabled for user {}", user);
        }
    }
    Ok(())
}

fn generate_key(store: &Store, user: i64, force: bool) -> Result<String> {
    if !force && store.encryption_key(user)?.is_some() {
        bail!(
            "User {} already has an encryption key; pass --force to replace it",
            user
        );
    }
    let key = StreamEncryptor::generate_key();
    store.set_encryption_key(user, &EncryptionKey::new(key.clone()))?;
    info!("Generated encryption key for user {}", user);
    Ok(key)
}

fn set_key(store: &Store, user: i64, key: &str) -> Result<()> {
    let key = key.trim();
    StreamEncryptor::from_base64(key).context("Invalid encryption key")?;
    store.set_encryption_key(user, &EncryptionKey::new(key))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_refuses_to_overwrite() {
        let store = Store::open_in_memory().unwrap();
        let first = generate_key(&store, 1, false).unwrap();
        assert!(generate_key(&store, 1, false).is_err());
        assert_eq!(store.encryption_key(1).unwrap().unwrap().expose(), first);

        let second = generate_key(&store, 1, true).unwrap();
        assert_ne!(first, second);
        assert_eq!(store.encryption_key(1).unwrap().unwrap().expose(), second);
    }

    #[test]
    fn test_set_validates_key() {
        let store = Store::open_in_memory().unwrap();
        assert!(set_key(&store, 1, "too-short").is_err());
        assert!(store.encryption_key(1).unwrap().is_none());

        let key = StreamEncryptor::generate_key();
        set_key(&store, 1, &format!("{}\n", key)).unwrap();
        assert_eq!(store.encryption_key(1).unwrap().unwrap().expose(), key);
    }
}
