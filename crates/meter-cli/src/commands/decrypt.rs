//! Decrypt and hardware-id commands.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use meter_sync::{HardwareId, StreamEncryptor};

use super::open_store;

/// Decrypt a backup object with a user's stored key and write it to stdout.
pub fn cmd_decrypt(user: i64, file: &Path, database: &Path) -> Result<()> {
    let key = open_store(database)?
        .encryption_key(user)?
        .ok_or_else(|| anyhow!("User {} has no encryption key", user))?;
    let encryptor = StreamEncryptor::from_base64(key.expose())
        .with_context(|| format!("Stored key for user {} is invalid", user))?;

    let sealed =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let plain = encryptor
        .decrypt(&sealed)
        .with_context(|| format!("Failed to decrypt {}", file.display()))?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&plain)?;
    stdout.flush()?;
    Ok(())
}

/// Print the identifier this machine uses in backup paths.
pub fn cmd_hardware_id() -> Result<()> {
    println!("{}", HardwareId::detect());
    Ok(())
}
