//! Per-user backup settings: encryption keys and linked destinations.
//!
//! A missing key or an empty destination set is a normal state meaning
//! "backup disabled", never an error.

use rusqlite::{OptionalExtension, params};
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{DestinationSpec, EncryptionKey};
use crate::store::Store;

// Key gate
impl Store {
    /// The user's backup encryption key, if one is configured.
    ///
    /// A missing user row, a NULL key and an empty key all yield `None`.
    pub fn encryption_key(&self, user_id: i64) -> Result<Option<EncryptionKey>> {
        let key: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT encrypt_key FROM user_info WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(key
            .flatten()
            .filter(|k| !k.trim().is_empty())
            .map(EncryptionKey::new))
    }

    /// Set or replace the user's encryption key.
    pub fn set_encryption_key(&self, user_id: i64, key: &EncryptionKey) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_info (user_id, encrypt_key) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET encrypt_key = ?2",
            params![user_id, key.expose()],
        )?;
        info!("Encryption key updated for user {}", user_id);
        Ok(())
    }

    /// Remove the user's encryption key, disabling backup.
    pub fn clear_encryption_key(&self, user_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE user_info SET encrypt_key = NULL WHERE user_id = ?1",
            [user_id],
        )?;
        info!("Encryption key cleared for user {}", user_id);
        Ok(())
    }

    /// Users that have an encryption key configured.
    pub fn users_with_keys(&self) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id FROM user_info
             WHERE encrypt_key IS NOT NULL AND trim(encrypt_key) != ''
             ORDER BY user_id",
        )?;
        let users = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(users)
    }
}

// Destinations
impl Store {
    /// Link a destination to a user, replacing any existing one of that kind.
    pub fn link_destination(&self, user_id: i64, spec: &DestinationSpec) -> Result<()> {
        self.conn.execute(
            "INSERT INTO backup_destinations (user_id, kind, location, secret)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, kind) DO UPDATE SET location = ?3, secret = ?4",
            params![user_id, spec.kind(), spec.location(), spec.secret()],
        )?;
        info!("Linked {} for user {}", spec, user_id);
        Ok(())
    }

    /// Remove the user's destination of `kind`. Returns whether one existed.
    pub fn unlink_destination(&self, user_id: i64, kind: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM backup_destinations WHERE user_id = ?1 AND kind = ?2",
            params![user_id, kind],
        )?;
        Ok(removed > 0)
    }

    /// Every destination linked to the user, ordered by kind.
    pub fn destinations(&self, user_id: i64) -> Result<Vec<DestinationSpec>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, location, secret FROM backup_destinations
             WHERE user_id = ?1 ORDER BY kind",
        )?;
        let rows = stmt
            .query_map([user_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let specs = rows
            .into_iter()
            .filter_map(|(kind, location, secret)| {
                let spec = DestinationSpec::from_row(&kind, location, secret);
                if spec.is_none() {
                    debug!("Ignoring unknown destination kind '{}'", kind);
                }
                spec
            })
            .collect();
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_key_is_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.encryption_key(1).unwrap().is_none());

        store
            .conn
            .execute("INSERT INTO user_info (user_id, encrypt_key) VALUES (2, '')", [])
            .unwrap();
        assert!(store.encryption_key(2).unwrap().is_none());
        assert!(store.users_with_keys().unwrap().is_empty());
    }

    #[test]
    fn test_set_and_clear_key() {
        let store = Store::open_in_memory().unwrap();
        store
            .set_encryption_key(1, &EncryptionKey::new("a2V5"))
            .unwrap();
        assert_eq!(store.encryption_key(1).unwrap().unwrap().expose(), "a2V5");

        store
            .set_encryption_key(1, &EncryptionKey::new("bmV3"))
            .unwrap();
        assert_eq!(store.encryption_key(1).unwrap().unwrap().expose(), "bmV3");
        assert_eq!(store.users_with_keys().unwrap(), vec![1]);

        store.clear_encryption_key(1).unwrap();
        assert!(store.encryption_key(1).unwrap().is_none());
    }

    #[test]
    fn test_one_destination_per_kind() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.destinations(1).unwrap().is_empty());

        store
            .link_destination(
                1,
                &DestinationSpec::LocalDirectory {
                    path: PathBuf::from("/old"),
                },
            )
            .unwrap();
        store
            .link_destination(
                1,
                &DestinationSpec::LocalDirectory {
                    path: PathBuf::from("/new"),
                },
            )
            .unwrap();
        store
            .link_destination(
                1,
                &DestinationSpec::WebDav {
                    url: "https://webdav.yandex.ru".to_string(),
                    token: "t".to_string(),
                },
            )
            .unwrap();

        let specs = store.destinations(1).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(
            specs[0],
            DestinationSpec::LocalDirectory {
                path: PathBuf::from("/new")
            }
        );
        assert_eq!(specs[1].kind(), "webdav");

        assert!(store.unlink_destination(1, "webdav").unwrap());
        assert!(!store.unlink_destination(1, "webdav").unwrap());
        assert_eq!(store.destinations(1).unwrap().len(), 1);
        assert!(store.destinations(2).unwrap().is_empty());
    }
}
