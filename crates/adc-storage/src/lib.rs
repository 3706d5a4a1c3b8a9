use adc_core::{CredentialBackend, SessionError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

pub const VAULT_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::Backend(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    pub token: String,
    pub saved_at: DateTime<Utc>,
}

/// Single-slot SQLite store for the session credential.
///
/// Deleted rows are overwritten on disk (`secure_delete`), so a cleared
/// credential does not linger in free pages.
pub struct CredentialVault {
    conn: Connection,
}

impl CredentialVault {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let vault = Self { conn };
        vault.migrate()?;
        Ok(vault)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let vault = Self { conn };
        vault.migrate()?;
        Ok(vault)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        self.conn.execute_batch("PRAGMA secure_delete = ON;")?;

        let current = self.schema_version()?;
        if current > VAULT_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: VAULT_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_session_vault.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn store(&self, token: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO session_credential (slot, token, saved_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT(slot) DO UPDATE SET
                token=excluded.token,
                saved_at=excluded.saved_at
            ",
            params![token, Utc::now().to_rfc3339()],
        )?;
        debug!(event = "vault_credential_stored");
        Ok(())
    }

    pub fn fetch(&self) -> Result<Option<StoredCredential>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT token, saved_at FROM session_credential WHERE slot = 1",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        row.map(|(token, saved_at)| {
            Ok(StoredCredential {
                token,
                saved_at: parse_timestamp(saved_at)?,
            })
        })
        .transpose()
    }

    /// Reads only the token column; a damaged `saved_at` cannot hide a live token.
    pub fn fetch_token(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT token FROM session_credential WHERE slot = 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?)
    }

    /// Returns whether a credential was present.
    pub fn wipe(&self) -> Result<bool, StorageError> {
        let changes = self
            .conn
            .execute("DELETE FROM session_credential WHERE slot = 1", [])?;
        if changes > 0 {
            debug!(event = "vault_credential_wiped");
        }
        Ok(changes > 0)
    }

    /// Deletes the credential row from the file at `path` without running
    /// migrations, so it also works on vaults this build refuses to open.
    pub fn purge(path: impl AsRef<Path>) -> Result<bool, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA secure_delete = ON;")?;
        let vault = Self { conn };
        if !vault.table_exists("session_credential")? {
            return Ok(false);
        }
        vault.wipe()
    }

    pub fn secure_delete_enabled(&self) -> Result<bool, StorageError> {
        let flag: i64 = self
            .conn
            .query_row("PRAGMA secure_delete", [], |row| row.get(0))?;
        Ok(flag != 0)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table_name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }
}

impl CredentialBackend for CredentialVault {
    fn load(&self) -> Result<Option<String>, SessionError> {
        Ok(self.fetch_token()?)
    }

    fn save(&mut self, token: &str) -> Result<(), SessionError> {
        Ok(self.store(token)?)
    }

    fn erase(&mut self) -> Result<(), SessionError> {
        self.wipe()?;
        Ok(())
    }
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(format!("{value}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use adc_core::SessionStore;
    use tempfile::tempdir;

    #[test]
    fn migration_creates_vault_table_with_secure_delete() {
        let vault = CredentialVault::open_in_memory().expect("open vault");
        assert!(vault.table_exists("session_credential").expect("table check"));
        assert_eq!(
            vault.schema_version().expect("schema version"),
            VAULT_SCHEMA_VERSION
        );
        assert!(vault.secure_delete_enabled().expect("pragma"));
    }

    #[test]
    fn store_replaces_the_single_slot() {
        let vault = CredentialVault::open_in_memory().expect("open vault");
        assert!(vault.fetch().expect("fetch").is_none());

        vault.store("first").expect("store");
        vault.store("second").expect("store");

        let stored = vault.fetch().expect("fetch").expect("credential present");
        assert_eq!(stored.token, "second");
        let rows: i64 = vault
            .conn
            .query_row("SELECT COUNT(*) FROM session_credential", [], |row| row.get(0))
            .expect("count");
        assert_eq!(rows, 1);
    }

    #[test]
    fn wipe_is_idempotent() {
        let vault = CredentialVault::open_in_memory().expect("open vault");
        vault.store("token").expect("store");
        assert!(vault.wipe().expect("wipe"));
        assert!(!vault.wipe().expect("second wipe"));
        assert!(vault.fetch().expect("fetch").is_none());
    }

    #[test]
    fn credential_survives_reopen_until_cleared() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("session.sqlite");

        {
            let vault = CredentialVault::open(&path).expect("open vault");
            let mut session = SessionStore::with_backend(Box::new(vault)).expect("session");
            assert!(!session.is_authenticated());
            session.set_credential("persisted-token").expect("set");
        }

        {
            let vault = CredentialVault::open(&path).expect("reopen vault");
            let mut session = SessionStore::with_backend(Box::new(vault)).expect("session");
            assert!(session.is_authenticated());
            assert_eq!(
                session.credential().map(|c| c.expose().to_string()),
                Some("persisted-token".to_string())
            );
            session.clear_credential().expect("clear");
        }

        let vault = CredentialVault::open(&path).expect("reopen vault");
        assert!(vault.fetch().expect("fetch").is_none());
        let session = SessionStore::with_backend(Box::new(vault)).expect("session");
        assert!(!session.is_authenticated());
    }

    #[test]
    fn blank_persisted_token_is_discarded_on_restore() {
        let vault = CredentialVault::open_in_memory().expect("open vault");
        vault.store("   ").expect("store");
        let session = SessionStore::with_backend(Box::new(vault)).expect("session");
        assert!(!session.is_authenticated());
    }

    fn raw_rows(path: &Path) -> i64 {
        let conn = Connection::open(path).expect("open raw");
        conn.query_row("SELECT COUNT(*) FROM session_credential", [], |row| row.get(0))
            .expect("count")
    }

    #[test]
    fn damaged_timestamp_still_restores_and_clears_the_token() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("session.sqlite");
        {
            let vault = CredentialVault::open(&path).expect("open vault");
            vault
                .conn
                .execute(
                    "INSERT INTO session_credential (slot, token, saved_at) VALUES (1, 'live-token', 'not-a-date')",
                    [],
                )
                .expect("insert");
            assert!(matches!(vault.fetch(), Err(StorageError::Timestamp(_))));
            assert_eq!(
                vault.fetch_token().expect("token").as_deref(),
                Some("live-token")
            );
        }

        let vault = CredentialVault::open(&path).expect("reopen vault");
        let mut session = SessionStore::with_backend(Box::new(vault)).expect("session");
        assert!(session.is_authenticated());
        session.clear_credential().expect("clear");
        drop(session);

        assert_eq!(raw_rows(&path), 0);
    }

    #[test]
    fn purge_removes_credential_from_unopenable_vault() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("future.sqlite");
        {
            let conn = Connection::open(&path).expect("open raw");
            conn.execute_batch(include_str!("../migrations/0001_session_vault.sql"))
                .expect("schema");
            conn.execute(
                "INSERT INTO session_credential (slot, token, saved_at) VALUES (1, 'live-token', 'x')",
                [],
            )
            .expect("insert");
            conn.execute("PRAGMA user_version = 9", []).expect("bump");
        }
        assert!(CredentialVault::open(&path).is_err());

        assert!(CredentialVault::purge(&path).expect("purge"));
        assert_eq!(raw_rows(&path), 0);
        assert!(!CredentialVault::purge(&path).expect("second purge"));
    }

    #[test]
    fn purge_tolerates_a_file_without_the_table() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("empty.sqlite");
        assert!(!CredentialVault::purge(&path).expect("purge"));
    }

    #[test]
    fn newer_schema_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("future.sqlite");
        {
            let conn = Connection::open(&path).expect("open raw");
            conn.execute("PRAGMA user_version = 9", []).expect("bump");
        }
        let result = CredentialVault::open(&path);
        assert!(matches!(
            result,
            Err(StorageError::UnsupportedSchemaVersion { found: 9, .. })
        ));
    }
}
