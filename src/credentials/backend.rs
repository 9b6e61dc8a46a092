//! SQLite-backed durable storage for credential records.
//!
//! One row per key in a single `credentials` table. Calls are blocking; the
//! store drives them from Tokio's blocking pool.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::credentials::types::{key_kind, CredentialRecord, CREDS_KEY};

/// Durable keyed record storage.
///
/// Implementations must make each batch atomic: either every change in a
/// `write_batch` or `apply` call is visible afterwards or none is.
pub trait CredentialBackend: Send + Sync + 'static {
    fn read(&self, key: &str) -> rusqlite::Result<Option<CredentialRecord>>;

    fn write_batch(&self, records: &[CredentialRecord]) -> rusqlite::Result<()>;

    /// Upsert `upserts`, then delete `removals`, in one transaction.
    fn apply(&self, upserts: &[CredentialRecord], removals: &[String]) -> rusqlite::Result<()>;

    fn remove(&self, key: &str) -> rusqlite::Result<bool>;

    /// Remove every record. Returns the number of rows deleted.
    fn remove_all(&self) -> rusqlite::Result<usize>;

    /// Remove every record except the identity record.
    fn remove_session(&self) -> rusqlite::Result<usize>;

    /// Remove records older than `cutoff_millis` whose kind is not protected.
    fn prune(&self, cutoff_millis: i64, protected_kinds: &[String]) -> rusqlite::Result<usize>;

    /// Keys currently stored, optionally restricted to one kind.
    fn keys(&self, kind: Option<&str>) -> rusqlite::Result<Vec<String>>;

    /// Make the on-disk state self-contained (WAL checkpoint).
    fn checkpoint(&self) -> rusqlite::Result<()>;
}

/// SQLite credential backend.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, crate::credentials::CredentialError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;
             PRAGMA temp_store=MEMORY;",
        )?;

        let backend = Self {
            conn: Mutex::new(conn),
        };
        backend.init_schema()?;
        tracing::debug!(path = %path.display(), "Credential database opened");
        Ok(backend)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let backend = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        backend.init_schema()?;
        Ok(backend)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                kind TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            ) WITHOUT ROWID;

            CREATE INDEX IF NOT EXISTS idx_credentials_kind ON credentials(kind);
            CREATE INDEX IF NOT EXISTS idx_credentials_updated_at ON credentials(updated_at);
            "#,
        )
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the guard cannot leave SQLite half-written;
        // transactions roll back on drop, so the poisoned guard is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialBackend for SqliteBackend {
    fn read(&self, key: &str) -> rusqlite::Result<Option<CredentialRecord>> {
        self.conn()
            .query_row(
                "SELECT key, value, updated_at FROM credentials WHERE key = ?1",
                params![key],
                |row| {
                    Ok(CredentialRecord {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    fn write_batch(&self, records: &[CredentialRecord]) -> rusqlite::Result<()> {
        self.apply(records, &[])
    }

    fn apply(&self, upserts: &[CredentialRecord], removals: &[String]) -> rusqlite::Result<()> {
        if upserts.is_empty() && removals.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO credentials (key, value, kind, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     kind = excluded.kind,
                     updated_at = excluded.updated_at",
            )?;
            for record in upserts {
                stmt.execute(params![
                    record.key,
                    record.value,
                    key_kind(&record.key),
                    record.updated_at
                ])?;
            }
            let mut delete = tx.prepare_cached("DELETE FROM credentials WHERE key = ?1")?;
            for key in removals {
                delete.execute(params![key])?;
            }
        }
        tx.commit()
    }

    fn remove(&self, key: &str) -> rusqlite::Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM credentials WHERE key = ?1", params![key])?;
        Ok(n > 0)
    }

    fn remove_all(&self) -> rusqlite::Result<usize> {
        self.conn().execute("DELETE FROM credentials", [])
    }

    fn remove_session(&self) -> rusqlite::Result<usize> {
        self.conn()
            .execute("DELETE FROM credentials WHERE key != ?1", params![CREDS_KEY])
    }

    fn prune(&self, cutoff_millis: i64, protected_kinds: &[String]) -> rusqlite::Result<usize> {
        let placeholders = (0..protected_kinds.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = if protected_kinds.is_empty() {
            "DELETE FROM credentials WHERE updated_at < ?1".to_string()
        } else {
            format!(
                "DELETE FROM credentials WHERE updated_at < ?1 AND kind NOT IN ({placeholders})"
            )
        };

        let mut values: Vec<rusqlite::types::Value> = vec![cutoff_millis.into()];
        values.extend(protected_kinds.iter().cloned().map(Into::into));
        self.conn().execute(&sql, params_from_iter(values))
    }

    fn keys(&self, kind: Option<&str>) -> rusqlite::Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = match kind {
            Some(_) => conn.prepare("SELECT key FROM credentials WHERE kind = ?1 ORDER BY key")?,
            None => conn.prepare("SELECT key FROM credentials ORDER BY key")?,
        };
        let keys = match kind {
            Some(kind) => stmt
                .query_map(params![kind], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?,
            None => stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?,
        };
        Ok(keys)
    }

    fn checkpoint(&self) -> rusqlite::Result<()> {
        // In-memory databases report the pragma as a no-op row.
        self.conn()
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .optional()
            .map(|_| ())
    }
}
