//! facematch-store: identity records in SQLite.
//!
//! One row per identity: an opaque id, an optional display name and the
//! path of its reference image. Rows with no image path are still listed;
//! the gallery cache skips them.

use facematch_core::provider::{IdentityStore, StoreError};
use facematch_core::types::IdentityRecord;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS identities (
  id TEXT PRIMARY KEY,
  name TEXT,
  image_path TEXT
);
"#;

/// Full identity row, including the display name the engine ignores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredIdentity {
    pub id: String,
    pub name: Option<String>,
    pub image_path: Option<String>,
}

impl From<StoredIdentity> for IdentityRecord {
    fn from(row: StoredIdentity) -> Self {
        IdentityRecord {
            id: row.id,
            image_path: row.image_path.unwrap_or_default(),
        }
    }
}

pub struct SqliteIdentityStore {
    conn: Mutex<Connection>,
}

impl SqliteIdentityStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(query_err)?;
        tracing::debug!(path = %path.display(), "identity store opened");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(query_err)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn upsert(&self, identity: &StoredIdentity) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO identities (id, name, image_path) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, image_path = excluded.image_path",
                params![identity.id, identity.name, identity.image_path],
            )
            .map_err(query_err)?;
        Ok(())
    }

    /// Returns whether a row was deleted.
    pub fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let n = self
            .conn()
            .execute("DELETE FROM identities WHERE id = ?1", params![id])
            .map_err(query_err)?;
        Ok(n > 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<StoredIdentity>, StoreError> {
        self.conn()
            .query_row(
                "SELECT id, name, image_path FROM identities WHERE id = ?1",
                params![id],
                row_to_identity,
            )
            .optional()
            .map_err(query_err)
    }

    pub fn list(&self) -> Result<Vec<StoredIdentity>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, name, image_path FROM identities ORDER BY rowid")
            .map_err(query_err)?;
        let rows = stmt.query_map([], row_to_identity).map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    /// Replace every row with `identities` in one transaction.
    pub fn replace_all(&self, identities: &[StoredIdentity]) -> Result<usize, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(query_err)?;
        tx.execute("DELETE FROM identities", []).map_err(query_err)?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO identities (id, name, image_path) VALUES (?1, ?2, ?3)")
                .map_err(query_err)?;
            for identity in identities {
                stmt.execute(params![identity.id, identity.name, identity.image_path])
                    .map_err(query_err)?;
            }
        }
        tx.commit().map_err(query_err)?;
        tracing::info!(count = identities.len(), "identity store reseeded");
        Ok(identities.len())
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn list_identities(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        Ok(self.list()?.into_iter().map(IdentityRecord::from).collect())
    }
}

fn row_to_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredIdentity> {
    Ok(StoredIdentity {
        id: row.get(0)?,
        name: row.get(1)?,
        image_path: row.get(2)?,
    })
}

fn query_err(e: rusqlite::Error) -> StoreError {
    StoreError::Query(e.to_string())
}
