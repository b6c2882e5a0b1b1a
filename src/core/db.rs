//! SQLite document backend.
//!
//! Stores each document as one row keyed by its document key. WAL mode plus a
//! busy timeout lets several processes share one state root; every write is a
//! single-statement upsert, so a reader never observes a half-written document.

use crate::core::error::StewardError;
use crate::core::store::StorageBackend;
use crate::core::time;
use rusqlite::{Connection, OptionalExtension, params};
use std::fs;
use std::path::{Path, PathBuf};

pub const STEWARD_DB_NAME: &str = "steward.db";

const SCHEMA_DOCUMENTS: &str = "CREATE TABLE IF NOT EXISTS documents (
    key TEXT PRIMARY KEY,
    body BLOB NOT NULL,
    updated_at TEXT NOT NULL
)";

const SCHEMA_QUARANTINE: &str = "CREATE TABLE IF NOT EXISTS quarantine (
    key TEXT PRIMARY KEY,
    original_key TEXT NOT NULL,
    body BLOB NOT NULL,
    quarantined_at TEXT NOT NULL
)";

pub fn db_connect(db_path: &Path) -> Result<Connection, StewardError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    Ok(conn)
}

pub fn steward_db_path(root: &Path) -> PathBuf {
    root.join(STEWARD_DB_NAME)
}

pub struct SqliteBackend {
    db_path: PathBuf,
}

impl SqliteBackend {
    pub fn open(root: &Path) -> Result<Self, StewardError> {
        fs::create_dir_all(root)
            .map_err(|e| StewardError::StorageError(format!("mkdir {}: {e}", root.display())))?;
        let db_path = steward_db_path(root);
        let conn = db_connect(&db_path).map_err(wrap)?;
        conn.execute(SCHEMA_DOCUMENTS, []).map_err(sql)?;
        conn.execute(SCHEMA_QUARANTINE, []).map_err(sql)?;
        Ok(Self { db_path })
    }

    fn conn(&self) -> Result<Connection, StewardError> {
        db_connect(&self.db_path).map_err(wrap)
    }
}

fn sql(e: rusqlite::Error) -> StewardError {
    StewardError::StorageError(format!("sqlite: {e}"))
}

fn wrap(e: StewardError) -> StewardError {
    match e {
        StewardError::RusqliteError(inner) => sql(inner),
        other => other,
    }
}

impl StorageBackend for SqliteBackend {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StewardError> {
        self.conn()?
            .query_row(
                "SELECT body FROM documents WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(sql)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StewardError> {
        self.conn()?
            .execute(
                "INSERT INTO documents(key, body, updated_at) VALUES(?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                params![key, bytes, time::now().to_rfc3339()],
            )
            .map_err(sql)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StewardError> {
        self.conn()?
            .execute("DELETE FROM documents WHERE key = ?1", params![key])
            .map_err(sql)?;
        Ok(())
    }

    fn quarantine(&self, key: &str) -> Result<Option<String>, StewardError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(sql)?;
        let body: Option<Vec<u8>> = tx
            .query_row(
                "SELECT body FROM documents WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql)?;
        let Some(body) = body else {
            return Ok(None);
        };
        let target_key = format!("{key}.corrupt-{}", time::new_event_id());
        tx.execute(
            "INSERT INTO quarantine(key, original_key, body, quarantined_at) VALUES(?1, ?2, ?3, ?4)",
            params![target_key, key, body, time::now().to_rfc3339()],
        )
        .map_err(sql)?;
        tx.execute("DELETE FROM documents WHERE key = ?1", params![key])
            .map_err(sql)?;
        tx.commit().map_err(sql)?;
        Ok(Some(target_key))
    }

    fn keys(&self) -> Result<Vec<String>, StewardError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key FROM documents ORDER BY key")
            .map_err(sql)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(sql)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(sql)?);
        }
        Ok(out)
    }
}
