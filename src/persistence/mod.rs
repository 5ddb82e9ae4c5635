//! SQLite-backed persistence for instance records. A status transition is
//! never more than one write behind the in-memory state, and a write
//! failure surfaces to the caller without undoing in-memory state.

mod instances;

pub use instances::InstanceRecord;

use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Owns the single SQLite connection backing instance persistence.
pub struct PersistenceStore {
    conn: Mutex<Connection>,
}

impl PersistenceStore {
    pub fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init_tables(&conn)?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> PersistenceResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_tables(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_tables(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS instances (
                name TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                owner TEXT,
                options_json TEXT NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
            "#,
        )
    }

    pub async fn upsert(&self, record: &InstanceRecord) -> PersistenceResult<()> {
        let conn = self.conn.lock().await;
        instances::upsert(&conn, record)
    }

    pub async fn delete(&self, name: &str) -> PersistenceResult<()> {
        let conn = self.conn.lock().await;
        instances::delete(&conn, name)
    }

    pub async fn load_all(&self) -> PersistenceResult<Vec<InstanceRecord>> {
        let conn = self.conn.lock().await;
        instances::load_all(&conn)
    }
}
