//! Row mapping for the `instances` table.

use rusqlite::Connection;

use super::{PersistenceError, PersistenceResult};
use crate::instance::options::Options;
use crate::instance::status::Status;

#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub name: String,
    pub created_at: i64,
    pub status: Status,
    pub owner: Option<String>,
    pub options: Options,
}

pub fn upsert(conn: &Connection, record: &InstanceRecord) -> PersistenceResult<()> {
    let options_json = serde_json::to_string(&record.options).map_err(|e| PersistenceError::Serialization(e.to_string()))?;
    conn.execute(
        r#"
        INSERT INTO instances (name, created_at, status, owner, options_json, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, strftime('%s', 'now'))
        ON CONFLICT(name) DO UPDATE SET
            status = excluded.status,
            owner = excluded.owner,
            options_json = excluded.options_json,
            updated_at = excluded.updated_at
        "#,
        rusqlite::params![
            record.name,
            record.created_at,
            record.status.to_string(),
            record.owner,
            options_json,
        ],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, name: &str) -> PersistenceResult<()> {
    conn.execute("DELETE FROM instances WHERE name = ?1", [name])?;
    Ok(())
}

pub fn load_all(conn: &Connection) -> PersistenceResult<Vec<InstanceRecord>> {
    let mut stmt = conn.prepare("SELECT name, created_at, status, owner, options_json FROM instances")?;
    let rows = stmt.query_map([], |row| {
        let name: String = row.get(0)?;
        let created_at: i64 = row.get(1)?;
        let status: String = row.get(2)?;
        let owner: Option<String> = row.get(3)?;
        let options_json: String = row.get(4)?;
        Ok((name, created_at, status, owner, options_json))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (name, created_at, status, owner, options_json) = row?;
        let options: Options =
            serde_json::from_str(&options_json).map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        records.push(InstanceRecord {
            name,
            created_at,
            status: Status::from_wire(&status),
            owner,
            options,
        });
    }
    Ok(records)
}
