//! sqlite checkpoint store.
//!
//! Holds serialized risk checkpoints; the schema is an implementation
//! detail, payloads are opaque JSON. Failure to open the database at
//! startup is unrecoverable.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::Result;
use crate::risk::RiskCheckpoint;

pub struct CheckpointStore {
    conn: Mutex<Connection>,
}

impl CheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS risk_checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn write_checkpoint(&self, checkpoint: &RiskCheckpoint) -> Result<()> {
        let payload = serde_json::to_string(checkpoint)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO risk_checkpoints (created_at, payload) VALUES (?1, ?2)",
            rusqlite::params![checkpoint.at.to_rfc3339(), payload],
        )?;
        Ok(())
    }

    /// The most recent checkpoint, if any.
    pub fn latest_checkpoint(&self) -> Result<Option<RiskCheckpoint>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT payload FROM risk_checkpoints ORDER BY id DESC LIMIT 1")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => {
                let payload: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    /// Drop checkpoints older than the retention window, keeping the latest.
    pub fn prune(&self, keep: usize) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM risk_checkpoints WHERE id NOT IN (
                SELECT id FROM risk_checkpoints ORDER BY id DESC LIMIT ?1
            )",
            rusqlite::params![keep as i64],
        )?;
        Ok(())
    }
}
