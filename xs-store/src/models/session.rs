//! Persisted Double Ratchet sessions.

use rusqlite::{params, Connection, Row};
use xs_core::error::{XsError, XsResult};

/// Serialized ratchet state for one remote device.
///
/// The state itself is opaque JSON here; the OMEMO layer owns its shape.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub jid: String,
    pub device_id: u32,
    pub state: String,
    pub updated_at: String,
}

impl SessionRecord {
    pub fn new(jid: &str, device_id: u32, state: String) -> Self {
        Self {
            jid: jid.to_string(),
            device_id,
            state,
            updated_at: super::now(),
        }
    }

    /// Construct a SessionRecord from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            jid: row.get("jid")?,
            device_id: row.get("device_id")?,
            state: row.get("state")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Find the session with one device.
    pub fn find(conn: &Connection, jid: &str, device_id: u32) -> XsResult<Option<Self>> {
        match conn.query_row(
            "SELECT * FROM sessions WHERE jid = ?1 AND device_id = ?2",
            params![jid, device_id],
            Self::from_row,
        ) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(XsError::Database(e.to_string())),
        }
    }

    /// Upsert this session.
    pub fn save(&self, conn: &Connection) -> XsResult<()> {
        conn.execute(
            "INSERT INTO sessions (jid, device_id, state, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(jid, device_id) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at",
            params![self.jid, self.device_id, self.state, self.updated_at],
        )
        .map_err(|e| XsError::Database(e.to_string()))?;
        Ok(())
    }

    /// Delete the session with one device.
    pub fn delete(conn: &Connection, jid: &str, device_id: u32) -> XsResult<bool> {
        let changed = conn
            .execute(
                "DELETE FROM sessions WHERE jid = ?1 AND device_id = ?2",
                params![jid, device_id],
            )
            .map_err(|e| XsError::Database(e.to_string()))?;
        Ok(changed > 0)
    }
}
