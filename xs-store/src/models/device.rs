//! Cached OMEMO device lists.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use xs_core::error::{XsError, XsResult};

/// One device id announced by a JID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub jid: String,
    pub device_id: u32,
    /// Whether the device is in the most recently seen device list.
    pub active: bool,
    pub last_seen: String,
}

impl DeviceRecord {
    /// Construct a DeviceRecord from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            jid: row.get("jid")?,
            device_id: row.get("device_id")?,
            active: row.get("active")?,
            last_seen: row.get("last_seen")?,
        })
    }

    /// All devices known for a JID, active or not.
    pub fn find_for_jid(conn: &Connection, jid: &str) -> XsResult<Vec<Self>> {
        let mut stmt = conn
            .prepare("SELECT * FROM devices WHERE jid = ?1 ORDER BY device_id")
            .map_err(|e| XsError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([jid], Self::from_row)
            .map_err(|e| XsError::Database(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| XsError::Database(e.to_string()))
    }

    /// Ids of the active devices for a JID.
    pub fn active_ids(conn: &Connection, jid: &str) -> XsResult<Vec<u32>> {
        Ok(Self::find_for_jid(conn, jid)?
            .into_iter()
            .filter(|d| d.active)
            .map(|d| d.device_id)
            .collect())
    }

    /// Store a freshly fetched device list for a JID.
    ///
    /// Listed devices are upserted as active. Known devices missing from the
    /// list are marked inactive rather than deleted, so their identities and
    /// sessions survive a device that temporarily drops off the list.
    pub fn replace_list(conn: &Connection, jid: &str, device_ids: &[u32]) -> XsResult<()> {
        let now = super::now();
        conn.execute("UPDATE devices SET active = 0 WHERE jid = ?1", [jid])
            .map_err(|e| XsError::Database(e.to_string()))?;
        for device_id in device_ids {
            conn.execute(
                "INSERT INTO devices (jid, device_id, active, last_seen) VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(jid, device_id) DO UPDATE SET
                    active = 1,
                    last_seen = excluded.last_seen",
                params![jid, device_id, now],
            )
            .map_err(|e| XsError::Database(e.to_string()))?;
        }
        Ok(())
    }
}
