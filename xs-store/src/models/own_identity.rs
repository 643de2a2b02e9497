//! The local device: device id, registration id, and identity key pair.

use rusqlite::{params, Connection, Row};
use xs_core::error::{XsError, XsResult};
use zeroize::Zeroize;

/// Identity of this OMEMO device. There is at most one row per store.
#[derive(Clone)]
pub struct OwnIdentity {
    pub device_id: u32,
    pub registration_id: u32,
    pub identity_private: Vec<u8>,
    pub identity_public: Vec<u8>,
    pub created_at: String,
}

impl OwnIdentity {
    /// Construct an OwnIdentity from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            device_id: row.get("device_id")?,
            registration_id: row.get("registration_id")?,
            identity_private: row.get("identity_private")?,
            identity_public: row.get("identity_public")?,
            created_at: row.get("created_at")?,
        })
    }

    /// Load the own identity, if one has been generated.
    pub fn load(conn: &Connection) -> XsResult<Option<Self>> {
        match conn.query_row("SELECT * FROM own_identity WHERE id = 1", [], Self::from_row) {
            Ok(identity) => Ok(Some(identity)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(XsError::Database(e.to_string())),
        }
    }

    /// Insert or replace the own identity.
    pub fn save(&self, conn: &Connection) -> XsResult<()> {
        conn.execute(
            "INSERT INTO own_identity (
                id, device_id, registration_id, identity_private, identity_public, created_at
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                device_id = excluded.device_id,
                registration_id = excluded.registration_id,
                identity_private = excluded.identity_private,
                identity_public = excluded.identity_public,
                created_at = excluded.created_at",
            params![
                self.device_id,
                self.registration_id,
                self.identity_private,
                self.identity_public,
                self.created_at,
            ],
        )
        .map_err(|e| XsError::Database(e.to_string()))?;
        Ok(())
    }
}

impl std::fmt::Debug for OwnIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnIdentity")
            .field("device_id", &self.device_id)
            .field("registration_id", &self.registration_id)
            .field("identity_public", &self.identity_public)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Drop for OwnIdentity {
    fn drop(&mut self) {
        self.identity_private.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        conn
    }

    fn identity(device_id: u32) -> OwnIdentity {
        OwnIdentity {
            device_id,
            registration_id: 4242,
            identity_private: vec![1; 32],
            identity_public: vec![5; 33],
            created_at: "2024-01-01T00:00:00+00:00".into(),
        }
    }

    #[test]
    fn test_load_empty() {
        assert!(OwnIdentity::load(&conn()).unwrap().is_none());
    }

    #[test]
    fn test_save_and_replace() {
        let conn = conn();
        identity(100).save(&conn).unwrap();
        identity(200).save(&conn).unwrap();

        let loaded = OwnIdentity::load(&conn).unwrap().unwrap();
        assert_eq!(loaded.device_id, 200);
        assert_eq!(loaded.registration_id, 4242);
        assert_eq!(loaded.identity_private, vec![1; 32]);

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM own_identity", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_debug_hides_private_key() {
        let text = format!("{:?}", identity(1));
        assert!(!text.contains("identity_private"));
    }
}
