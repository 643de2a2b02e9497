//! Signed prekey and one-time prekey records.

use rusqlite::{params, Connection, Row};
use xs_core::error::{XsError, XsResult};
use zeroize::Zeroize;

/// A signed prekey with its XEdDSA signature.
#[derive(Clone)]
pub struct SignedPreKeyRecord {
    pub id: u32,
    pub private_key: Vec<u8>,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub created_at: String,
}

impl SignedPreKeyRecord {
    /// Construct a SignedPreKeyRecord from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            private_key: row.get("private_key")?,
            public_key: row.get("public_key")?,
            signature: row.get("signature")?,
            created_at: row.get("created_at")?,
        })
    }

    /// Find a signed prekey by id.
    pub fn find_by_id(conn: &Connection, id: u32) -> XsResult<Option<Self>> {
        match conn.query_row(
            "SELECT * FROM signed_prekeys WHERE id = ?1",
            [id],
            Self::from_row,
        ) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(XsError::Database(e.to_string())),
        }
    }

    /// The most recently generated signed prekey (highest id).
    pub fn find_latest(conn: &Connection) -> XsResult<Option<Self>> {
        match conn.query_row(
            "SELECT * FROM signed_prekeys ORDER BY id DESC LIMIT 1",
            [],
            Self::from_row,
        ) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(XsError::Database(e.to_string())),
        }
    }

    /// Upsert this signed prekey.
    pub fn save(&self, conn: &Connection) -> XsResult<()> {
        conn.execute(
            "INSERT INTO signed_prekeys (id, private_key, public_key, signature, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                private_key = excluded.private_key,
                public_key = excluded.public_key,
                signature = excluded.signature,
                created_at = excluded.created_at",
            params![
                self.id,
                self.private_key,
                self.public_key,
                self.signature,
                self.created_at,
            ],
        )
        .map_err(|e| XsError::Database(e.to_string()))?;
        Ok(())
    }
}

impl Drop for SignedPreKeyRecord {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl std::fmt::Debug for SignedPreKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedPreKeyRecord")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// A one-time prekey. Removed once a session has consumed it.
#[derive(Clone)]
pub struct PreKeyRecord {
    pub id: u32,
    pub private_key: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl PreKeyRecord {
    /// Construct a PreKeyRecord from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            private_key: row.get("private_key")?,
            public_key: row.get("public_key")?,
        })
    }

    /// Find a prekey by id.
    pub fn find_by_id(conn: &Connection, id: u32) -> XsResult<Option<Self>> {
        match conn.query_row("SELECT * FROM prekeys WHERE id = ?1", [id], Self::from_row) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(XsError::Database(e.to_string())),
        }
    }

    /// All stored prekeys, ordered by id.
    pub fn list_all(conn: &Connection) -> XsResult<Vec<Self>> {
        let mut stmt = conn
            .prepare("SELECT * FROM prekeys ORDER BY id")
            .map_err(|e| XsError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], Self::from_row)
            .map_err(|e| XsError::Database(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| XsError::Database(e.to_string()))
    }

    /// Number of stored prekeys.
    pub fn count(conn: &Connection) -> XsResult<u32> {
        conn.query_row("SELECT COUNT(*) FROM prekeys", [], |row| row.get(0))
            .map_err(|e| XsError::Database(e.to_string()))
    }

    /// Highest prekey id ever stored, or 0.
    ///
    /// Read from the counter row, which survives deletion of the prekey
    /// itself, so consumed ids are never handed out again.
    pub fn max_id(conn: &Connection) -> XsResult<u32> {
        conn.query_row(
            "SELECT MAX(
                COALESCE((SELECT last_id FROM prekey_counter WHERE id = 1), 0),
                COALESCE((SELECT MAX(id) FROM prekeys), 0)
             )",
            [],
            |row| row.get(0),
        )
        .map_err(|e| XsError::Database(e.to_string()))
    }

    /// Upsert this prekey and advance the id counter.
    pub fn save(&self, conn: &Connection) -> XsResult<()> {
        conn.execute(
            "INSERT INTO prekeys (id, private_key, public_key) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                private_key = excluded.private_key,
                public_key = excluded.public_key",
            params![self.id, self.private_key, self.public_key],
        )
        .map_err(|e| XsError::Database(e.to_string()))?;
        conn.execute(
            "INSERT INTO prekey_counter (id, last_id) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET last_id = MAX(last_id, excluded.last_id)",
            [self.id],
        )
        .map_err(|e| XsError::Database(e.to_string()))?;
        Ok(())
    }

    /// Delete a prekey by id.
    pub fn delete(conn: &Connection, id: u32) -> XsResult<bool> {
        let changed = conn
            .execute("DELETE FROM prekeys WHERE id = ?1", [id])
            .map_err(|e| XsError::Database(e.to_string()))?;
        Ok(changed > 0)
    }
}

impl Drop for PreKeyRecord {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl std::fmt::Debug for PreKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreKeyRecord")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
