//! Remote identity keys and trust decisions.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use xs_core::error::{XsError, XsResult};

/// Trust decision for a remote device's identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// No decision has been made yet.
    #[default]
    Undecided,
    /// Messages are encrypted for this device.
    Trusted,
    /// The device is excluded from encryption.
    Distrusted,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undecided => "undecided",
            Self::Trusted => "trusted",
            Self::Distrusted => "distrusted",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "trusted" => Self::Trusted,
            "distrusted" => Self::Distrusted,
            _ => Self::Undecided,
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity key seen for a remote device, with its trust level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub jid: String,
    pub device_id: u32,
    pub identity_key: Vec<u8>,
    pub trust: TrustLevel,
    pub first_seen: String,
}

impl IdentityRecord {
    /// A new undecided identity.
    pub fn new(jid: &str, device_id: u32, identity_key: Vec<u8>) -> Self {
        Self {
            jid: jid.to_string(),
            device_id,
            identity_key,
            trust: TrustLevel::Undecided,
            first_seen: super::now(),
        }
    }

    /// Construct an IdentityRecord from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let trust: String = row.get("trust")?;
        Ok(Self {
            jid: row.get("jid")?,
            device_id: row.get("device_id")?,
            identity_key: row.get("identity_key")?,
            trust: TrustLevel::from_str(&trust),
            first_seen: row.get("first_seen")?,
        })
    }

    /// Find the identity of one device.
    pub fn find(conn: &Connection, jid: &str, device_id: u32) -> XsResult<Option<Self>> {
        match conn.query_row(
            "SELECT * FROM identities WHERE jid = ?1 AND device_id = ?2",
            params![jid, device_id],
            Self::from_row,
        ) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(XsError::Database(e.to_string())),
        }
    }

    /// All identities recorded for a JID.
    pub fn find_for_jid(conn: &Connection, jid: &str) -> XsResult<Vec<Self>> {
        let mut stmt = conn
            .prepare("SELECT * FROM identities WHERE jid = ?1 ORDER BY device_id")
            .map_err(|e| XsError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([jid], Self::from_row)
            .map_err(|e| XsError::Database(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| XsError::Database(e.to_string()))
    }

    /// Upsert this identity.
    ///
    /// Storing a different key for a known device resets `first_seen`.
    pub fn save(&self, conn: &Connection) -> XsResult<()> {
        conn.execute(
            "INSERT INTO identities (jid, device_id, identity_key, trust, first_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(jid, device_id) DO UPDATE SET
                first_seen = CASE WHEN identity_key = excluded.identity_key
                                  THEN first_seen ELSE excluded.first_seen END,
                identity_key = excluded.identity_key,
                trust = excluded.trust",
            params![
                self.jid,
                self.device_id,
                self.identity_key,
                self.trust.as_str(),
                self.first_seen,
            ],
        )
        .map_err(|e| XsError::Database(e.to_string()))?;
        Ok(())
    }

    /// Change the trust level of a stored identity. Returns false if unknown.
    pub fn set_trust(
        conn: &Connection,
        jid: &str,
        device_id: u32,
        trust: TrustLevel,
    ) -> XsResult<bool> {
        let changed = conn
            .execute(
                "UPDATE identities SET trust = ?3 WHERE jid = ?1 AND device_id = ?2",
                params![jid, device_id, trust.as_str()],
            )
            .map_err(|e| XsError::Database(e.to_string()))?;
        Ok(changed > 0)
    }
}
