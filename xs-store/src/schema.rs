//! Database schema definitions and table creation.

use rusqlite::Connection;
use tracing::debug;
use xs_core::error::{XsError, XsResult};

/// Create all database tables and indexes if they do not exist.
pub fn create_tables(conn: &Connection) -> XsResult<()> {
    conn.execute_batch(SCHEMA_SQL)
        .map_err(|e| XsError::Database(format!("failed to create schema: {e}")))?;
    debug!("database schema verified");
    Ok(())
}

/// Drop all tables (used for store reset).
pub fn drop_tables(conn: &Connection) -> XsResult<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS sessions;
         DROP TABLE IF EXISTS identities;
         DROP TABLE IF EXISTS devices;
         DROP TABLE IF EXISTS prekeys;
         DROP TABLE IF EXISTS prekey_counter;
         DROP TABLE IF EXISTS signed_prekeys;
         DROP TABLE IF EXISTS own_identity;
         DROP TABLE IF EXISTS schema_version;",
    )
    .map_err(|e| XsError::Database(format!("failed to drop tables: {e}")))?;
    Ok(())
}

/// Complete SQL schema for all tables.
const SCHEMA_SQL: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

-- This device (singleton row)
CREATE TABLE IF NOT EXISTS own_identity (
    id                  INTEGER PRIMARY KEY CHECK (id = 1),
    device_id           INTEGER NOT NULL,
    registration_id     INTEGER NOT NULL,
    identity_private    BLOB NOT NULL,
    identity_public     BLOB NOT NULL,
    created_at          TEXT NOT NULL
);

-- Signed prekeys
CREATE TABLE IF NOT EXISTS signed_prekeys (
    id                  INTEGER PRIMARY KEY,
    private_key         BLOB NOT NULL,
    public_key          BLOB NOT NULL,
    signature           BLOB NOT NULL,
    created_at          TEXT NOT NULL
);

-- One-time prekeys
CREATE TABLE IF NOT EXISTS prekeys (
    id                  INTEGER PRIMARY KEY,
    private_key         BLOB NOT NULL,
    public_key          BLOB NOT NULL
);

-- Highest one-time prekey id ever generated (singleton row)
CREATE TABLE IF NOT EXISTS prekey_counter (
    id                  INTEGER PRIMARY KEY CHECK (id = 1),
    last_id             INTEGER NOT NULL
);

-- Cached device lists
CREATE TABLE IF NOT EXISTS devices (
    jid                 TEXT NOT NULL,
    device_id           INTEGER NOT NULL,
    active              INTEGER NOT NULL DEFAULT 1,
    last_seen           TEXT NOT NULL,
    PRIMARY KEY (jid, device_id)
);

CREATE INDEX IF NOT EXISTS idx_devices_jid ON devices(jid);

-- Remote identity keys and trust decisions
CREATE TABLE IF NOT EXISTS identities (
    jid                 TEXT NOT NULL,
    device_id           INTEGER NOT NULL,
    identity_key        BLOB NOT NULL,
    trust               TEXT NOT NULL DEFAULT 'undecided',
    first_seen          TEXT NOT NULL,
    PRIMARY KEY (jid, device_id)
);

-- Double Ratchet sessions
CREATE TABLE IF NOT EXISTS sessions (
    jid                 TEXT NOT NULL,
    device_id           INTEGER NOT NULL,
    state               TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    PRIMARY KEY (jid, device_id)
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_twice() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 8);
    }

    #[test]
    fn test_drop_tables() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        drop_tables(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }
}
