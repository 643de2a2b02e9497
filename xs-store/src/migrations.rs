//! Versioned database migrations.
//!
//! Migrations run sequentially from the current stored version to the latest.
//! Each migration is an idempotent SQL script.

use rusqlite::Connection;
use tracing::{debug, info, warn};
use xs_core::constants::DB_SCHEMA_VERSION;
use xs_core::error::{XsError, XsResult};

/// Run all pending migrations on the database.
pub fn run_migrations(conn: &Connection) -> XsResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version >= DB_SCHEMA_VERSION {
        debug!("key store schema is up to date (version {current_version})");
        return Ok(());
    }

    info!("running migrations from version {current_version} to {DB_SCHEMA_VERSION}");

    for version in (current_version + 1)..=DB_SCHEMA_VERSION {
        run_migration(conn, version)?;
    }

    set_schema_version(conn, DB_SCHEMA_VERSION)?;
    Ok(())
}

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> XsResult<i32> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
        .map_err(|e| XsError::Database(e.to_string()))?;

    if count == 0 {
        conn.execute("INSERT INTO schema_version (version) VALUES (0)", [])
            .map_err(|e| XsError::Database(e.to_string()))?;
        return Ok(0);
    }

    conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
        row.get(0)
    })
    .map_err(|e| XsError::Database(e.to_string()))
}

fn set_schema_version(conn: &Connection, version: i32) -> XsResult<()> {
    conn.execute("UPDATE schema_version SET version = ?1", [version])
        .map_err(|e| XsError::Database(e.to_string()))?;
    Ok(())
}

fn run_migration(conn: &Connection, version: i32) -> XsResult<()> {
    debug!("applying migration version {version}");

    match version {
        1 => migration_v1(conn),
        2 => migration_v2(conn),
        _ => {
            warn!("unknown migration version {version}, skipping");
            Ok(())
        }
    }
}

/// Migration v1: the initial schema comes from `schema::create_tables`.
/// Sessions written before trust tracking existed have no identity row;
/// those are dropped so they get rebuilt from a fresh bundle.
fn migration_v1(conn: &Connection) -> XsResult<()> {
    conn.execute(
        "DELETE FROM sessions WHERE NOT EXISTS (
            SELECT 1 FROM identities
            WHERE identities.jid = sessions.jid AND identities.device_id = sessions.device_id
        )",
        [],
    )
    .map_err(|e| XsError::Migration(e.to_string()))?;
    Ok(())
}

/// Migration v2: seed the prekey counter from the prekeys still on disk.
fn migration_v2(conn: &Connection) -> XsResult<()> {
    conn.execute(
        "INSERT INTO prekey_counter (id, last_id)
         SELECT 1, COALESCE(MAX(id), 0) FROM prekeys WHERE true
         ON CONFLICT(id) DO UPDATE SET last_id = MAX(last_id, excluded.last_id)",
        [],
    )
    .map_err(|e| XsError::Migration(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    #[test]
    fn test_migrations_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, DB_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_orphan_sessions_dropped() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO sessions (jid, device_id, state, updated_at)
             VALUES ('bob@example.com', 7, '{}', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        run_migrations(&conn).unwrap();

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn test_prekey_counter_seeded_from_existing_keys() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO prekeys (id, private_key, public_key) VALUES (41, x'00', x'05')",
            [],
        )
        .unwrap();
        run_migrations(&conn).unwrap();

        let last: u32 = conn
            .query_row("SELECT last_id FROM prekey_counter WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(last, 41);
    }
}
