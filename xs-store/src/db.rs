//! Database initialization, connection pooling, and lifecycle management.
//!
//! One SQLite file per account, in WAL mode with r2d2 connection pooling.
//! Runs an integrity check on open and applies versioned migrations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, error, warn};

use xs_core::error::{XsError, XsResult};

use crate::migrations;
use crate::schema;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

const POOL_SIZE: u32 = 2;

/// Database wrapper providing initialization, pooling, and lifecycle management.
#[derive(Clone)]
pub struct Database {
    pool: Arc<DbPool>,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the key database at the given path.
    ///
    /// This:
    /// 1. Creates the database file and parent directories if needed
    /// 2. Enables WAL mode
    /// 3. Sets up connection pooling
    /// 4. Runs an integrity check
    /// 5. Creates the schema tables and runs pending migrations
    pub fn open(db_path: &Path) -> XsResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        debug!("opening key store at {}", db_path.display());

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .connection_customizer(Box::new(ConnectionCustomizer))
            .build(manager)
            .map_err(|e| XsError::Pool(e.to_string()))?;

        let db = Self {
            pool: Arc::new(pool),
            path: db_path.to_path_buf(),
        };

        db.run_integrity_check()?;

        {
            let conn = db.conn()?;
            schema::create_tables(&conn)?;
            migrations::run_migrations(&conn)?;
        }

        Ok(db)
    }

    /// Path of the database file for an account inside a data directory.
    ///
    /// The bare JID is used as the file name, with path separators replaced.
    pub fn path_for_account(data_dir: &Path, bare_jid: &str) -> PathBuf {
        let name: String = bare_jid
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c => c,
            })
            .collect();
        data_dir.join(format!("{name}.db"))
    }

    /// Get a connection from the pool.
    pub fn conn(&self) -> XsResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| XsError::Pool(e.to_string()))
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a SQLite integrity check.
    pub fn run_integrity_check(&self) -> XsResult<()> {
        let conn = self.conn()?;
        let result: String = conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .map_err(|e| XsError::Database(e.to_string()))?;

        if result != "ok" {
            error!("key store integrity check failed: {result}");
            return Err(XsError::IntegrityCheck(result));
        }

        Ok(())
    }

    /// Execute a function within a database transaction.
    pub fn transaction<T, F>(&self, f: F) -> XsResult<T>
    where
        F: FnOnce(&Connection) -> XsResult<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| XsError::Database(e.to_string()))?;

        let result = f(&tx)?;

        tx.commit().map_err(|e| XsError::Database(e.to_string()))?;

        Ok(result)
    }

    /// Get database statistics (row counts per table).
    pub fn stats(&self) -> XsResult<DatabaseStats> {
        let conn = self.conn()?;

        let count = |table: &str| -> XsResult<i64> {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            conn.query_row(&sql, [], |row| row.get(0))
                .map_err(|e| XsError::Database(e.to_string()))
        };

        Ok(DatabaseStats {
            signed_prekeys: count("signed_prekeys")?,
            prekeys: count("prekeys")?,
            devices: count("devices")?,
            identities: count("identities")?,
            sessions: count("sessions")?,
        })
    }

    /// Reset the store by dropping and recreating all tables.
    ///
    /// This throws away the own identity; the next run publishes a new device.
    pub fn reset(&self) -> XsResult<()> {
        warn!("resetting key store - all keys and sessions will be lost");
        let conn = self.conn()?;
        schema::drop_tables(&conn)?;
        schema::create_tables(&conn)?;
        migrations::run_migrations(&conn)?;
        Ok(())
    }
}

/// Database row count statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub signed_prekeys: i64,
    pub prekeys: i64,
    pub devices: i64,
    pub identities: i64,
    pub sessions: i64,
}

impl std::fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "signed_prekeys={}, prekeys={}, devices={}, identities={}, sessions={}",
            self.signed_prekeys, self.prekeys, self.devices, self.identities, self.sessions
        )
    }
}

/// r2d2 connection customizer that applies PRAGMA settings.
#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA temp_store=MEMORY;
             PRAGMA busy_timeout=5000;
             PRAGMA foreign_keys=ON;",
        )?;
        Ok(())
    }
}
