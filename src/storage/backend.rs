use crate::config::DyndbConfig;
use crate::error::DyndbError;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;

/// Shared handle on the backing SQLite database.
///
/// One connection behind a mutex: every storage call is an independent
/// blocking transaction against it, so concurrent engine calls never
/// interfere with each other's results. Pool management beyond this
/// single connection is an external concern.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn open(config: &DyndbConfig) -> Result<Self, DyndbError> {
        let conn = match &config.db_path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        // LIKE must honor case so the case-insensitive operator variants
        // can opt in explicitly via lower() on both sides.
        conn.pragma_update(None, "case_sensitive_like", true)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with the connection locked. Keep the closure free of
    /// long computation; it holds the only connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DyndbError>,
    ) -> Result<T, DyndbError> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Runs `f` inside one transaction, committing on success.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, DyndbError>,
    ) -> Result<T, DyndbError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool, DyndbError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                [name],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Column the unique-constraint failure names, when `err` is one.
    /// SQLite reports `UNIQUE constraint failed: <table>.<column>`.
    pub fn unique_violation_column(err: &rusqlite::Error) -> Option<String> {
        let rusqlite::Error::SqliteFailure(failure, message) = err else {
            return None;
        };
        if failure.extended_code != rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            && failure.extended_code != rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return None;
        }
        let message = message.as_deref()?;
        let qualified = message.rsplit(": ").next()?;
        let column = qualified.rsplit('.').next()?;
        Some(column.trim().to_string())
    }
}
