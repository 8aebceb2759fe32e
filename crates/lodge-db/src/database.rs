use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use lodge_common::{MigrationError, Result};
use rusqlite::{Connection, OpenFlags, params};
use tracing::info;

use crate::classify;

#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub create_if_missing: bool,
    pub busy_timeout: Duration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to the target database that migrations are applied to.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open(db_path: &Path, options: &OpenOptions) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if options.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let conn = Connection::open_with_flags(db_path, flags).map_err(|e| {
            MigrationError::Connection(format!(
                "failed to open database {}: {e}",
                db_path.display()
            ))
        })?;

        Self::configure(&conn, options.busy_timeout)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(db_path.to_path_buf()),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            MigrationError::Connection(format!("failed to open in-memory database: {e}"))
        })?;

        Self::configure(&conn, OpenOptions::default().busy_timeout)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn configure(conn: &Connection, busy_timeout: Duration) -> Result<()> {
        conn.busy_timeout(busy_timeout)
            .map_err(|e| classify::database("failed to set busy timeout", e))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| classify::database("failed to set pragmas", e))?;

        // Surfaces "file is not a database" at open time rather than mid-run.
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| classify::database("failed to read schema", e))?;
        Ok(())
    }

    /// Lock the underlying connection.
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MigrationError::Database("database lock poisoned".into()))
    }

    /// Database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let conn = self.connection()?;
        table_exists(&conn, name)
    }

    pub fn index_exists(&self, name: &str) -> Result<bool> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type = 'index' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .map_err(|e| classify::database("failed to inspect indexes", e))
    }

    /// Column names of `table` in declaration order; empty when the table is missing.
    pub fn column_names(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(|e| classify::database("failed to prepare query", e))?;

        let rows = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))
            .map_err(|e| classify::database("failed to query columns", e))?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row.map_err(|e| classify::database("failed to read column row", e))?);
        }
        Ok(columns)
    }

    /// Number of rows in `table`.
    pub fn row_count(&self, table: &str) -> Result<i64> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            crate::dialect::quote_ident(table)
        );
        conn.query_row(&sql, [], |row| row.get(0))
            .map_err(|e| classify::database(&format!("failed to count rows in {table}"), e))
    }
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT count(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )
    .map_err(|e| classify::database("failed to inspect tables", e))
}
