use chrono::{DateTime, Utc};
use lodge_common::{MigrationError, Result};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use crate::classify;
use crate::dialect::quote_ident;
use crate::ledger::parse_datetime;

/// Current owner of the advisory lock.
#[derive(Debug, Clone, PartialEq)]
pub struct LockHolder {
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
}

/// Advisory lock stored as a single row in its own table.
///
/// The row is inserted in autocommit mode so other processes see it, and
/// removed by [`LockGuard`] when the run ends.
#[derive(Debug, Clone)]
pub struct MigrationLock {
    table: String,
}

impl MigrationLock {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn ensure(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                owner TEXT NOT NULL,
                acquired_at TIMESTAMP NOT NULL
            );",
            quote_ident(&self.table)
        ))
        .map_err(|e| classify::database("failed to create lock table", e))?;
        Ok(())
    }

    /// Take the lock or fail with `LockHeld` naming the current owner.
    pub fn acquire<'c>(&self, conn: &'c Connection, owner: &str) -> Result<LockGuard<'c>> {
        self.ensure(conn)?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO {} (id, owner, acquired_at) VALUES (1, ?1, ?2)",
                quote_ident(&self.table)
            ),
            params![owner, Utc::now().to_rfc3339()],
        );

        match inserted {
            Ok(_) => {
                debug!("migration lock acquired by {owner}");
                Ok(LockGuard {
                    conn,
                    table: self.table.clone(),
                    owner: owner.to_string(),
                })
            }
            Err(e) if classify::is_constraint_violation(&e) => {
                let holder = self.holder(conn)?;
                Err(match holder {
                    Some(h) => MigrationError::LockHeld {
                        owner: h.owner,
                        since: h.acquired_at,
                    },
                    // Released between our insert and the read; report it anyway.
                    None => MigrationError::Database(format!("failed to acquire lock: {e}")),
                })
            }
            Err(e) => Err(classify::database("failed to acquire lock", e)),
        }
    }

    pub fn holder(&self, conn: &Connection) -> Result<Option<LockHolder>> {
        if !crate::database::table_exists(conn, &self.table)? {
            return Ok(None);
        }
        conn.query_row(
            &format!(
                "SELECT owner, acquired_at FROM {} WHERE id = 1",
                quote_ident(&self.table)
            ),
            [],
            |row| {
                Ok(LockHolder {
                    owner: row.get(0)?,
                    acquired_at: parse_datetime(&row.get::<_, String>(1)?),
                })
            },
        )
        .optional()
        .map_err(|e| classify::database("failed to read lock", e))
    }

    /// Remove the lock row regardless of owner. Returns whether one existed.
    pub fn force_release(&self, conn: &Connection) -> Result<bool> {
        if !crate::database::table_exists(conn, &self.table)? {
            return Ok(false);
        }
        let deleted = conn
            .execute(&format!("DELETE FROM {}", quote_ident(&self.table)), [])
            .map_err(|e| classify::database("failed to release lock", e))?;
        Ok(deleted > 0)
    }
}

/// Holds the advisory lock; releases it on drop.
pub struct LockGuard<'c> {
    conn: &'c Connection,
    table: String,
    owner: String,
}

impl LockGuard<'_> {
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let released = self.conn.execute(
            &format!("DELETE FROM {} WHERE owner = ?1", quote_ident(&self.table)),
            params![self.owner],
        );
        match released {
            Ok(_) => debug!("migration lock released by {}", self.owner),
            Err(e) => warn!("failed to release migration lock held by {}: {e}", self.owner),
        }
    }
}
