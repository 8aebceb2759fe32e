use chrono::{DateTime, Utc};
use lodge_common::{Result, VersionKey};
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{debug, warn};

use crate::classify;
use crate::database::table_exists;
use crate::dialect::quote_ident;

/// A persisted record of one applied migration unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub version: VersionKey,
    pub applied_at: DateTime<Utc>,
}

/// The ledger table: one row per applied unit, keyed by version.
///
/// Rows are written inside the same transaction as the unit's operations,
/// so a unit and its ledger row commit or roll back together.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        table_exists(conn, &self.table)
    }

    /// Create the ledger table if it is absent.
    pub fn ensure(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version_key TEXT PRIMARY KEY NOT NULL,
                applied_at TIMESTAMP NOT NULL
            );",
            quote_ident(&self.table)
        ))
        .map_err(|e| classify::database("failed to create ledger table", e))?;
        Ok(())
    }

    /// All entries in ascending version order. A missing ledger reads as empty.
    pub fn entries(&self, conn: &Connection) -> Result<Vec<LedgerEntry>> {
        if !self.exists(conn)? {
            debug!("ledger table {} does not exist yet", self.table);
            return Ok(Vec::new());
        }

        let mut stmt = conn
            .prepare(&format!(
                "SELECT version_key, applied_at FROM {} ORDER BY version_key ASC",
                quote_ident(&self.table)
            ))
            .map_err(|e| classify::database("failed to prepare ledger query", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(LedgerEntry {
                    version: VersionKey::from_string(row.get::<_, String>(0)?),
                    applied_at: parse_datetime(&row.get::<_, String>(1)?),
                })
            })
            .map_err(|e| classify::database("failed to query ledger", e))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| classify::database("failed to read ledger row", e))?);
        }
        Ok(entries)
    }

    pub fn record(
        &self,
        conn: &Connection,
        version: &VersionKey,
        applied_at: DateTime<Utc>,
    ) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (version_key, applied_at) VALUES (?1, ?2)",
                quote_ident(&self.table)
            ),
            params![version.as_str(), applied_at.to_rfc3339()],
        )
        .map_err(|e| classify::database(&format!("failed to record {version} in ledger"), e))?;
        Ok(())
    }

    /// Delete a version's row. Returns whether a row existed.
    pub fn remove(&self, conn: &Connection, version: &VersionKey) -> Result<bool> {
        let deleted = conn
            .execute(
                &format!(
                    "DELETE FROM {} WHERE version_key = ?1",
                    quote_ident(&self.table)
                ),
                params![version.as_str()],
            )
            .map_err(|e| {
                classify::database(&format!("failed to remove {version} from ledger"), e)
            })?;
        Ok(deleted > 0)
    }
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            // Rows written by hand with datetime('now') use "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or_else(|_| {
                    warn!("unreadable applied_at {s:?} in ledger, reporting it as the epoch");
                    DateTime::<Utc>::UNIX_EPOCH
                })
        })
}
