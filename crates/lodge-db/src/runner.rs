use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use lodge_common::types::{DEFAULT_LEDGER_TABLE, DEFAULT_LOCK_TABLE};
use lodge_common::{MigrationError, Result, VersionKey};
use rusqlite::{Connection, Transaction, TransactionBehavior, params_from_iter};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify;
use crate::database::Database;
use crate::dialect::{Dialect, SqliteDialect, Statement};
use crate::ledger::Ledger;
use crate::lock::MigrationLock;
use crate::migrations::MigrationUnit;
use crate::operation::SchemaOperation;
use crate::plan;

/// One row of `status` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitStatus {
    pub version: VersionKey,
    pub name: String,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

/// A pending unit and the SQL it would run.
#[derive(Debug, Clone)]
pub struct PlannedUnit {
    pub version: VersionKey,
    pub name: String,
    pub statements: Vec<Statement>,
}

#[derive(Clone, Copy)]
enum Direction {
    Up,
    Down,
}

/// Applies and rolls back migration units against a [`Database`].
///
/// Every unit runs in its own `BEGIN IMMEDIATE` transaction together with
/// its ledger write, and whole runs are serialised by an advisory lock row.
pub struct MigrationRunner<D = SqliteDialect> {
    ledger: Ledger,
    lock: MigrationLock,
    dialect: D,
    owner: String,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for MigrationRunner<SqliteDialect> {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationRunner<SqliteDialect> {
    pub fn new() -> Self {
        Self::with_dialect(SqliteDialect)
    }
}

impl<D: Dialect> MigrationRunner<D> {
    pub fn with_dialect(dialect: D) -> Self {
        Self {
            ledger: Ledger::new(DEFAULT_LEDGER_TABLE),
            lock: MigrationLock::new(DEFAULT_LOCK_TABLE),
            dialect,
            owner: format!("pid-{}-{}", std::process::id(), Uuid::new_v4()),
            cancel: None,
        }
    }

    pub fn with_tables(mut self, ledger_table: &str, lock_table: &str) -> Self {
        self.ledger = Ledger::new(ledger_table);
        self.lock = MigrationLock::new(lock_table);
        self
    }

    /// Checked between units; when set, the run stops with `Interrupted`.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn lock(&self) -> &MigrationLock {
        &self.lock
    }

    pub fn dialect_name(&self) -> &'static str {
        self.dialect.name()
    }

    /// Apply every pending unit. Returns how many were applied.
    pub fn apply(&self, db: &Database, units: &[MigrationUnit]) -> Result<usize> {
        self.apply_to(db, units, None)
    }

    /// Apply pending units up to and including `target`.
    pub fn apply_to(
        &self,
        db: &Database,
        units: &[MigrationUnit],
        target: Option<&VersionKey>,
    ) -> Result<usize> {
        self.check_units(units)?;

        let conn = db.connection()?;
        self.ledger.ensure(&conn)?;
        let _guard = self.lock.acquire(&conn, &self.owner)?;

        let applied = self.applied_versions(&conn)?;
        let applied_count = plan::applied_prefix(units, &applied)?;
        let pending = plan::pending(units, applied_count, target)?;

        if pending.is_empty() {
            info!("database is up to date ({applied_count} applied)");
            return Ok(0);
        }
        info!(
            dialect = self.dialect.name(),
            "applying {} pending migration(s)",
            pending.len()
        );

        let mut completed = 0;
        for unit in pending {
            self.check_cancelled(completed)?;
            self.run_unit(&conn, unit, Direction::Up)?;
            completed += 1;
        }

        info!("applied {completed} migration(s)");
        Ok(completed)
    }

    /// Roll back the `steps` most recently applied units, newest first.
    pub fn rollback(&self, db: &Database, units: &[MigrationUnit], steps: usize) -> Result<usize> {
        self.check_units(units)?;

        let conn = db.connection()?;
        let _guard = self.lock.acquire(&conn, &self.owner)?;

        let applied = self.applied_versions(&conn)?;
        let applied_count = plan::applied_prefix(units, &applied)?;
        if steps > applied_count {
            warn!("requested {steps} rollback step(s) but only {applied_count} applied");
        }
        let targets = plan::rollback_targets(units, applied_count, steps)?;

        if targets.is_empty() {
            info!("nothing to roll back");
            return Ok(0);
        }
        info!("rolling back {} migration(s)", targets.len());

        let mut completed = 0;
        for unit in targets {
            self.check_cancelled(completed)?;
            self.run_unit(&conn, unit, Direction::Down)?;
            completed += 1;
        }

        info!("rolled back {completed} migration(s)");
        Ok(completed)
    }

    /// Applied state of every unit, in declared order.
    ///
    /// Reads the ledger once; the returned iterator does no further I/O.
    /// Never creates the ledger table.
    pub fn status<'u>(
        &self,
        db: &Database,
        units: &'u [MigrationUnit],
    ) -> Result<impl Iterator<Item = UnitStatus> + use<'u, D>> {
        let applied: BTreeMap<VersionKey, DateTime<Utc>> = {
            let conn = db.connection()?;
            self.ledger
                .entries(&conn)?
                .into_iter()
                .map(|e| (e.version, e.applied_at))
                .collect()
        };

        Ok(units.iter().map(move |unit| {
            let applied_at = applied.get(&unit.version).copied();
            UnitStatus {
                version: unit.version.clone(),
                name: unit.name.clone(),
                applied: applied_at.is_some(),
                applied_at,
            }
        }))
    }

    /// Read-only consistency check of the unit list against the ledger.
    /// Returns the number of applied units.
    pub fn verify(&self, db: &Database, units: &[MigrationUnit]) -> Result<usize> {
        self.check_units(units)?;
        let conn = db.connection()?;
        let applied = self.applied_versions(&conn)?;
        plan::applied_prefix(units, &applied)
    }

    /// Render the SQL that `apply_to` would execute, without executing it.
    pub fn script(
        &self,
        db: &Database,
        units: &[MigrationUnit],
        target: Option<&VersionKey>,
    ) -> Result<Vec<PlannedUnit>> {
        let applied_count = self.verify(db, units)?;
        plan::pending(units, applied_count, target)?
            .iter()
            .map(|unit| {
                let mut statements = Vec::new();
                for op in &unit.up {
                    statements.extend(self.dialect.render(op)?);
                }
                Ok(PlannedUnit {
                    version: unit.version.clone(),
                    name: unit.name.clone(),
                    statements,
                })
            })
            .collect()
    }

    /// Remove a lock left behind by a killed process.
    pub fn force_unlock(&self, db: &Database) -> Result<bool> {
        let conn = db.connection()?;
        if let Some(holder) = self.lock.holder(&conn)? {
            warn!(
                "releasing migration lock held by {} since {}",
                holder.owner, holder.acquired_at
            );
        }
        self.lock.force_release(&conn)
    }

    fn check_units(&self, units: &[MigrationUnit]) -> Result<()> {
        plan::check_declared_order(units)?;

        // SQLite table names are case-insensitive.
        let reserved = [self.ledger.table(), self.lock.table()];
        for unit in units {
            let touched = unit
                .up
                .iter()
                .chain(unit.down.iter())
                .flat_map(SchemaOperation::tables)
                .find(|t| reserved.iter().any(|r| r.eq_ignore_ascii_case(t)));
            if let Some(table) = touched {
                return Err(MigrationError::InvalidMigration(format!(
                    "migration {} writes to reserved table {table}",
                    unit.version
                )));
            }
        }
        Ok(())
    }

    fn applied_versions(&self, conn: &Connection) -> Result<Vec<VersionKey>> {
        Ok(self
            .ledger
            .entries(conn)?
            .into_iter()
            .map(|e| e.version)
            .collect())
    }

    fn check_cancelled(&self, completed: usize) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::SeqCst) => {
                warn!("run interrupted after {completed} migration(s)");
                Err(MigrationError::Interrupted { completed })
            }
            _ => Ok(()),
        }
    }

    /// Run one unit in a single transaction. Dropping the transaction on any
    /// error rolls back both the operations and the ledger write.
    fn run_unit(&self, conn: &Connection, unit: &MigrationUnit, direction: Direction) -> Result<()> {
        let (verb, ops) = match direction {
            Direction::Up => ("applying", &unit.up),
            Direction::Down => ("rolling back", &unit.down),
        };
        info!(version = %unit.version, name = %unit.name, "{verb} migration");

        // The lock guard borrows `conn` immutably, so the transaction cannot
        // come from `Connection::transaction`.
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate).map_err(|e| {
            classify::database(
                &format!("failed to begin transaction for {}", unit.version),
                e,
            )
        })?;

        for op in ops {
            self.execute_operation(&tx, &unit.version, op)?;
        }

        match direction {
            Direction::Up => self.ledger.record(&tx, &unit.version, Utc::now())?,
            Direction::Down => {
                if !self.ledger.remove(&tx, &unit.version)? {
                    return Err(MigrationError::Database(format!(
                        "ledger entry for {} vanished during rollback",
                        unit.version
                    )));
                }
            }
        }

        tx.commit().map_err(|e| {
            classify::database(&format!("failed to commit migration {}", unit.version), e)
        })?;
        debug!(version = %unit.version, "committed");
        Ok(())
    }

    fn execute_operation(
        &self,
        tx: &Transaction<'_>,
        version: &VersionKey,
        op: &SchemaOperation,
    ) -> Result<()> {
        for statement in self.dialect.render(op)? {
            debug!(version = %version, sql = %statement.sql, "executing");
            let executed = if statement.params.is_empty() {
                tx.execute_batch(&statement.sql)
            } else {
                tx.execute(&statement.sql, params_from_iter(statement.params.iter()))
                    .map(|_| ())
            };
            executed.map_err(|e| classify::operation(version, op, e))?;

            // A statement that ends the transaction (COMMIT, VACUUM...) has
            // made everything before it permanent.
            if tx.is_autocommit() {
                return Err(MigrationError::PartialApply {
                    version: version.clone(),
                    operation: op.to_string(),
                });
            }
        }
        Ok(())
    }
}
