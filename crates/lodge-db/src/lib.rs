mod classify;
pub mod database;
pub mod dialect;
pub mod ledger;
pub mod lock;
pub mod migrations;
pub mod operation;
pub mod plan;
pub mod runner;
pub mod validation;

pub use database::{Database, OpenOptions};
pub use dialect::{Dialect, SqliteDialect, Statement};
pub use ledger::{Ledger, LedgerEntry};
pub use lock::{LockGuard, LockHolder, MigrationLock};
pub use migrations::{MigrationUnit, load_migrations};
pub use operation::{ColumnDef, ForeignKey, OnDelete, SchemaOperation, SqlValue};
pub use runner::{MigrationRunner, PlannedUnit, UnitStatus};
pub use validation::IdentifierValidator;
