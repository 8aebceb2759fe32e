use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::VersionKey;

pub type Result<T> = std::result::Result<T, MigrationError>;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("schema conflict in {version} ({operation}): {message}")]
    SchemaConflict {
        version: VersionKey,
        operation: String,
        message: String,
    },

    #[error("out of order: {0}")]
    OutOfOrder(String),

    #[error("migration {version} has no reverse action and cannot be rolled back")]
    IrreversibleUnit { version: VersionKey },

    #[error(
        "partial apply of {version}: the datastore ended the transaction after ({operation}); \
         schema may be partially migrated"
    )]
    PartialApply {
        version: VersionKey,
        operation: String,
    },

    #[error("operation failed in {version} ({operation}): {message}")]
    OperationFailed {
        version: VersionKey,
        operation: String,
        message: String,
    },

    #[error("migration lock is held by {owner} since {since}")]
    LockHeld { owner: String, since: DateTime<Utc> },

    #[error("unknown migration version: {0}")]
    UnknownVersion(VersionKey),

    #[error("invalid migration: {0}")]
    InvalidMigration(String),

    #[error("interrupted after {completed} migration(s)")]
    Interrupted { completed: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MigrationError {
    /// Stable short code used in CLI output and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::SchemaConflict { .. } => "schema_conflict",
            Self::OutOfOrder(_) => "out_of_order",
            Self::IrreversibleUnit { .. } => "irreversible_unit",
            Self::PartialApply { .. } => "partial_apply",
            Self::OperationFailed { .. } => "operation_failed",
            Self::LockHeld { .. } => "lock_held",
            Self::UnknownVersion(_) => "unknown_version",
            Self::InvalidMigration(_) => "invalid_migration",
            Self::Interrupted { .. } => "interrupted",
            Self::Config(_) => "config",
            Self::Database(_) => "database",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Process exit code for the CLI. Zero is never returned.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::UnknownVersion(_) | Self::InvalidMigration(_) | Self::Config(_) => 2,
            Self::Connection(_) => 3,
            Self::SchemaConflict { .. } => 4,
            Self::OutOfOrder(_) => 5,
            Self::IrreversibleUnit { .. } => 6,
            Self::PartialApply { .. } => 7,
            Self::LockHeld { .. } => 8,
            Self::OperationFailed { .. } => 9,
            Self::Interrupted { .. } => 130,
            Self::Database(_) | Self::Io(_) | Self::Serialization(_) => 1,
        }
    }

    /// Version key the failure is attributed to, when there is one.
    pub fn version(&self) -> Option<&VersionKey> {
        match self {
            Self::SchemaConflict { version, .. }
            | Self::IrreversibleUnit { version }
            | Self::PartialApply { version, .. }
            | Self::OperationFailed { version, .. }
            | Self::UnknownVersion(version) => Some(version),
            _ => None,
        }
    }
}
