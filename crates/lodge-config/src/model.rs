use std::path::PathBuf;

use lodge_common::types::{DEFAULT_LEDGER_TABLE, DEFAULT_LOCK_TABLE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
    pub ledger: LedgerConfig,
    pub log: LogConfig,
}

/// Target SQLite database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Create the database file when it does not exist yet.
    pub create_if_missing: bool,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("lodge.db"),
            create_if_missing: true,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Where migration files are read from: a directory or a single set file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub path: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("migrations"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub table: String,
    pub lock_table: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_LEDGER_TABLE.to_string(),
            lock_table: DEFAULT_LOCK_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info` or `lodge_db=debug`.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
