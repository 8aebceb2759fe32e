use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved name of the ledger table.
pub const DEFAULT_LEDGER_TABLE: &str = "_lodge_migrations";
/// Reserved name of the advisory lock table.
pub const DEFAULT_LOCK_TABLE: &str = "_lodge_migrations_lock";

/// Identity of a migration unit. Keys sort lexically, so timestamp keys
/// must be fixed-width (`20240105093000`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionKey(String);

impl VersionKey {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionKey {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}
