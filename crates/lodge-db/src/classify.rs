use lodge_common::{MigrationError, VersionKey};
use rusqlite::ErrorCode;

use crate::operation::SchemaOperation;

/// SQLite messages meaning the target object already exists or is missing.
const CONFLICT_PATTERNS: [&str; 7] = [
    "already exists",
    "duplicate column name",
    "no such table",
    "no such column",
    "no such index",
    "there is already another table or index",
    "no such collation",
];

fn is_connection_failure(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::PermissionDenied
        ),
        _ => false,
    }
}

pub(crate) fn is_schema_conflict(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONFLICT_PATTERNS.iter().any(|p| lower.contains(p))
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Errors on ledger and lock bookkeeping.
pub(crate) fn database(context: &str, err: rusqlite::Error) -> MigrationError {
    if is_connection_failure(&err) {
        MigrationError::Connection(format!("{context}: {err}"))
    } else {
        MigrationError::Database(format!("{context}: {err}"))
    }
}

/// Errors raised while executing one of a unit's operations.
pub(crate) fn operation(
    version: &VersionKey,
    op: &SchemaOperation,
    err: rusqlite::Error,
) -> MigrationError {
    let message = err.to_string();
    if is_connection_failure(&err) {
        MigrationError::Connection(format!("{version} ({op}): {message}"))
    } else if is_schema_conflict(&message) {
        MigrationError::SchemaConflict {
            version: version.clone(),
            operation: op.to_string(),
            message,
        }
    } else {
        MigrationError::OperationFailed {
            version: version.clone(),
            operation: op.to_string(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn drop_table(name: &str) -> SchemaOperation {
        SchemaOperation::DropTable { table: name.into() }
    }

    #[test]
    fn existence_errors_are_schema_conflicts() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.execute_batch("DROP TABLE \"Missing\"").unwrap_err();

        let classified = operation(&VersionKey::from("1"), &drop_table("Missing"), err);
        match classified {
            MigrationError::SchemaConflict {
                version, operation, ..
            } => {
                assert_eq!(version.as_str(), "1");
                assert_eq!(operation, "drop_table Missing");
            }
            other => panic!("expected SchemaConflict, got {other:?}"),
        }
    }

    #[test]
    fn constraint_errors_are_operation_failures() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES (1)", []).unwrap_err();
        assert!(is_constraint_violation(&err));

        let classified = operation(&VersionKey::from("2"), &drop_table("t"), err);
        assert!(matches!(classified, MigrationError::OperationFailed { .. }));
    }

    #[test]
    fn conflict_patterns_match_case_insensitively() {
        assert!(is_schema_conflict("table \"Roles\" already exists"));
        assert!(is_schema_conflict("Duplicate column name: MaxGuests"));
        assert!(!is_schema_conflict("NOT NULL constraint failed: Users.Email"));
    }
}
