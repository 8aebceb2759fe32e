use lodge_common::{MigrationError, Result};

/// Identifier and type-name checks applied before any SQL is rendered.
pub struct IdentifierValidator;

impl IdentifierValidator {
    pub const MAX_LEN: usize = 128;

    /// Validate a table, column or index name. Names are always quoted when
    /// rendered, so anything printable is accepted.
    pub fn validate(kind: &str, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(MigrationError::InvalidMigration(format!(
                "{kind} name cannot be empty"
            )));
        }
        if name.chars().count() > Self::MAX_LEN {
            return Err(MigrationError::InvalidMigration(format!(
                "{kind} name too long: {name}"
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(MigrationError::InvalidMigration(format!(
                "{kind} name contains control characters: {name:?}"
            )));
        }
        Ok(())
    }

    /// Validate a name that is rendered unquoted, such as a pragma.
    pub fn validate_bare(kind: &str, name: &str) -> Result<()> {
        Self::validate(kind, name)?;
        let mut chars = name.chars();
        let head_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(MigrationError::InvalidMigration(format!(
                "{kind} must be a plain identifier: {name}"
            )));
        }
        Ok(())
    }

    /// Validate a column type such as `TEXT`, `VARCHAR(64)` or `DECIMAL(10, 2)`.
    pub fn validate_type(column: &str, sql_type: &str) -> Result<()> {
        if sql_type.trim().is_empty() {
            return Err(MigrationError::InvalidMigration(format!(
                "column {column} has an empty type"
            )));
        }
        let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ',');
        if !sql_type.chars().all(allowed) {
            return Err(MigrationError::InvalidMigration(format!(
                "column {column} has an invalid type: {sql_type}"
            )));
        }
        Ok(())
    }
}
