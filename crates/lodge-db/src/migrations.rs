//! Migration units and the files they are loaded from.
//!
//! Each unit has a version key, a name, and forward (`up`) and reverse
//! (`down`) operation lists. Units are applied in declared order and tracked
//! in the ledger table.
use std::collections::HashSet;
use std::path::Path;

use lodge_common::{MigrationError, Result, VersionKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dialect::{Dialect, SqliteDialect};
use crate::operation::SchemaOperation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationUnit {
    pub version: VersionKey,
    pub name: String,
    #[serde(default)]
    pub up: Vec<SchemaOperation>,
    /// Empty means the unit cannot be rolled back.
    #[serde(default)]
    pub down: Vec<SchemaOperation>,
}

impl MigrationUnit {
    pub fn new(version: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            version: VersionKey::from_string(version),
            name: name.into(),
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    pub fn with_up(mut self, op: SchemaOperation) -> Self {
        self.up.push(op);
        self
    }

    pub fn with_down(mut self, op: SchemaOperation) -> Self {
        self.down.push(op);
        self
    }

    pub fn is_reversible(&self) -> bool {
        !self.down.is_empty()
    }

    /// Check that the unit is well-formed and every operation renders.
    pub fn validate(&self) -> Result<()> {
        if self.version.is_empty() {
            return Err(MigrationError::InvalidMigration(format!(
                "migration {:?} has an empty version",
                self.name
            )));
        }
        if self.version.as_str().chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(MigrationError::InvalidMigration(format!(
                "version {:?} contains whitespace",
                self.version.as_str()
            )));
        }
        if self.up.is_empty() {
            return Err(MigrationError::InvalidMigration(format!(
                "migration {} has no forward operations",
                self.version
            )));
        }

        let dialect = SqliteDialect;
        for op in self.up.iter().chain(self.down.iter()) {
            dialect.render(op).map_err(|e| {
                MigrationError::InvalidMigration(format!("{} ({op}): {e}", self.version))
            })?;
        }
        Ok(())
    }
}

/// Validate every unit and reject duplicate versions. Ordering is left to
/// the runner so that a misordered list is reported as out of order.
pub fn validate_units(units: &[MigrationUnit]) -> Result<()> {
    let mut seen = HashSet::new();
    for unit in units {
        unit.validate()?;
        if !seen.insert(&unit.version) {
            return Err(MigrationError::InvalidMigration(format!(
                "duplicate migration version {}",
                unit.version
            )));
        }
    }
    Ok(())
}

/// Load units from a directory (files in name order) or a single file.
pub fn load_migrations(path: &Path) -> Result<Vec<MigrationUnit>> {
    let units = if path.is_dir() {
        load_dir(path)?
    } else if path.is_file() {
        load_file(path)?
    } else {
        return Err(MigrationError::Config(format!(
            "migrations path {} does not exist",
            path.display()
        )));
    };

    validate_units(&units)?;
    debug!("loaded {} migration(s) from {}", units.len(), path.display());
    Ok(units)
}

fn load_dir(dir: &Path) -> Result<Vec<MigrationUnit>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_migration_file(&path) {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        warn!("no migration files found in {}", dir.display());
    }

    let mut units = Vec::new();
    for file in files {
        units.extend(load_file(&file)?);
    }
    Ok(units)
}

fn is_migration_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("toml" | "yml" | "yaml")
    )
}

#[derive(Deserialize)]
struct MigrationSet {
    migration: Vec<MigrationUnit>,
}

/// A file holds either one unit or a `migration` list of units.
pub fn load_file(path: &Path) -> Result<Vec<MigrationUnit>> {
    let contents = std::fs::read_to_string(path)?;
    let invalid = |e: String| MigrationError::InvalidMigration(format!("{}: {e}", path.display()));

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "toml" => {
            let doc: toml::Value = toml::from_str(&contents).map_err(|e| invalid(e.to_string()))?;
            if doc.get("migration").is_some() {
                let set = doc.try_into::<MigrationSet>().map_err(|e| invalid(e.to_string()))?;
                Ok(set.migration)
            } else {
                let unit = doc.try_into::<MigrationUnit>().map_err(|e| invalid(e.to_string()))?;
                Ok(vec![unit])
            }
        }
        "yml" | "yaml" => {
            let doc: serde_yaml::Value =
                serde_yaml::from_str(&contents).map_err(|e| invalid(e.to_string()))?;
            if doc.get("migration").is_some() {
                let set: MigrationSet =
                    serde_yaml::from_value(doc).map_err(|e| invalid(e.to_string()))?;
                Ok(set.migration)
            } else {
                let unit: MigrationUnit =
                    serde_yaml::from_value(doc).map_err(|e| invalid(e.to_string()))?;
                Ok(vec![unit])
            }
        }
        other => Err(invalid(format!("unsupported migration file extension: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::ColumnDef;

    fn roles_unit(version: &str) -> MigrationUnit {
        MigrationUnit::new(version, "create_roles")
            .with_up(SchemaOperation::CreateTable {
                table: "Roles".into(),
                columns: vec![ColumnDef::new("Id", "INTEGER").primary_key()],
                primary_key: Vec::new(),
            })
            .with_down(SchemaOperation::DropTable {
                table: "Roles".into(),
            })
    }

    #[test]
    fn loads_directory_in_file_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("20240102000000_add_name.toml"),
            r#"
            version = "20240102000000"
            name = "add_name"

            [[up]]
            op = "add_column"
            table = "Roles"
            column = { name = "Name", type = "TEXT" }
            "#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("20240101000000_create_roles.yml"),
            "version: \"20240101000000\"\nname: create_roles\nup:\n  - op: create_table\n    table: Roles\n    columns:\n      - { name: Id, type: INTEGER, primary_key: true }\ndown:\n  - op: drop_table\n    table: Roles\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let units = load_migrations(dir.path()).unwrap();
        let versions: Vec<&str> = units.iter().map(|u| u.version.as_str()).collect();
        assert_eq!(versions, vec!["20240101000000", "20240102000000"]);
        assert!(units[0].is_reversible());
        assert!(!units[1].is_reversible());
    }

    #[test]
    fn set_file_keeps_declared_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("all.toml");
        std::fs::write(
            &path,
            r#"
            [[migration]]
            version = "2"
            name = "second"
            up = [{ op = "sql", sql = "SELECT 2" }]

            [[migration]]
            version = "1"
            name = "first"
            up = [{ op = "sql", sql = "SELECT 1" }]
            "#,
        )
        .unwrap();

        let units = load_migrations(&path).unwrap();
        let versions: Vec<&str> = units.iter().map(|u| u.version.as_str()).collect();
        assert_eq!(versions, vec!["2", "1"]);
    }

    #[test]
    fn duplicate_versions_are_rejected() {
        let err = validate_units(&[roles_unit("1"), roles_unit("1")]).unwrap_err();
        assert!(err.to_string().contains("duplicate migration version 1"));
    }

    #[test]
    fn unit_without_forward_operations_is_invalid() {
        let err = MigrationUnit::new("1", "empty").validate().unwrap_err();
        assert!(matches!(err, MigrationError::InvalidMigration(_)));
    }

    #[test]
    fn unrenderable_operation_is_reported_with_its_version() {
        let unit = MigrationUnit::new("7", "bad_index").with_up(SchemaOperation::CreateIndex {
            name: "IX_Empty".into(),
            table: "Rooms".into(),
            columns: Vec::new(),
            unique: false,
            filter: None,
        });
        let err = unit.validate().unwrap_err();
        assert!(err.to_string().contains("7 (create_index IX_Empty on Rooms)"));
    }

    #[test]
    fn missing_path_is_a_config_error() {
        let err = load_migrations(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }
}
