use std::collections::BTreeMap;
use std::fmt;

use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};

/// A single declarative schema change. Migration files list these under
/// `up` and `down`, tagged by `op`:
///
/// ```toml
/// [[up]]
/// op = "add_column"
/// table = "Rooms"
/// column = { name = "MaxGuests", type = "INTEGER", nullable = false, default = 2 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaOperation {
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
        /// Composite primary key. Leave empty when a column carries `primary_key`.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        primary_key: Vec<String>,
    },
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    DropColumn {
        table: String,
        column: String,
    },
    RenameTable {
        table: String,
        new_name: String,
    },
    RenameColumn {
        table: String,
        column: String,
        new_name: String,
    },
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
        #[serde(default)]
        unique: bool,
        /// Partial index predicate, emitted verbatim after `WHERE`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    DropIndex {
        name: String,
    },
    InsertRow {
        table: String,
        values: BTreeMap<String, SqlValue>,
    },
    UpdateRow {
        table: String,
        key: BTreeMap<String, SqlValue>,
        values: BTreeMap<String, SqlValue>,
    },
    DeleteRow {
        table: String,
        key: BTreeMap<String, SqlValue>,
    },
    AlterDatabaseOption {
        option: String,
        value: SqlValue,
    },
    Sql {
        sql: String,
    },
}

impl SchemaOperation {
    /// Tables the operation writes to, for reserved-name checks.
    pub fn tables(&self) -> Vec<&str> {
        match self {
            Self::CreateTable { table, .. }
            | Self::DropTable { table }
            | Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameColumn { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::InsertRow { table, .. }
            | Self::UpdateRow { table, .. }
            | Self::DeleteRow { table, .. } => vec![table.as_str()],
            Self::RenameTable { table, new_name } => vec![table.as_str(), new_name.as_str()],
            Self::DropIndex { .. } | Self::AlterDatabaseOption { .. } | Self::Sql { .. } => {
                Vec::new()
            }
        }
    }
}

impl fmt::Display for SchemaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable { table, .. } => write!(f, "create_table {table}"),
            Self::DropTable { table } => write!(f, "drop_table {table}"),
            Self::AddColumn { table, column } => write!(f, "add_column {table}.{}", column.name),
            Self::DropColumn { table, column } => write!(f, "drop_column {table}.{column}"),
            Self::RenameTable { table, new_name } => {
                write!(f, "rename_table {table} -> {new_name}")
            }
            Self::RenameColumn {
                table,
                column,
                new_name,
            } => write!(f, "rename_column {table}.{column} -> {new_name}"),
            Self::CreateIndex { name, table, .. } => write!(f, "create_index {name} on {table}"),
            Self::DropIndex { name } => write!(f, "drop_index {name}"),
            Self::InsertRow { table, .. } => write!(f, "insert_row {table}"),
            Self::UpdateRow { table, .. } => write!(f, "update_row {table}"),
            Self::DeleteRow { table, .. } => write!(f, "delete_row {table}"),
            Self::AlterDatabaseOption { option, .. } => {
                write!(f, "alter_database_option {option}")
            }
            Self::Sql { sql } => {
                let first_line = sql.trim().lines().next().unwrap_or_default();
                write!(f, "sql {first_line}")
            }
        }
    }
}

/// Column definition used by `create_table` and `add_column`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub sql_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Literal default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<SqlValue>,
    /// Default expression such as `CURRENT_TIMESTAMP`; takes precedence over `default`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sql: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub autoincrement: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignKey>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            default: None,
            default_sql: None,
            primary_key: false,
            autoincrement: false,
            unique: false,
            references: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<SqlValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn default_sql(mut self, expr: impl Into<String>) -> Self {
        self.default_sql = Some(expr.into());
        self
    }

    pub fn references(
        mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        on_delete: OnDelete,
    ) -> Self {
        self.references = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
            on_delete,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl OnDelete {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// Literal value carried by seed rows, defaults and database options.
///
/// Text is stored byte-for-byte, so tick-precision timestamps written as
/// strings survive unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Integer(v.into())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            Self::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Self::Real(r) => ToSqlOutput::Owned(Value::Real(*r)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_parse_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            up: Vec<SchemaOperation>,
        }

        let doc: Doc = toml::from_str(
            r#"
            [[up]]
            op = "add_column"
            table = "Rooms"
            column = { name = "MaxGuests", type = "INTEGER", nullable = false, default = 2 }

            [[up]]
            op = "insert_row"
            table = "Holidays"
            values = { Id = 1, Name = "New Year", Date = "2024-01-01T00:00:00.0000000", Paid = true }

            [[up]]
            op = "create_index"
            name = "IX_Rooms_Number"
            table = "Rooms"
            columns = ["Number"]
            unique = true
            "#,
        )
        .unwrap();

        assert_eq!(doc.up.len(), 3);
        match &doc.up[0] {
            SchemaOperation::AddColumn { table, column } => {
                assert_eq!(table, "Rooms");
                assert_eq!(column.sql_type, "INTEGER");
                assert!(!column.nullable);
                assert_eq!(column.default, Some(SqlValue::Integer(2)));
            }
            other => panic!("expected AddColumn, got {other:?}"),
        }
        match &doc.up[1] {
            SchemaOperation::InsertRow { values, .. } => {
                assert_eq!(
                    values["Date"],
                    SqlValue::Text("2024-01-01T00:00:00.0000000".into())
                );
                assert_eq!(values["Paid"], SqlValue::Bool(true));
            }
            other => panic!("expected InsertRow, got {other:?}"),
        }
        assert!(matches!(
            &doc.up[2],
            SchemaOperation::CreateIndex { unique: true, .. }
        ));
    }

    #[test]
    fn yaml_null_parses_as_null_value() {
        let op: SchemaOperation = serde_yaml::from_str(
            "op: update_row\ntable: Users\nkey: { Id: 1 }\nvalues: { DeletedAt: ~ }\n",
        )
        .unwrap();
        match op {
            SchemaOperation::UpdateRow { values, .. } => {
                assert_eq!(values["DeletedAt"], SqlValue::Null);
            }
            other => panic!("expected UpdateRow, got {other:?}"),
        }
    }

    #[test]
    fn display_names_the_target() {
        let op = SchemaOperation::AddColumn {
            table: "Rooms".into(),
            column: ColumnDef::new("MaxGuests", "INTEGER"),
        };
        assert_eq!(op.to_string(), "add_column Rooms.MaxGuests");

        let op = SchemaOperation::Sql {
            sql: "\n  UPDATE Rooms SET x = 1;\n  UPDATE Rooms SET y = 2;".into(),
        };
        assert_eq!(op.to_string(), "sql UPDATE Rooms SET x = 1;");
    }

    #[test]
    fn rename_table_touches_both_names() {
        let op = SchemaOperation::RenameTable {
            table: "Room".into(),
            new_name: "Rooms".into(),
        };
        assert_eq!(op.tables(), vec!["Room", "Rooms"]);
        assert!(
            SchemaOperation::DropIndex { name: "IX".into() }
                .tables()
                .is_empty()
        );
    }

    #[test]
    fn primary_key_builder_implies_not_null() {
        let col = ColumnDef::new("Id", "INTEGER").primary_key().autoincrement();
        assert!(col.primary_key);
        assert!(col.autoincrement);
        assert!(!col.nullable);
    }
}
