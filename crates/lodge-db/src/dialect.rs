use std::collections::BTreeMap;
use std::fmt;

use lodge_common::{MigrationError, Result};

use crate::operation::{ColumnDef, SchemaOperation, SqlValue};
use crate::validation::IdentifierValidator;

/// A rendered SQL statement with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

impl fmt::Display for Statement {
    /// Inline parameters as literals, for dry-run scripts.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::with_capacity(self.sql.len());
        let mut rest = self.sql.as_str();
        while let Some(pos) = rest.find('?') {
            out.push_str(&rest[..pos]);
            let digits: String = rest[pos + 1..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            let index = digits.parse::<usize>().ok().and_then(|n| n.checked_sub(1));
            match index.and_then(|i| self.params.get(i)) {
                Some(value) => out.push_str(&literal(value).unwrap_or_else(|_| "NULL".into())),
                None => {
                    out.push('?');
                    out.push_str(&digits);
                }
            }
            rest = &rest[pos + 1 + digits.len()..];
        }
        out.push_str(rest);
        write!(f, "{out};")
    }
}

/// Renders schema operations into SQL for a concrete database engine.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn render(&self, op: &SchemaOperation) -> Result<Vec<Statement>>;
}

/// SQLite 3.35+ (needs `ALTER TABLE ... DROP COLUMN`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn render(&self, op: &SchemaOperation) -> Result<Vec<Statement>> {
        let statement = match op {
            SchemaOperation::CreateTable {
                table,
                columns,
                primary_key,
            } => create_table(table, columns, primary_key)?,
            SchemaOperation::DropTable { table } => {
                Statement::plain(format!("DROP TABLE {}", ident("table", table)?))
            }
            SchemaOperation::AddColumn { table, column } => Statement::plain(format!(
                "ALTER TABLE {} ADD COLUMN {}",
                ident("table", table)?,
                column_def(column)?
            )),
            SchemaOperation::DropColumn { table, column } => Statement::plain(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                ident("table", table)?,
                ident("column", column)?
            )),
            SchemaOperation::RenameTable { table, new_name } => Statement::plain(format!(
                "ALTER TABLE {} RENAME TO {}",
                ident("table", table)?,
                ident("table", new_name)?
            )),
            SchemaOperation::RenameColumn {
                table,
                column,
                new_name,
            } => Statement::plain(format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                ident("table", table)?,
                ident("column", column)?,
                ident("column", new_name)?
            )),
            SchemaOperation::CreateIndex {
                name,
                table,
                columns,
                unique,
                filter,
            } => {
                if columns.is_empty() {
                    return Err(MigrationError::InvalidMigration(format!(
                        "index {name} has no columns"
                    )));
                }
                let cols = columns
                    .iter()
                    .map(|c| ident("column", c))
                    .collect::<Result<Vec<_>>>()?
                    .join(", ");
                let mut sql = format!(
                    "CREATE {}INDEX {} ON {} ({cols})",
                    if *unique { "UNIQUE " } else { "" },
                    ident("index", name)?,
                    ident("table", table)?
                );
                if let Some(filter) = filter.as_deref().filter(|f| !f.trim().is_empty()) {
                    sql.push_str(" WHERE ");
                    sql.push_str(filter.trim());
                }
                Statement::plain(sql)
            }
            SchemaOperation::DropIndex { name } => {
                Statement::plain(format!("DROP INDEX {}", ident("index", name)?))
            }
            SchemaOperation::InsertRow { table, values } => insert_row(table, values)?,
            SchemaOperation::UpdateRow { table, key, values } => {
                if values.is_empty() {
                    return Err(MigrationError::InvalidMigration(format!(
                        "update_row on {table} sets no values"
                    )));
                }
                let mut params = Vec::new();
                let mut assignments = Vec::with_capacity(values.len());
                for (column, value) in values {
                    params.push(value.clone());
                    assignments.push(format!("{} = ?{}", ident("column", column)?, params.len()));
                }
                let predicate = where_clause(table, key, &mut params)?;
                Statement {
                    sql: format!(
                        "UPDATE {} SET {} WHERE {predicate}",
                        ident("table", table)?,
                        assignments.join(", ")
                    ),
                    params,
                }
            }
            SchemaOperation::DeleteRow { table, key } => {
                let mut params = Vec::new();
                let predicate = where_clause(table, key, &mut params)?;
                Statement {
                    sql: format!("DELETE FROM {} WHERE {predicate}", ident("table", table)?),
                    params,
                }
            }
            SchemaOperation::AlterDatabaseOption { option, value } => {
                IdentifierValidator::validate_bare("database option", option)?;
                Statement::plain(format!("PRAGMA {option} = {}", literal(value)?))
            }
            SchemaOperation::Sql { sql } => {
                if sql.trim().is_empty() {
                    return Err(MigrationError::InvalidMigration(
                        "sql operation is empty".into(),
                    ));
                }
                Statement::plain(sql.trim().trim_end_matches(';').trim_end())
            }
        };
        Ok(vec![statement])
    }
}

fn create_table(table: &str, columns: &[ColumnDef], primary_key: &[String]) -> Result<Statement> {
    if columns.is_empty() {
        return Err(MigrationError::InvalidMigration(format!(
            "table {table} has no columns"
        )));
    }
    if !primary_key.is_empty() && columns.iter().any(|c| c.primary_key) {
        return Err(MigrationError::InvalidMigration(format!(
            "table {table} declares both a column and a composite primary key"
        )));
    }

    let mut parts = columns
        .iter()
        .map(column_def)
        .collect::<Result<Vec<_>>>()?;
    if !primary_key.is_empty() {
        let cols = primary_key
            .iter()
            .map(|c| ident("column", c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        parts.push(format!("PRIMARY KEY ({cols})"));
    }

    Ok(Statement::plain(format!(
        "CREATE TABLE {} (\n    {}\n)",
        ident("table", table)?,
        parts.join(",\n    ")
    )))
}

fn column_def(column: &ColumnDef) -> Result<String> {
    IdentifierValidator::validate_type(&column.name, &column.sql_type)?;
    let mut def = format!("{} {}", ident("column", &column.name)?, column.sql_type.trim());

    if column.primary_key {
        def.push_str(" PRIMARY KEY");
        if column.autoincrement {
            def.push_str(" AUTOINCREMENT");
        }
    } else if column.autoincrement {
        return Err(MigrationError::InvalidMigration(format!(
            "column {} is autoincrement but not the primary key",
            column.name
        )));
    }
    if !column.nullable && !column.primary_key {
        def.push_str(" NOT NULL");
    }
    if column.unique {
        def.push_str(" UNIQUE");
    }
    if let Some(expr) = column.default_sql.as_deref().filter(|e| !e.trim().is_empty()) {
        def.push_str(&format!(" DEFAULT ({})", expr.trim()));
    } else if let Some(value) = &column.default {
        def.push_str(&format!(" DEFAULT {}", literal(value)?));
    }
    if let Some(fk) = &column.references {
        def.push_str(&format!(
            " REFERENCES {} ({}) ON DELETE {}",
            ident("table", &fk.table)?,
            ident("column", &fk.column)?,
            fk.on_delete.as_sql()
        ));
    }
    Ok(def)
}

fn insert_row(table: &str, values: &BTreeMap<String, SqlValue>) -> Result<Statement> {
    let table_ident = ident("table", table)?;
    if values.is_empty() {
        return Ok(Statement::plain(format!(
            "INSERT INTO {table_ident} DEFAULT VALUES"
        )));
    }

    let columns = values
        .keys()
        .map(|c| ident("column", c))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let placeholders = (1..=values.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(Statement {
        sql: format!("INSERT INTO {table_ident} ({columns}) VALUES ({placeholders})"),
        params: values.values().cloned().collect(),
    })
}

/// Build `"a" = ?n AND "b" IS NULL`, appending bound values to `params`.
fn where_clause(
    table: &str,
    key: &BTreeMap<String, SqlValue>,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    if key.is_empty() {
        return Err(MigrationError::InvalidMigration(format!(
            "row operation on {table} needs a non-empty key"
        )));
    }
    let mut terms = Vec::with_capacity(key.len());
    for (column, value) in key {
        let column = ident("column", column)?;
        if *value == SqlValue::Null {
            terms.push(format!("{column} IS NULL"));
        } else {
            params.push(value.clone());
            terms.push(format!("{column} = ?{}", params.len()));
        }
    }
    Ok(terms.join(" AND "))
}

/// Quote an identifier for SQLite, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn ident(kind: &str, name: &str) -> Result<String> {
    IdentifierValidator::validate(kind, name)?;
    Ok(quote_ident(name))
}

/// Render a value as an SQL literal, for contexts that cannot bind parameters.
pub fn literal(value: &SqlValue) -> Result<String> {
    Ok(match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => i64::from(*b).to_string(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(r) if r.is_finite() => format!("{r:?}"),
        SqlValue::Real(r) => {
            return Err(MigrationError::InvalidMigration(format!(
                "non-finite real literal: {r}"
            )));
        }
        SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OnDelete;

    fn render_one(op: SchemaOperation) -> Statement {
        let mut stmts = SqliteDialect.render(&op).unwrap();
        assert_eq!(stmts.len(), 1);
        stmts.remove(0)
    }

    #[test]
    fn create_table_renders_constraints() {
        let stmt = render_one(SchemaOperation::CreateTable {
            table: "Sessions".into(),
            columns: vec![
                ColumnDef::new("Id", "INTEGER").primary_key().autoincrement(),
                ColumnDef::new("UserId", "INTEGER")
                    .not_null()
                    .references("Users", "Id", OnDelete::Cascade),
                ColumnDef::new("Token", "TEXT").not_null().unique(),
                ColumnDef::new("CreatedAt", "TEXT")
                    .not_null()
                    .default_sql("CURRENT_TIMESTAMP"),
            ],
            primary_key: Vec::new(),
        });

        assert_eq!(
            stmt.sql,
            "CREATE TABLE \"Sessions\" (\n    \
             \"Id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n    \
             \"UserId\" INTEGER NOT NULL REFERENCES \"Users\" (\"Id\") ON DELETE CASCADE,\n    \
             \"Token\" TEXT NOT NULL UNIQUE,\n    \
             \"CreatedAt\" TEXT NOT NULL DEFAULT (CURRENT_TIMESTAMP)\n)"
        );
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn composite_primary_key_is_a_table_constraint() {
        let stmt = render_one(SchemaOperation::CreateTable {
            table: "UserRoles".into(),
            columns: vec![
                ColumnDef::new("UserId", "INTEGER").not_null(),
                ColumnDef::new("RoleId", "INTEGER").not_null(),
            ],
            primary_key: vec!["UserId".into(), "RoleId".into()],
        });
        assert!(stmt.sql.ends_with("PRIMARY KEY (\"UserId\", \"RoleId\")\n)"));
    }

    #[test]
    fn conflicting_primary_keys_are_rejected() {
        let err = SqliteDialect
            .render(&SchemaOperation::CreateTable {
                table: "T".into(),
                columns: vec![ColumnDef::new("Id", "INTEGER").primary_key()],
                primary_key: vec!["Id".into()],
            })
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidMigration(_)));
    }

    #[test]
    fn add_column_with_literal_default() {
        let stmt = render_one(SchemaOperation::AddColumn {
            table: "Rooms".into(),
            column: ColumnDef::new("MaxGuests", "INTEGER")
                .not_null()
                .default_value(2),
        });
        assert_eq!(
            stmt.sql,
            "ALTER TABLE \"Rooms\" ADD COLUMN \"MaxGuests\" INTEGER NOT NULL DEFAULT 2"
        );
    }

    #[test]
    fn insert_binds_values_in_column_order() {
        let values = BTreeMap::from([
            ("Name".to_string(), SqlValue::from("Admin")),
            ("Id".to_string(), SqlValue::from(1)),
        ]);
        let stmt = render_one(SchemaOperation::InsertRow {
            table: "Roles".into(),
            values,
        });
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"Roles\" (\"Id\", \"Name\") VALUES (?1, ?2)"
        );
        assert_eq!(stmt.params, vec![SqlValue::Integer(1), SqlValue::from("Admin")]);
    }

    #[test]
    fn update_and_delete_need_a_key() {
        let stmt = render_one(SchemaOperation::UpdateRow {
            table: "Roles".into(),
            key: BTreeMap::from([("Id".to_string(), SqlValue::from(1))]),
            values: BTreeMap::from([("Name".to_string(), SqlValue::from("Owner"))]),
        });
        assert_eq!(stmt.sql, "UPDATE \"Roles\" SET \"Name\" = ?1 WHERE \"Id\" = ?2");
        assert_eq!(stmt.params, vec![SqlValue::from("Owner"), SqlValue::from(1)]);

        let err = SqliteDialect
            .render(&SchemaOperation::DeleteRow {
                table: "Roles".into(),
                key: BTreeMap::new(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("non-empty key"));
    }

    #[test]
    fn null_key_uses_is_null() {
        let stmt = render_one(SchemaOperation::DeleteRow {
            table: "Holidays".into(),
            key: BTreeMap::from([
                ("Region".to_string(), SqlValue::Null),
                ("Id".to_string(), SqlValue::from(3)),
            ]),
        });
        assert_eq!(
            stmt.sql,
            "DELETE FROM \"Holidays\" WHERE \"Id\" = ?1 AND \"Region\" IS NULL"
        );
        assert_eq!(stmt.params, vec![SqlValue::from(3)]);
    }

    #[test]
    fn database_option_renders_pragma() {
        let stmt = render_one(SchemaOperation::AlterDatabaseOption {
            option: "user_version".into(),
            value: SqlValue::from(4),
        });
        assert_eq!(stmt.sql, "PRAGMA user_version = 4");

        let err = SqliteDialect
            .render(&SchemaOperation::AlterDatabaseOption {
                option: "user_version; DROP TABLE x".into(),
                value: SqlValue::from(4),
            })
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidMigration(_)));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("Rooms"), "\"Rooms\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn literals_escape_text() {
        assert_eq!(literal(&SqlValue::from("O'Hare")).unwrap(), "'O''Hare'");
        assert_eq!(literal(&SqlValue::Bool(true)).unwrap(), "1");
        assert_eq!(literal(&SqlValue::Real(2.5)).unwrap(), "2.5");
        assert!(literal(&SqlValue::Real(f64::NAN)).is_err());
    }

    #[test]
    fn display_inlines_parameters() {
        let stmt = Statement {
            sql: "INSERT INTO \"Roles\" (\"Id\", \"Name\") VALUES (?1, ?2)".into(),
            params: vec![SqlValue::from(1), SqlValue::from("Guest")],
        };
        assert_eq!(
            stmt.to_string(),
            "INSERT INTO \"Roles\" (\"Id\", \"Name\") VALUES (1, 'Guest');"
        );
    }
}
