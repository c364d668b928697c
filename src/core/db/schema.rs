//! Schema Module
//!
//! The `users` table contract and the introspection used to check it.
//! Nothing here runs on its own: provisioning is an explicit step taken by
//! the CLI's `init-schema` command or by test fixtures, never by the
//! gateway's constructor.

use crate::core::db::connection::Gateway;
use crate::core::db::query::{Params, Row};
use crate::core::{GatewayError, Result};
use tracing::info;

/// DDL for the `users` table backing login and signup.
pub const USERS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    full_name VARCHAR(100) NOT NULL,
    email VARCHAR(150) NOT NULL UNIQUE,
    password_hash VARCHAR(255) NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)"#;

/// Keeps `updated_at` current on every update.
pub const USERS_TOUCH_TRIGGER_SQL: &str = r#"
CREATE TRIGGER IF NOT EXISTS users_touch_updated_at
AFTER UPDATE ON users
FOR EACH ROW WHEN NEW.updated_at = OLD.updated_at
BEGIN
    UPDATE users SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
END"#;

/// Represents a table column as reported by `pragma_table_info`
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Declared type (e.g. "INTEGER", "VARCHAR(100)")
    pub type_name: String,
    /// Whether the column rejects NULL values
    pub notnull: bool,
    /// Whether this column is part of the primary key
    pub pk: bool,
    /// Default value expression (if any)
    pub dflt_value: Option<String>,
}

impl Column {
    fn from_row(row: &Row) -> Result<Self> {
        let text = |name: &str| {
            row.get_str(name)
                .map(str::to_string)
                .ok_or_else(|| {
                    GatewayError::Query(format!("pragma_table_info: missing '{}'", name))
                })
        };
        Ok(Column {
            name: text("name")?,
            type_name: text("type")?,
            notnull: row.get_i64("notnull").unwrap_or(0) != 0,
            pk: row.get_i64("pk").unwrap_or(0) != 0,
            dflt_value: row.get_str("dflt_value").map(str::to_string),
        })
    }
}

/// Creates the `users` table and its trigger if they are missing.
pub fn provision(gateway: &Gateway) -> Result<()> {
    gateway.execute(USERS_TABLE_SQL, Params::None)?;
    gateway.execute(USERS_TOUCH_TRIGGER_SQL, Params::None)?;
    info!("users schema provisioned");
    Ok(())
}

/// Whether a table with this name exists
pub fn table_exists(gateway: &Gateway, table: &str) -> Result<bool> {
    let row = gateway.single(
        "SELECT 1 AS present FROM sqlite_master WHERE type = 'table' AND name = ?",
        Params::None.bind(table),
    )?;
    Ok(row.is_some())
}

/// Columns of `table` in declaration order; empty if the table is missing
pub fn table_columns(gateway: &Gateway, table: &str) -> Result<Vec<Column>> {
    gateway
        .result_set(
            "SELECT name, type, \"notnull\", pk, dflt_value FROM pragma_table_info(?) ORDER BY cid",
            Params::None.bind(table),
        )?
        .iter()
        .map(Column::from_row)
        .collect()
}

/// Names of the columns covered by a single-column unique index
pub fn unique_columns(gateway: &Gateway, table: &str) -> Result<Vec<String>> {
    let rows = gateway.result_set(
        "SELECT ii.name AS column_name
         FROM pragma_index_list(?1) AS il
         JOIN pragma_index_info(il.name) AS ii
         WHERE il.\"unique\" = 1
           AND (SELECT count(*) FROM pragma_index_info(il.name)) = 1",
        Params::None.bind(table),
    )?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get_str("column_name").map(str::to_string))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    #[test]
    fn test_gateway_does_not_provision_on_its_own() {
        let gateway = Gateway::connect(ConnectionConfig::in_memory());
        assert!(!table_exists(&gateway, "users").unwrap());
    }

    #[test]
    fn test_provision_is_idempotent() {
        let gateway = Gateway::connect(ConnectionConfig::in_memory());
        provision(&gateway).unwrap();
        provision(&gateway).unwrap();
        assert!(table_exists(&gateway, "users").unwrap());
    }

    #[test]
    fn test_users_columns() {
        let gateway = Gateway::connect(ConnectionConfig::in_memory());
        provision(&gateway).unwrap();

        let columns = table_columns(&gateway, "users").unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["id", "full_name", "email", "password_hash", "created_at", "updated_at"]
        );

        assert!(columns[0].pk);
        assert_eq!(columns[0].type_name, "INTEGER");
        assert_eq!(columns[1].type_name, "VARCHAR(100)");
        assert!(columns[1].notnull);
        assert_eq!(columns[2].type_name, "VARCHAR(150)");
        assert_eq!(columns[4].dflt_value.as_deref(), Some("CURRENT_TIMESTAMP"));

        assert_eq!(unique_columns(&gateway, "users").unwrap(), vec!["email"]);
    }

    #[test]
    fn test_provision_on_failed_gateway() {
        let gateway = Gateway::connect(ConnectionConfig::new("/nonexistent/dir/app.db"));
        crate::assert_gateway_error!(provision(&gateway), GatewayError::NotConnected, "provision");
    }

    #[test]
    fn test_missing_table_has_no_columns() {
        let gateway = Gateway::connect(ConnectionConfig::in_memory());
        assert!(table_columns(&gateway, "nope").unwrap().is_empty());
    }
}
