//! SQLite warehouse backend.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, info};

use super::{quote_ident, validate_table_name, Result, Warehouse, WarehouseError};
use crate::table::{ColumnType, Table};

/// SQLite-backed warehouse, one connection per operation.
#[derive(Debug, Clone)]
pub struct SqliteWarehouse {
    db_path: PathBuf,
}

impl SqliteWarehouse {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let warehouse = Self {
            db_path: db_path.to_path_buf(),
        };
        // Fail early when the file cannot be opened.
        warehouse.connect()?;
        Ok(warehouse)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn names_of(conn: &Connection, kind: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = ?1 AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map(params![kind], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }
}

fn check_columns(name: &str, table: &Table) -> Result<()> {
    let invalid = |reason: String| {
        Err(WarehouseError::InvalidSnapshot {
            table: name.to_string(),
            reason,
        })
    };
    if table.columns.is_empty() {
        return invalid("snapshot has no columns".to_string());
    }
    let mut seen = HashSet::new();
    for column in &table.columns {
        if column.trim().is_empty() {
            return invalid("snapshot has an unnamed column".to_string());
        }
        if !seen.insert(column.to_lowercase()) {
            return invalid(format!("duplicate column '{}'", column));
        }
    }
    if let Some(row) = table.rows.iter().find(|r| r.len() != table.columns.len()) {
        return invalid(format!(
            "row has {} cells, header has {}",
            row.len(),
            table.columns.len()
        ));
    }
    Ok(())
}

fn cell_value(cell: &str, ty: ColumnType) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    match ty {
        ColumnType::Integer => trimmed
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::Text(cell.to_string())),
        ColumnType::Real => trimmed
            .parse::<f64>()
            .map(Value::Real)
            .unwrap_or_else(|_| Value::Text(cell.to_string())),
        ColumnType::Text => Value::Text(cell.to_string()),
    }
}

impl Warehouse for SqliteWarehouse {
    fn replace_table(&self, name: &str, table: &Table) -> Result<u64> {
        validate_table_name(name)?;
        check_columns(name, table)?;

        let types = table.infer_types();
        let ident = quote_ident(name);
        let column_defs = table
            .columns
            .iter()
            .zip(&types)
            .map(|(c, ty)| format!("{} {}", quote_ident(c.trim()), ty.sql_name()))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; table.columns.len()].join(", ");

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {}", ident), [])?;
        tx.execute(&format!("CREATE TABLE {} ({})", ident, column_defs), [])?;
        {
            let mut insert =
                tx.prepare(&format!("INSERT INTO {} VALUES ({})", ident, placeholders))?;
            for row in &table.rows {
                let values = row
                    .iter()
                    .zip(&types)
                    .map(|(cell, ty)| cell_value(cell, *ty));
                insert.execute(params_from_iter(values))?;
            }
        }

        let actual: i64 =
            tx.query_row(&format!("SELECT COUNT(*) FROM {}", ident), [], |row| row.get(0))?;
        let expected = table.rows.len() as u64;
        if actual as u64 != expected {
            // Dropping the transaction rolls back to the previous snapshot.
            return Err(WarehouseError::CountMismatch {
                table: name.to_string(),
                expected,
                actual: actual as u64,
            });
        }
        tx.commit()?;

        debug!("Replaced {} with {} rows", name, expected);
        Ok(expected)
    }

    fn drop_views(&self) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let views = Self::names_of(&conn, "view")?;
        for view in &views {
            conn.execute(&format!("DROP VIEW IF EXISTS {}", quote_ident(view)), [])?;
        }
        if !views.is_empty() {
            info!("Dropped {} dependent views", views.len());
        }
        Ok(views)
    }

    fn row_count(&self, name: &str) -> Result<u64> {
        validate_table_name(name)?;
        if !self.table_exists(name)? {
            return Err(WarehouseError::TableNotFound(name.to_string()));
        }
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(name)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        let conn = self.connect()?;
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(exists > 0)
    }

    fn tables(&self) -> Result<Vec<String>> {
        let conn = self.connect()?;
        Self::names_of(&conn, "table")
    }

    fn reset(&self) -> Result<Vec<String>> {
        let mut dropped = self.drop_views()?;
        let mut conn = self.connect()?;
        let tables = Self::names_of(&conn, "table")?;
        let tx = conn.transaction()?;
        for table in &tables {
            tx.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)), [])?;
        }
        tx.commit()?;
        info!("Warehouse reset: dropped {} tables", tables.len());
        dropped.extend(tables);
        Ok(dropped)
    }
}
