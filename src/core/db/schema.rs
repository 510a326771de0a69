/// Schema Listing Module
///
/// Catalog queries for tables, views and columns. They go through the
/// regular `Executor` query path, so they need nothing beyond a working
/// pool. The SQL targets the SQLite catalog (`sqlite_master`,
/// `pragma_table_info`).
use crate::core::db::connection::ConnectionFactory;
use crate::core::db::row::{Row, Value};
use crate::core::db::unit_of_work::Executor;
use crate::core::{PoolError, Result};

const LIST_TABLES_SQL: &str = "SELECT name AS table_name FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

const LIST_VIEWS_SQL: &str = "SELECT name AS table_name FROM sqlite_master \
     WHERE type = 'view' ORDER BY name";

const TABLE_COLUMNS_SQL: &str = "SELECT name, type, \"notnull\", dflt_value, pk \
     FROM pragma_table_info(?1) ORDER BY cid";

/// Represents a database column with its metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Declared type name (e.g., "INTEGER", "TEXT")
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
        Ok(Column {
            name: text(row, "name")?,
            type_name: text(row, "type")?,
            notnull: flag(row, "notnull"),
            pk: flag(row, "pk"),
            dflt_value: row.get("dflt_value").and_then(Value::as_str).map(String::from),
        })
    }
}

fn text(row: &Row, column: &str) -> Result<String> {
    row.get(column)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| PoolError::Query(format!("catalog row has no text column '{}'", column)))
}

fn flag(row: &Row, column: &str) -> bool {
    row.get(column).and_then(Value::as_i64).unwrap_or(0) != 0
}

fn names(rows: Vec<Row>) -> Result<Vec<String>> {
    rows.iter().map(|row| text(row, "table_name")).collect()
}

/// Names of all user tables, sorted.
pub fn list_tables<F: ConnectionFactory>(executor: &Executor<F>) -> Result<Vec<String>> {
    names(executor.fetch_all(LIST_TABLES_SQL, &[])?)
}

/// Names of all views, sorted.
pub fn list_views<F: ConnectionFactory>(executor: &Executor<F>) -> Result<Vec<String>> {
    names(executor.fetch_all(LIST_VIEWS_SQL, &[])?)
}

/// Columns of `table` in declaration order. Empty if the table does not exist.
pub fn table_columns<F: ConnectionFactory>(
    executor: &Executor<F>,
    table: &str,
) -> Result<Vec<Column>> {
    executor
        .fetch_all(TABLE_COLUMNS_SQL, &[Value::from(table)])?
        .iter()
        .map(Column::from_row)
        .collect()
}
