//! Schema introspection
//!
//! This module discovers every table and view of the open database once and
//! keeps their column metadata for the rest of the process. The catalog is
//! read-only after construction and can be shared freely between readers.

use std::collections::BTreeMap;
use std::fmt;

use rusqlite::Connection;
use tracing::debug;

use crate::database::core::value::Value;
use crate::error::{DbError, Result};

/// 2^63, the first magnitude that no longer fits an i64
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
}

impl ColumnType {
    /// Map a declared type name; only the four exact storage class names are accepted
    pub fn from_declared(name: &str) -> Option<Self> {
        match name {
            "INTEGER" => Some(ColumnType::Integer),
            "REAL" => Some(ColumnType::Real),
            "TEXT" => Some(ColumnType::Text),
            "BLOB" => Some(ColumnType::Blob),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
        }
    }

    /// Convert a non-null value into this type
    fn coerce(&self, value: &Value) -> Result<Value> {
        let fail = || DbError::Coercion {
            value: format!("{} value '{}'", value.kind(), value),
            target: self.name(),
        };
        let converted = match (self, value) {
            (_, Value::Null) => Value::Null,

            (ColumnType::Integer, Value::Integer(i)) => Value::Integer(*i),
            (ColumnType::Integer, Value::Real(r)) => {
                // whole numbers only, and only inside the i64 range
                if r.fract() != 0.0 || r.abs() >= I64_LIMIT {
                    return Err(fail());
                }
                Value::Integer(*r as i64)
            }
            (ColumnType::Integer, Value::Text(s)) => {
                Value::Integer(s.trim().parse().map_err(|_| fail())?)
            }
            (ColumnType::Integer, Value::Blob(b)) => {
                let s = std::str::from_utf8(b).map_err(|_| fail())?;
                Value::Integer(s.trim().parse().map_err(|_| fail())?)
            }

            (ColumnType::Real, Value::Integer(i)) => Value::Real(*i as f64),
            (ColumnType::Real, Value::Real(r)) => Value::Real(*r),
            (ColumnType::Real, Value::Text(s)) => {
                Value::Real(s.trim().parse().map_err(|_| fail())?)
            }
            (ColumnType::Real, Value::Blob(b)) => {
                let s = std::str::from_utf8(b).map_err(|_| fail())?;
                Value::Real(s.trim().parse().map_err(|_| fail())?)
            }

            (ColumnType::Text, Value::Integer(i)) => Value::Text(i.to_string()),
            (ColumnType::Text, Value::Real(r)) => Value::Text(r.to_string()),
            (ColumnType::Text, Value::Text(s)) => Value::Text(s.clone()),
            (ColumnType::Text, Value::Blob(b)) => {
                Value::Text(String::from_utf8(b.clone()).map_err(|_| fail())?)
            }

            (ColumnType::Blob, Value::Text(s)) => Value::Blob(s.as_bytes().to_vec()),
            (ColumnType::Blob, Value::Blob(b)) => Value::Blob(b.clone()),
            (ColumnType::Blob, Value::Integer(_) | Value::Real(_)) => return Err(fail()),
        };
        Ok(converted)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Metadata of one column, as reported at introspection time
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    pub ordinal: i64,
    pub name: String,
    pub column_type: ColumnType,
    pub not_null: bool,
    pub default_value: Option<Value>,
    pub primary_key: bool,
}

impl ColumnMetadata {
    /// Coerce a value to this column's declared type
    ///
    /// `Null` is returned unchanged for every type. A value that cannot be
    /// represented without loss fails with [`DbError::Coercion`].
    pub fn convert(&self, value: &Value) -> Result<Value> {
        self.column_type.coerce(value)
    }
}

/// Columns of one table or view, in ordinal order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    columns: Vec<ColumnMetadata>,
}

impl TableSchema {
    pub fn get(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Column metadata for every table and view of a database
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaCatalog {
    /// Introspect all tables and views visible on `conn`
    ///
    /// SQLite's internal `sqlite_*` tables are skipped. Any column whose
    /// declared type is not one of the four storage classes aborts the build.
    pub fn introspect(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut tables = BTreeMap::new();
        for name in names {
            let schema = Self::table_columns(conn, &name)?;
            tables.insert(name, schema);
        }
        debug!("introspected {} tables and views", tables.len());
        Ok(Self { tables })
    }

    fn table_columns(conn: &Connection, table: &str) -> Result<TableSchema> {
        let mut stmt = conn.prepare(
            "SELECT cid, name, type, \"notnull\", dflt_value, pk
             FROM pragma_table_info(?1) ORDER BY cid",
        )?;
        let rows = stmt
            .query_map([table], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)? > 0,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut columns = Vec::with_capacity(rows.len());
        for (ordinal, name, declared, not_null, default, primary_key) in rows {
            let column_type =
                ColumnType::from_declared(&declared).ok_or_else(|| DbError::UnknownColumnType {
                    table: table.to_string(),
                    column: name.clone(),
                    declared: declared.clone(),
                })?;
            let default_value =
                default.and_then(|raw| parse_default(table, &name, column_type, raw));
            columns.push(ColumnMetadata {
                ordinal,
                name,
                column_type,
                not_null,
                default_value,
                primary_key,
            });
        }
        Ok(TableSchema { columns })
    }

    /// Columns of `table`
    pub fn columns(&self, table: &str) -> Result<&TableSchema> {
        self.tables
            .get(table)
            .ok_or_else(|| DbError::UnknownTable(table.to_string()))
    }

    /// Column names of `table` in ordinal order
    pub fn column_names(&self, table: &str) -> Result<Vec<&str>> {
        Ok(self.columns(table)?.names())
    }

    /// Metadata of `table.column`
    pub fn column(&self, table: &str, column: &str) -> Result<&ColumnMetadata> {
        self.columns(table)?
            .get(column)
            .ok_or_else(|| DbError::unknown_column(table, column))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }
}

/// Numeric defaults are parsed; text and blob defaults are kept as written.
///
/// Expression defaults such as `(strftime('%s', 'now'))` on numeric columns
/// have no literal value and are left absent.
fn parse_default(
    table: &str,
    column: &str,
    column_type: ColumnType,
    raw: String,
) -> Option<Value> {
    match column_type {
        ColumnType::Integer => match raw.trim().parse::<i64>() {
            Ok(v) => Some(Value::Integer(v)),
            Err(_) => {
                debug!("skipping non-literal default {} for {}.{}", raw, table, column);
                None
            }
        },
        ColumnType::Real => match raw.trim().parse::<f64>() {
            Ok(v) => Some(Value::Real(v)),
            Err(_) => {
                debug!("skipping non-literal default {} for {}.{}", raw, table, column);
                None
            }
        },
        ColumnType::Text | ColumnType::Blob => Some(Value::Text(raw)),
    }
}
