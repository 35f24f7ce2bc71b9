//! Error types for the database layer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by every public database operation.
///
/// Raw driver errors never escape on their own: they are wrapped in
/// [`DbError::Store`] with the original error kept as the source.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("column '{column}' of table '{table}' has unsupported type '{declared}'")]
    UnknownColumnType {
        table: String,
        column: String,
        declared: String,
    },

    #[error("cannot convert {value} to {target}")]
    Coercion { value: String, target: &'static str },

    #[error("no filter values given for a lookup on '{0}'")]
    EmptyPredicate(String),

    #[error("unsupported operator '{0}', expected 'all' or 'any'")]
    UnsupportedOperator(String),

    #[error("no fields to insert into '{0}'")]
    EmptyRecord(String),

    #[error("cannot read schema script '{path}': {source}")]
    SchemaScript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub type Result<T, E = DbError> = std::result::Result<T, E>;

impl DbError {
    pub(crate) fn unknown_column(table: &str, column: &str) -> Self {
        DbError::UnknownColumn {
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_store_error_keeps_source() {
        let err: DbError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, DbError::Store(_)));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            DbError::unknown_column("items", "colour").to_string(),
            "unknown column 'colour' in table 'items'"
        );
        assert_eq!(
            DbError::UnknownTable("nope".to_string()).to_string(),
            "unknown table 'nope'"
        );
    }
}
