//! Database module
//!
//! This module provides generic, schema-driven access to one SQLite database:
//!
//! - **core**: connection lifecycle, schema introspection, SQL construction
//! - **crud**: the [`Database`] facade callers use for lookups and writes
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/            # Foundation
//! │   ├── connection   # ConnectionManager and UnitOfWork scopes
//! │   ├── schema       # SchemaCatalog built from the live database
//! │   ├── query        # Statement rendering, always parameterized
//! │   └── value        # Value and Record
//! │
//! └── crud             # Database facade (lookups, upsert, delete, tag join)
//! ```
//!
//! Every statement runs inside a unit-of-work holding the single connection.
//! An autocommitted unit-of-work commits and closes the connection when it
//! finishes; a deferred one leaves its transaction open until an explicit
//! commit or rollback. Any error rolls back and closes.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sqlgate::database::{Database, SchemaPolicy, Value};
//!
//! let db = Database::open_with(
//!     std::path::PathBuf::from("/tmp/stock.db3"),
//!     Some(std::path::Path::new("database_creator.sql")),
//!     SchemaPolicy::CreateIfMissing,
//! )?;
//!
//! let id = db.upsert("items", &[("name", "bolt".into()), ("price", Value::Real(0.5))], true)?;
//! let row = db.row_by_id("items", id)?;
//! ```

pub mod core;
mod crud;

pub use self::core::{
    join_comma_list, join_placeholders, join_predicate, quote_ident, record_get, record_to_json,
    ColumnMetadata, ColumnType, Combinator, ConnectionManager, DbLocation, Record, SchemaCatalog,
    SchemaPolicy, Statement, TableSchema, UnitOfWork, Value,
};
pub use crud::{Database, Tag, DATE_FORMAT};
