//! Core database infrastructure
//!
//! - `connection`: the process-wide connection and its unit-of-work scopes
//! - `schema`: catalog of tables and typed columns read from the database
//! - `query`: SQL text construction with bound parameters
//! - `value`: cell values and records

mod connection;
mod query;
mod schema;
mod value;

pub use connection::{ConnectionManager, DbLocation, SchemaPolicy, UnitOfWork};
pub use query::{
    join_comma_list, join_placeholders, join_predicate, quote_ident, Combinator, Statement,
};
pub use schema::{ColumnMetadata, ColumnType, SchemaCatalog, TableSchema};
pub use value::{record_get, record_to_json, Record, Value};
