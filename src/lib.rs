#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! sqlgate - generic CRUD access to an embedded SQLite database
//!
//! sqlgate reads the tables and typed columns of an existing SQLite database
//! and exposes row lookups, inserts, updates and deletes keyed by table and
//! column name. Every name is checked against the introspected schema and
//! every value is bound as a statement parameter.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `display` | Table formatting with `tabled` | `tabled` |
//! | `cli` | The `sqlgate` command-line binary | All above + `clap`, `tracing-subscriber` |
//!
//! The library itself (database layer, configuration, error boundary) is
//! always available:
//!
//! ```toml
//! sqlgate = { version = "0.1", default-features = false }
//! ```
//!
//! # Architecture
//!
//! - **[`database`]**: connection lifecycle, schema catalog, statement
//!   construction and the [`Database`] CRUD facade
//! - **[`config`]**: INI configuration locating the database and its schema script
//! - **[`boundary`]**: top-level error boundary closing the connection on failure
//! - **[`error`]**: the [`DbError`] taxonomy
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sqlgate::{Database, SqlgateConfig, Value};
//!
//! let config = SqlgateConfig::new(&None)?;
//! let db = Database::open(&config)?;
//!
//! // insert, then update the price only
//! let id = db.upsert("items", &[("name", "bolt".into()), ("price", Value::Real(0.5))], true)?;
//! db.upsert("items", &[("id", id.into()), ("price", Value::Real(0.75))], true)?;
//!
//! let row = db.row_by_id("items", id)?;
//! let same = db.id_by_value("items", "name", "bolt")?;
//! ```
//!
//! ## Deferred writes
//!
//! ```rust,ignore
//! db.upsert("items", &[("name", "nut".into())], false)?;
//! db.upsert("items", &[("name", "washer".into())], false)?;
//! db.commit()?;
//! ```

pub mod boundary;
pub mod config;
pub mod database;
pub mod error;

pub use boundary::{ErrorBoundary, ErrorSink, StderrSink, TracingSink};
pub use config::SqlgateConfig;
pub use database::{
    Combinator, ConnectionManager, Database, DbLocation, Record, SchemaCatalog, SchemaPolicy, Tag,
    Value,
};
pub use error::{DbError, Result};
