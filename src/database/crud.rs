//! Generic CRUD access over an introspected database
//!
//! [`Database`] validates every table and column name against the schema
//! catalog before any SQL is rendered, so identifiers in statement text always
//! come from the database itself and values are always bound parameters.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use tracing::debug;

use crate::config::SqlgateConfig;
use crate::database::core::{
    quote_ident, record_get, Combinator, ConnectionManager, DbLocation, Record, SchemaCatalog,
    SchemaPolicy, Statement, TableSchema, Value,
};
use crate::error::{DbError, Result};

/// Text layout of `links.date_update` when it is not a unix timestamp
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Table holding link/child pairs for [`Database::tag_filtered_join`]
const LINKS_TABLE: &str = "links";

/// A tag a child row may carry in its `tag` column
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

impl Tag {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Schema-aware CRUD facade over the process-wide connection
///
/// Reads join a transaction left open by a deferred write; writes take an
/// explicit `autocommit` flag.
pub struct Database {
    manager: ConnectionManager,
    catalog: SchemaCatalog,
}

impl Database {
    /// Open the database described by the configuration
    ///
    /// The schema script runs according to the configured policy, then the
    /// catalog is introspected.
    pub fn open(config: &SqlgateConfig) -> Result<Self> {
        Self::open_with(
            config.clone(),
            Some(config.schema_script.as_path()),
            config.schema_policy,
        )
    }

    /// Open a database at `location`, creating it from `script` if required
    pub fn open_with(
        location: impl DbLocation + 'static,
        script: Option<&Path>,
        policy: SchemaPolicy,
    ) -> Result<Self> {
        let manager = ConnectionManager::new(location);
        if let Some(script) = script {
            manager.ensure_schema(script, policy)?;
        }
        Self::from_manager(manager)
    }

    /// Introspect the database behind an existing manager
    pub fn from_manager(manager: ConnectionManager) -> Result<Self> {
        let catalog = manager.with_read(|uow| SchemaCatalog::introspect(uow.connection()))?;
        Ok(Self { manager, catalog })
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.catalog.table_names()
    }

    pub fn columns(&self, table: &str) -> Result<&TableSchema> {
        self.catalog.columns(table)
    }

    pub fn column_names(&self, table: &str) -> Result<Vec<&str>> {
        self.catalog.column_names(table)
    }

    /// Check `table` and every named column exist
    fn checked(&self, table: &str, columns: &[&str]) -> Result<&TableSchema> {
        let schema = self.catalog.columns(table)?;
        for column in columns {
            if !schema.contains(column) {
                return Err(DbError::unknown_column(table, column));
            }
        }
        Ok(schema)
    }

    fn select(
        &self,
        table: &str,
        output: &[&str],
        combinator: Combinator,
        predicate: &[(&str, Value)],
    ) -> Result<Vec<Record>> {
        let keys: Vec<&str> = predicate.iter().map(|(k, _)| *k).collect();
        self.checked(table, &keys)?;
        self.checked(table, output)?;
        let stmt = Statement::select(table, output, predicate, combinator)?;
        self.manager.with_read(|uow| uow.query_statement(&stmt))
    }

    /// The row with the given id, or `None`
    pub fn row_by_id(&self, table: &str, id: i64) -> Result<Option<Record>> {
        let rows = self.select(table, &[], Combinator::And, &[("id", Value::Integer(id))])?;
        Ok(rows.into_iter().next())
    }

    /// The first row whose `key` equals `value`; an empty record when none does
    pub fn row_by_value(&self, table: &str, key: &str, value: impl Into<Value>) -> Result<Record> {
        self.row_by_predicate(table, Combinator::And, &[(key, value.into())])
    }

    /// The id of the first row whose `key` equals `value`
    pub fn id_by_value(
        &self,
        table: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<Option<i64>> {
        let found = self.value_by_values(table, "id", Combinator::And, &[(key, value.into())])?;
        Ok(found.and_then(|v| v.as_i64()))
    }

    /// Every row matching the predicate
    pub fn rows_by_predicate(
        &self,
        table: &str,
        combinator: Combinator,
        predicate: &[(&str, Value)],
    ) -> Result<Vec<Record>> {
        self.select(table, &[], combinator, predicate)
    }

    /// The first row matching the predicate; an empty record when none does
    pub fn row_by_predicate(
        &self,
        table: &str,
        combinator: Combinator,
        predicate: &[(&str, Value)],
    ) -> Result<Record> {
        let rows = self.select(table, &[], combinator, predicate)?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    /// `output` of the first row matching the predicate, or `None`
    pub fn value_by_values(
        &self,
        table: &str,
        output: &str,
        combinator: Combinator,
        predicate: &[(&str, Value)],
    ) -> Result<Option<Value>> {
        let rows = self.select(table, &[output], combinator, predicate)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .map(|(_, v)| v))
    }

    /// `column_out` of the first row whose `column_in` equals `value`
    pub fn value_by_value(
        &self,
        table: &str,
        column_in: &str,
        value: impl Into<Value>,
        column_out: &str,
    ) -> Result<Option<Value>> {
        self.value_by_values(table, column_out, Combinator::And, &[(column_in, value.into())])
    }

    /// `column` of the row with the given id
    pub fn value_by_id(&self, table: &str, id: i64, column: &str) -> Result<Option<Value>> {
        self.value_by_values(table, column, Combinator::And, &[("id", Value::Integer(id))])
    }

    /// `(id, key)` for every row of `table`
    pub fn rows_by_column(&self, table: &str, key: &str) -> Result<Vec<(i64, Value)>> {
        self.checked(table, &["id", key])?;
        let sql = format!(
            "SELECT \"id\", {} FROM {} ORDER BY \"id\"",
            quote_ident(key),
            quote_ident(table)
        );
        let rows = self.manager.with_read(|uow| uow.query(&sql, &[]))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let mut cells = row.into_iter().map(|(_, v)| v);
                let id = cells.next()?.as_i64()?;
                Some((id, cells.next().unwrap_or(Value::Null)))
            })
            .collect())
    }

    /// Insert or update a row
    ///
    /// A non-null `id` field updates that row with the remaining non-null
    /// fields and returns the id unchanged. Otherwise all non-null fields are
    /// inserted and the new id is returned. Null fields are left out of the
    /// statement in both cases, so an update never clears a column.
    pub fn upsert(&self, table: &str, fields: &[(&str, Value)], autocommit: bool) -> Result<i64> {
        let schema = self.catalog.columns(table)?;

        let mut id = None;
        let mut values = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            let column = schema
                .get(name)
                .ok_or_else(|| DbError::unknown_column(table, name))?;
            if value.is_null() {
                continue;
            }
            let converted = column.convert(value)?;
            if *name == "id" {
                id = Some(converted.as_i64().ok_or_else(|| DbError::Coercion {
                    value: converted.to_string(),
                    target: "INTEGER",
                })?);
            } else {
                values.push((*name, converted));
            }
        }

        match id {
            Some(id) => {
                let Some(stmt) = Statement::update_by_id(table, id, &values) else {
                    debug!("nothing to update for {} id {}", table, id);
                    return Ok(id);
                };
                let changed = self
                    .manager
                    .with_unit_of_work(autocommit, |uow| uow.execute_statement(&stmt))?;
                if changed == 0 {
                    debug!("no row with id {} in {}", id, table);
                }
                Ok(id)
            }
            None => {
                let stmt = Statement::insert(table, &values)?;
                self.manager.with_unit_of_work(autocommit, |uow| {
                    uow.execute_statement(&stmt)?;
                    Ok(uow.last_insert_rowid())
                })
            }
        }
    }

    /// Delete the row with the given id and commit
    pub fn delete_by_id(&self, table: &str, id: i64) -> Result<()> {
        self.checked(table, &["id"])?;
        let stmt = Statement::delete_by_id(table, id);
        self.manager
            .with_unit_of_work(true, |uow| uow.execute_statement(&stmt))?;
        Ok(())
    }

    /// `(link id, child id)` pairs of `links` whose link id is in `link_ids`
    ///
    /// When `table` has a `tag` column, only links whose child row in `table`
    /// carries one of `tags` are kept. Otherwise the tags are ignored and every
    /// listed link is returned.
    pub fn tag_filtered_join(
        &self,
        table: &str,
        link_ids: &BTreeSet<i64>,
        tags: &BTreeSet<Tag>,
    ) -> Result<Vec<(i64, i64)>> {
        let schema = self.checked(table, &["id"])?;
        self.checked(LINKS_TABLE, &["id", "id_child"])?;

        let tagged = schema.contains("tag");
        if link_ids.is_empty() || (tagged && tags.is_empty()) {
            return Ok(Vec::new());
        }

        let links: Vec<i64> = link_ids.iter().copied().collect();
        let tag_ids: Vec<i64> = tags.iter().map(|t| t.id).collect();
        let stmt = Statement::tagged_links(table, &links, tagged.then_some(tag_ids.as_slice()));

        let rows = self.manager.with_read(|uow| uow.query_statement(&stmt))?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let link = row.first()?.1.as_i64()?;
                let child = row.get(1)?.1.as_i64()?;
                Some((link, child))
            })
            .collect())
    }

    /// Latest `links.date_update`
    ///
    /// Stored either as a unix timestamp or as text in [`DATE_FORMAT`].
    pub fn last_links_update(&self) -> Result<Option<NaiveDateTime>> {
        self.checked(LINKS_TABLE, &["date_update"])?;
        let rows = self.manager.with_read(|uow| {
            uow.query("SELECT MAX(date_update) AS last_update FROM links", &[])
        })?;
        let value = rows
            .first()
            .and_then(|row| record_get(row, "last_update"))
            .cloned()
            .unwrap_or(Value::Null);

        let parsed = match &value {
            Value::Null => return Ok(None),
            Value::Integer(ts) => timestamp_to_datetime(*ts),
            Value::Real(ts) => timestamp_to_datetime(*ts as i64),
            Value::Text(s) => match s.trim().parse::<i64>() {
                Ok(ts) => timestamp_to_datetime(ts),
                Err(_) => NaiveDateTime::parse_from_str(s.trim(), DATE_FORMAT).ok(),
            },
            Value::Blob(_) => None,
        };
        parsed.map(Some).ok_or_else(|| DbError::Coercion {
            value: value.to_string(),
            target: "DATETIME",
        })
    }

    /// Run an arbitrary parameterized query
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        self.manager.with_read(|uow| uow.query(sql, params))
    }

    /// Run an arbitrary parameterized statement, returning the changed row count
    pub fn execute(&self, sql: &str, params: &[Value], autocommit: bool) -> Result<usize> {
        self.manager
            .with_unit_of_work(autocommit, |uow| uow.execute(sql, params))
    }

    /// Commit work left pending by `autocommit = false` writes
    pub fn commit(&self) -> Result<()> {
        self.manager.commit()
    }

    /// Discard work left pending by `autocommit = false` writes
    pub fn rollback(&self) -> Result<()> {
        self.manager.rollback()
    }

    pub fn close(&self) -> Result<()> {
        self.manager.close()
    }
}

fn timestamp_to_datetime(ts: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.naive_utc())
}
