//! Commands reading and writing rows through the CRUD facade

use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use serde::Serialize;
use sqlgate::database::{Combinator, Database, Tag, Value};
use sqlgate::DbError;
use tabled::Tabled;
use tracing::info;

use super::output::{print_records, print_rows, OutputFormat};

#[derive(Debug, Serialize, Tabled)]
struct TableRow {
    table: String,
    columns: usize,
}

#[derive(Debug, Serialize, Tabled)]
struct ColumnRow {
    ordinal: i64,
    name: String,
    #[tabled(rename = "type")]
    #[serde(rename = "type")]
    column_type: String,
    not_null: bool,
    default: String,
    primary_key: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct LinkRow {
    link_id: i64,
    child_id: i64,
}

#[derive(Debug, Serialize, Tabled)]
struct IdRow {
    id: i64,
    committed: bool,
}

/// Parse `column=value` pairs, converting each value to its column's type
///
/// An empty value stands for NULL.
pub fn parse_fields(db: &Database, table: &str, pairs: &[String]) -> Result<Vec<(String, Value)>> {
    let schema = db.columns(table)?;
    pairs
        .iter()
        .map(|pair| -> Result<(String, Value)> {
            let (name, raw) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected column=value, got '{}'", pair))?;
            let name = name.trim();
            let column = schema
                .get(name)
                .ok_or_else(|| DbError::UnknownColumn {
                    table: table.to_string(),
                    column: name.to_string(),
                })?;
            let value = if raw.is_empty() {
                Value::Null
            } else {
                column.convert(&Value::from(raw))?
            };
            Ok((name.to_string(), value))
        })
        .collect()
}

fn borrowed(fields: &[(String, Value)]) -> Vec<(&str, Value)> {
    fields
        .iter()
        .map(|(name, value)| (name.as_str(), value.clone()))
        .collect()
}

pub fn tables(db: &Database, output_format: OutputFormat) -> Result<()> {
    let rows: Vec<TableRow> = db
        .table_names()
        .into_iter()
        .map(|name| TableRow {
            table: name.to_string(),
            columns: db.columns(name).map(|c| c.len()).unwrap_or_default(),
        })
        .collect();
    print_rows(&rows, output_format)
}

pub fn columns(db: &Database, table: &str, output_format: OutputFormat) -> Result<()> {
    let rows: Vec<ColumnRow> = db
        .columns(table)?
        .iter()
        .map(|c| ColumnRow {
            ordinal: c.ordinal,
            name: c.name.clone(),
            column_type: c.column_type.to_string(),
            not_null: c.not_null,
            default: c
                .default_value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default(),
            primary_key: c.primary_key,
        })
        .collect();
    print_rows(&rows, output_format)
}

pub fn get(db: &Database, table: &str, id: i64, output_format: OutputFormat) -> Result<()> {
    let rows: Vec<_> = db.row_by_id(table, id)?.into_iter().collect();
    print_records(&rows, output_format)
}

pub fn find(
    db: &Database,
    table: &str,
    key: &str,
    value: &str,
    output_format: OutputFormat,
) -> Result<()> {
    let fields = parse_fields(db, table, &[format!("{}={}", key, value)])?;
    let record = db.row_by_predicate(table, Combinator::And, &borrowed(&fields))?;
    let rows: Vec<_> = Some(record).filter(|r| !r.is_empty()).into_iter().collect();
    print_records(&rows, output_format)
}

pub fn select(
    db: &Database,
    table: &str,
    any: bool,
    filters: &[String],
    output_format: OutputFormat,
) -> Result<()> {
    let combinator = if any { Combinator::Or } else { Combinator::And };
    let fields = parse_fields(db, table, filters)?;
    let rows = db.rows_by_predicate(table, combinator, &borrowed(&fields))?;
    print_records(&rows, output_format)
}

/// Insert or update a row; without commit the change is shown, then discarded
pub fn upsert(
    db: &Database,
    table: &str,
    pairs: &[String],
    commit: bool,
    output_format: OutputFormat,
) -> Result<()> {
    let fields = parse_fields(db, table, pairs)?;
    let id = db.upsert(table, &borrowed(&fields), commit)?;
    if commit {
        info!("upserted {} id {}", table, id);
    } else {
        let row: Vec<_> = db.row_by_id(table, id)?.into_iter().collect();
        print_records(&row, output_format)?;
        db.rollback()?;
    }
    print_rows(&[IdRow { id, committed: commit }], output_format)
}

pub fn delete(db: &Database, table: &str, id: i64) -> Result<()> {
    db.delete_by_id(table, id)?;
    info!("deleted {} id {}", table, id);
    Ok(())
}

pub fn links(
    db: &Database,
    table: &str,
    link_ids: &[i64],
    tag_ids: &[i64],
    output_format: OutputFormat,
) -> Result<()> {
    let link_ids: BTreeSet<i64> = link_ids.iter().copied().collect();
    let tags = tag_ids
        .iter()
        .map(|id| tag_for(db, *id))
        .collect::<Result<BTreeSet<Tag>>>()?;
    let rows: Vec<LinkRow> = db
        .tag_filtered_join(table, &link_ids, &tags)?
        .into_iter()
        .map(|(link_id, child_id)| LinkRow { link_id, child_id })
        .collect();
    print_rows(&rows, output_format)
}

/// Name a tag from the `tags` table when there is one
fn tag_for(db: &Database, id: i64) -> Result<Tag> {
    let has_names = db
        .column_names("tags")
        .map(|names| names.contains(&"name"))
        .unwrap_or(false);
    let name = if has_names {
        db.value_by_id("tags", id, "name")?
            .map(|v| v.to_string())
            .unwrap_or_default()
    } else {
        String::new()
    };
    Ok(Tag::new(id, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgate::database::SchemaPolicy;
    use std::fs;
    use tempfile::TempDir;

    fn items_db(dir: &TempDir) -> Database {
        let script = dir.path().join("database_creator.sql");
        fs::write(
            &script,
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, price REAL);",
        )
        .unwrap();
        Database::open_with(
            dir.path().join("test.db3"),
            Some(&script),
            SchemaPolicy::CreateIfMissing,
        )
        .unwrap()
    }

    fn pairs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_fields_converts_to_column_type() {
        let dir = TempDir::new().unwrap();
        let db = items_db(&dir);

        let fields =
            parse_fields(&db, "items", &pairs(&["id=3", " price =2.5", "name="])).unwrap();
        assert_eq!(
            fields,
            vec![
                ("id".to_string(), Value::Integer(3)),
                ("price".to_string(), Value::Real(2.5)),
                ("name".to_string(), Value::Null),
            ]
        );

        // only the first '=' splits
        let fields = parse_fields(&db, "items", &pairs(&["name=a=b"])).unwrap();
        assert_eq!(fields, vec![("name".to_string(), Value::from("a=b"))]);
    }

    #[test]
    fn test_parse_fields_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let db = items_db(&dir);

        let err = parse_fields(&db, "items", &pairs(&["name"])).unwrap_err();
        assert!(err.to_string().contains("Expected column=value"));

        let err = parse_fields(&db, "items", &pairs(&["colour=red"])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DbError>(),
            Some(DbError::UnknownColumn { column, .. }) if column == "colour"
        ));

        let err = parse_fields(&db, "items", &pairs(&["price=cheap"])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DbError>(),
            Some(DbError::Coercion { .. })
        ));

        let err = parse_fields(&db, "missing", &pairs(&["name=x"])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DbError>(),
            Some(DbError::UnknownTable(_))
        ));
    }
}
