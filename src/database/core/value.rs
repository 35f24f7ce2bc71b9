//! Scalar values and records
//!
//! This module provides the value type moved between callers and the store.
//! It mirrors SQLite's storage classes so any cell can round-trip unchanged.

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

/// One row, keyed by column name in select-list order
///
/// Serialized directly, a record is an array of `[name, value]` pairs so that
/// the select-list order and repeated names survive. Use [`record_to_json`] for
/// the object form the command-line output prints.
pub type Record = Vec<(String, Value)>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the storage class, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
            Value::Blob(_) => "BLOB",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            // TEXT cells holding invalid UTF-8 keep their bytes
            ValueRef::Text(t) => match std::str::from_utf8(t) {
                Ok(text) => Value::Text(text.to_string()),
                Err(_) => Value::Blob(t.to_vec()),
            },
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let out = match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        };
        Ok(out)
    }
}

/// Look up a column in a record by name
pub fn record_get<'r>(record: &'r Record, column: &str) -> Option<&'r Value> {
    record
        .iter()
        .find(|(name, _)| name == column)
        .map(|(_, value)| value)
}

impl From<&Value> for JsonValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => JsonValue::Null,
            Value::Integer(i) => JsonValue::from(*i),
            // NaN and infinities have no JSON form
            Value::Real(r) => serde_json::Number::from_f64(*r)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Blob(b) => JsonValue::from(b.clone()),
        }
    }
}

/// A record as a JSON object keyed by column name
///
/// When a name repeats, the last cell wins.
pub fn record_to_json(record: &Record) -> JsonValue {
    let map: Map<String, JsonValue> = record
        .iter()
        .map(|(name, value)| (name.clone(), JsonValue::from(value)))
        .collect();
    JsonValue::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("bolt")), Value::Text("bolt".to_string()));
    }

    #[test]
    fn test_bind_and_read_back() {
        let conn = Connection::open_in_memory().unwrap();
        let values = [
            Value::Null,
            Value::Integer(7),
            Value::Real(0.5),
            Value::Text("bolt".to_string()),
            Value::Blob(vec![1, 2, 3]),
        ];
        for value in values {
            let read: Value = conn
                .query_row("SELECT ?1", [&value], |row| Ok(row.get_ref(0)?.into()))
                .unwrap();
            assert_eq!(read, value);
        }
    }

    #[test]
    fn test_json_is_untagged() {
        let record: Record = vec![
            ("id".to_string(), Value::Integer(1)),
            ("name".to_string(), Value::Null),
        ];
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"[["id",1],["name",null]]"#);
        assert_eq!(record_get(&record, "id"), Some(&Value::Integer(1)));
        assert_eq!(record_get(&record, "missing"), None);
    }

    #[test]
    fn test_record_object_form() {
        let record: Record = vec![
            ("id".to_string(), Value::Integer(1)),
            ("name".to_string(), Value::from("bolt")),
            ("price".to_string(), Value::Real(f64::NAN)),
            ("photo".to_string(), Value::Blob(vec![0, 255])),
        ];
        assert_eq!(
            record_to_json(&record),
            serde_json::json!({"id": 1, "name": "bolt", "price": null, "photo": [0, 255]})
        );
        // same cells as the pair form, keyed instead of ordered
        let pairs = serde_json::to_value(&record[..2]).unwrap();
        assert_eq!(pairs, serde_json::json!([["id", 1], ["name", "bolt"]]));
    }

    #[test]
    fn test_invalid_utf8_text_reads_as_blob() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (body TEXT); INSERT INTO t VALUES (CAST(x'66ff6f' AS TEXT));",
        )
        .unwrap();
        let (kind, read): (String, Value) = conn
            .query_row("SELECT typeof(body), body FROM t", [], |row| {
                Ok((row.get(0)?, row.get_ref(1)?.into()))
            })
            .unwrap();
        assert_eq!(kind, "text");
        assert_eq!(read, Value::Blob(vec![0x66, 0xff, 0x6f]));

        let valid: Value = conn
            .query_row("SELECT 'caf\u{e9}'", [], |row| Ok(row.get_ref(0)?.into()))
            .unwrap();
        assert_eq!(valid, Value::Text("caf\u{e9}".to_string()));
    }
}
