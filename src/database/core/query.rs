//! SQL text construction
//!
//! Pure helpers that render column lists, placeholder lists and equality
//! predicates, and the statement shapes built from them. Every value travels
//! as a bound parameter: the rendered text only ever contains identifiers
//! taken from the introspected catalog and `?` placeholders.

use std::fmt;
use std::str::FromStr;

use crate::database::core::value::Value;
use crate::error::{DbError, Result};

/// How several equality predicates are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Combinator {
    #[default]
    And,
    Or,
}

impl Combinator {
    pub fn keyword(&self) -> &'static str {
        match self {
            Combinator::And => "AND",
            Combinator::Or => "OR",
        }
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// Aggregation mode as callers name it: `all` conjoins, `any` disjoins
impl FromStr for Combinator {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Combinator::And),
            "any" => Ok(Combinator::Or),
            other => Err(DbError::UnsupportedOperator(other.to_string())),
        }
    }
}

/// `id, name, date`
pub fn join_comma_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|n| n.as_ref())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `?, ?, ?`, one placeholder per name
pub fn join_placeholders<S: AsRef<str>>(names: &[S]) -> String {
    placeholders(names.len())
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// `"order"`, with embedded quotes doubled
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_all(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| quote_ident(n)).collect()
}

/// `id = ? OR name = ?`
pub fn join_predicate<S: AsRef<str>>(names: &[S], combinator: Combinator) -> String {
    names
        .iter()
        .map(|n| format!("{} = ?", n.as_ref()))
        .collect::<Vec<_>>()
        .join(&format!(" {} ", combinator.keyword()))
}

/// A rendered statement and the parameters to bind, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    /// `SELECT <columns> FROM <table> WHERE <predicate>`
    ///
    /// An empty predicate is rejected: an unfiltered select is never what a
    /// lookup caller meant.
    pub fn select(
        table: &str,
        columns: &[&str],
        predicate: &[(&str, Value)],
        combinator: Combinator,
    ) -> Result<Self> {
        if predicate.is_empty() {
            return Err(DbError::EmptyPredicate(table.to_string()));
        }
        let keys: Vec<&str> = predicate.iter().map(|(k, _)| *k).collect();
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            join_comma_list(&quote_all(columns))
        };
        Ok(Statement {
            sql: format!(
                "SELECT {} FROM {} WHERE {}",
                projection,
                quote_ident(table),
                join_predicate(&quote_all(&keys), combinator)
            ),
            params: predicate.iter().map(|(_, v)| v.clone()).collect(),
        })
    }

    /// `INSERT INTO <table> (<columns>) VALUES (?, ...)`
    pub fn insert(table: &str, fields: &[(&str, Value)]) -> Result<Self> {
        if fields.is_empty() {
            return Err(DbError::EmptyRecord(table.to_string()));
        }
        let keys: Vec<&str> = fields.iter().map(|(k, _)| *k).collect();
        Ok(Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table),
                join_comma_list(&quote_all(&keys)),
                join_placeholders(&keys)
            ),
            params: fields.iter().map(|(_, v)| v.clone()).collect(),
        })
    }

    /// `UPDATE <table> SET a = ?, b = ? WHERE id = ?`
    ///
    /// Returns `None` when there is nothing to set.
    pub fn update_by_id(table: &str, id: i64, fields: &[(&str, Value)]) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }
        let assignments: Vec<String> = fields
            .iter()
            .map(|(k, _)| format!("{} = ?", quote_ident(k)))
            .collect();
        let mut params: Vec<Value> = fields.iter().map(|(_, v)| v.clone()).collect();
        params.push(Value::Integer(id));
        Some(Statement {
            sql: format!(
                "UPDATE {} SET {} WHERE \"id\" = ?",
                quote_ident(table),
                join_comma_list(&assignments)
            ),
            params,
        })
    }

    /// `DELETE FROM <table> WHERE id = ?`
    pub fn delete_by_id(table: &str, id: i64) -> Self {
        Statement {
            sql: format!("DELETE FROM {} WHERE \"id\" = ?", quote_ident(table)),
            params: vec![Value::Integer(id)],
        }
    }

    /// Link/child pairs from `links`, optionally joined to `table` and
    /// restricted to the given tag ids, for the given link ids only.
    ///
    /// Both id lists must be non-empty; callers short-circuit otherwise.
    pub fn tagged_links(table: &str, link_ids: &[i64], tag_ids: Option<&[i64]>) -> Self {
        let mut sql = String::from("SELECT links.id, links.id_child FROM links");
        let mut params = Vec::new();
        if let Some(tags) = tag_ids {
            sql.push_str(&format!(
                " INNER JOIN {t} ON links.id_child = {t}.id AND {t}.tag IN ({})",
                placeholders(tags.len()),
                t = quote_ident(table)
            ));
            params.extend(tags.iter().map(|id| Value::Integer(*id)));
        }
        sql.push_str(&format!(
            " WHERE links.id IN ({}) ORDER BY links.id, links.id_child",
            placeholders(link_ids.len())
        ));
        params.extend(link_ids.iter().map(|id| Value::Integer(*id)));
        Statement { sql, params }
    }
}
