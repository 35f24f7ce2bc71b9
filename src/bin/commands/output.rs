//! Output formats shared by every command

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlgate::database::{record_to_json, Record};
use tabled::builder::Builder;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty table with borders (default)
    #[default]
    Table,
    /// Markdown table format
    Markdown,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON with indentation
    JsonPretty,
    /// One JSON object per line
    JsonLine,
}

impl OutputFormat {
    pub fn all_names() -> &'static [&'static str] {
        &["table", "markdown", "json", "json-pretty", "json-line"]
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Markdown => write!(f, "markdown"),
            Self::Json => write!(f, "json"),
            Self::JsonPretty => write!(f, "json-pretty"),
            Self::JsonLine => write!(f, "json-line"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" | "pretty" => Ok(Self::Table),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "json-pretty" | "jsonpretty" => Ok(Self::JsonPretty),
            "json-line" | "jsonline" | "jsonl" => Ok(Self::JsonLine),
            _ => Err(format!(
                "Unknown output format '{}'. Valid formats: {}",
                s,
                Self::all_names().join(", ")
            )),
        }
    }
}

fn styled(mut table: Table, format: OutputFormat) -> String {
    match format {
        OutputFormat::Markdown => table.with(Style::markdown()),
        _ => table.with(Style::rounded()),
    };
    table.to_string()
}

fn print_json<T: Serialize>(items: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::JsonLine => {
            for item in items {
                println!("{}", serde_json::to_string(item)?);
            }
        }
        _ => println!("{}", serde_json::to_string(items)?),
    }
    Ok(())
}

/// Print rows of a fixed shape
pub fn print_rows<T: Tabled + Serialize>(rows: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table | OutputFormat::Markdown => {
            println!("{}", styled(Table::new(rows), format));
            Ok(())
        }
        _ => print_json(rows, format),
    }
}

/// Print records whose columns are only known at runtime
pub fn print_records(records: &[Record], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table | OutputFormat::Markdown => {
            let Some(first) = records.first() else {
                println!("(no rows)");
                return Ok(());
            };
            let mut builder = Builder::default();
            builder.push_record(first.iter().map(|(name, _)| name.clone()));
            for record in records {
                builder.push_record(record.iter().map(|(_, value)| value.to_string()));
            }
            println!("{}", styled(builder.build(), format));
            Ok(())
        }
        _ => {
            let objects: Vec<JsonValue> = records.iter().map(record_to_json).collect();
            print_json(&objects, format)
        }
    }
}
