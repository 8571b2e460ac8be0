//! Destination table schema inferred from a dataset.
//!
//! Column types come from the lossless kind of each column's sampled profile.
//! The storage policy decides whether the declared type follows the inferred
//! one or every non-key column is stored as bounded text.

use std::fmt;

use log::debug;
use serde::{Serialize, Serializer};

use crate::{
    config::ColumnStorage,
    data::{Value, ValueKind},
    dataset::TabularDataset,
    error::{PipelineError, PipelineResult},
};

pub const FALLBACK_TABLE_NAME: &str = "tabela_padrao";
pub const MAX_TABLE_NAME_LEN: usize = 64;
/// Widest text column declared as `VARCHAR`; anything longer becomes `TEXT`.
pub const MAX_VARCHAR_WIDTH: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Decimal,
    Timestamp,
    Varchar(usize),
    Text,
}

impl SqlType {
    fn from_profile(kind: ValueKind, max_text_len: usize) -> Self {
        match kind {
            ValueKind::Integer => SqlType::Integer,
            ValueKind::Decimal => SqlType::Decimal,
            ValueKind::Date => SqlType::Timestamp,
            ValueKind::Text | ValueKind::Missing if max_text_len <= MAX_VARCHAR_WIDTH => {
                SqlType::Varchar(max_text_len.max(1))
            }
            ValueKind::Text | ValueKind::Missing => SqlType::Text,
        }
    }

    fn kind(&self) -> ValueKind {
        match self {
            SqlType::Integer => ValueKind::Integer,
            SqlType::Decimal => ValueKind::Decimal,
            SqlType::Timestamp => ValueKind::Date,
            SqlType::Varchar(_) | SqlType::Text => ValueKind::Text,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Integer => f.write_str("INTEGER"),
            SqlType::Decimal => f.write_str("DECIMAL"),
            SqlType::Timestamp => f.write_str("TIMESTAMP"),
            SqlType::Varchar(width) => write!(f, "VARCHAR({width})"),
            SqlType::Text => f.write_str("TEXT"),
        }
    }
}

impl Serialize for SqlType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaColumnSpec {
    pub name: String,
    pub inferred: SqlType,
    pub declared: SqlType,
    pub primary_key: bool,
}

impl SchemaColumnSpec {
    /// SQL literal for `value` under the declared type. Values that do not
    /// fit become `NULL`; only the primary key refuses (returns `None`).
    pub fn literal(&self, value: &Value) -> Option<String> {
        if self.primary_key {
            return match value.coerce(ValueKind::Integer) {
                Value::Integer(id) => Some(id.to_string()),
                _ => None,
            };
        }
        if value.is_missing() {
            return Some("NULL".to_string());
        }
        let literal = match (self.declared, value.coerce(self.declared.kind())) {
            (_, Value::Missing) => "NULL".to_string(),
            (SqlType::Integer | SqlType::Decimal, coerced) => coerced.as_display(),
            (SqlType::Timestamp, Value::Date(dt)) => {
                quote_literal(&dt.format("%Y-%m-%d %H:%M:%S").to_string())
            }
            (SqlType::Varchar(width), coerced) => {
                quote_literal(&truncate_chars(&coerced.as_display(), width))
            }
            (_, coerced) => quote_literal(&coerced.as_display()),
        };
        Some(literal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub table: String,
    /// Primary key first, then the remaining columns in dataset order.
    pub columns: Vec<SchemaColumnSpec>,
}

impl TableSchema {
    /// Infers the schema of `dataset`, whose row identifier becomes the
    /// primary key. `sample_rows` of 0 profiles every row.
    pub fn infer(
        dataset: &TabularDataset,
        table: &str,
        sample_rows: usize,
        storage: ColumnStorage,
    ) -> PipelineResult<Self> {
        let identifier = dataset
            .identifier_column()
            .ok_or_else(|| PipelineError::ColumnAbsent("row identifier".to_string()))?;
        let mut columns = vec![SchemaColumnSpec {
            name: identifier.to_string(),
            inferred: SqlType::Integer,
            declared: SqlType::Integer,
            primary_key: true,
        }];
        for name in dataset.columns().iter().filter(|name| *name != identifier) {
            let profile = dataset.sampled_profile(name, sample_rows)?;
            let inferred = SqlType::from_profile(profile.lossless(), profile.max_text_len);
            let declared = match storage {
                ColumnStorage::BoundedText { width } => SqlType::Varchar(width),
                ColumnStorage::Inferred => inferred,
            };
            debug!("Column '{name}': inferred {inferred}, declared {declared}");
            columns.push(SchemaColumnSpec {
                name: name.clone(),
                inferred,
                declared,
                primary_key: false,
            });
        }
        Ok(Self {
            table: sanitize_table_name(table),
            columns,
        })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    pub fn create_table_sql(&self) -> String {
        let definitions = self
            .columns
            .iter()
            .map(|column| {
                if column.primary_key {
                    format!("    {} INTEGER PRIMARY KEY", quote_identifier(&column.name))
                } else {
                    format!("    {} {}", quote_identifier(&column.name), column.declared)
                }
            })
            .collect::<Vec<_>>()
            .join(",\n");
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{definitions}\n);",
            quote_identifier(&self.table)
        )
    }

    /// `INSERT INTO table (cols) VALUES` prefix shared by every batch.
    pub fn insert_prefix(&self) -> String {
        let columns = self
            .column_names()
            .map(quote_identifier)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({columns}) VALUES ",
            quote_identifier(&self.table)
        )
    }
}

/// Keeps ASCII alphanumerics and `_`, truncated to 64 characters.
pub fn sanitize_table_name(raw: &str) -> String {
    let cleaned = raw
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .take(MAX_TABLE_NAME_LEN)
        .collect::<String>();
    if cleaned.is_empty() {
        FALLBACK_TABLE_NAME.to_string()
    } else {
        cleaned
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn truncate_chars(value: &str, width: usize) -> String {
    value.chars().take(width).collect()
}
