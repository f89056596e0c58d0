//! Typed rows.
//!
//! A `Row` is an ordered tuple of field values validated against its table definition
//! at construction. Rows never change after construction; the linker copies them by
//! reference into the output.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::diagnostic::SourceLineNumber;
use crate::table::{ColumnDefinition, ColumnType, TableDefinition};

/// Longest identifier accepted in identifier columns.
pub const MAX_IDENTIFIER_LENGTH: usize = 72;

/// A malformed row, table, or section. Always fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    #[error("table '{table}' expects {expected} fields but {actual} were supplied")]
    Arity {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("table '{table}' column '{column}' expects a {expected:?} value, got '{value}'")]
    TypeMismatch {
        table: String,
        column: String,
        expected: ColumnType,
        value: String,
    },

    #[error("table '{table}' column '{column}' value {value} is outside the range {min}..={max}")]
    OutOfRange {
        table: String,
        column: String,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("table '{table}' column '{column}' value '{value}' is not one of: {}", .allowed.join(", "))]
    NotAllowed {
        table: String,
        column: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("table '{table}' column '{column}' is not nullable")]
    NullValue { table: String, column: String },

    #[error("table '{table}' column '{column}' value '{value}' is not a legal identifier")]
    InvalidIdentifier {
        table: String,
        column: String,
        value: String,
    },

    #[error("table '{table}' has no column '{column}'")]
    UnknownColumn { table: String, column: String },

    #[error("unknown table '{table}'")]
    UnknownTable { table: String },

    #[error("table '{table}' is already defined")]
    DuplicateTable { table: String },

    #[error("a {section_type} section requires an id")]
    MissingSectionId { section_type: String },
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    String(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("<null>"),
            FieldValue::Integer(n) => write!(f, "{n}"),
            FieldValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Projection of a row onto its primary key columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimaryKey(pub Vec<String>);

impl PrimaryKey {
    pub fn single(key: &str) -> Self {
        Self(vec![key.to_string()])
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Whether `value` is a legal identifier.
pub fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    value.len() <= MAX_IDENTIFIER_LENGTH
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// A record in one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    definition: Arc<TableDefinition>,
    fields: Vec<FieldValue>,
    overridable: bool,
    source: Option<SourceLineNumber>,
}

impl Row {
    /// Builds a row, validating arity and every field against its column.
    pub fn new(definition: Arc<TableDefinition>, fields: Vec<FieldValue>) -> Result<Self, SchemaViolation> {
        if fields.len() != definition.columns.len() {
            return Err(SchemaViolation::Arity {
                table: definition.name.clone(),
                expected: definition.columns.len(),
                actual: fields.len(),
            });
        }

        for (column, value) in definition.columns.iter().zip(&fields) {
            validate_field(&definition.name, column, value)?;
        }

        Ok(Self {
            definition,
            fields,
            overridable: false,
            source: None,
        })
    }

    pub fn with_source(mut self, source: SourceLineNumber) -> Self {
        self.source = Some(source);
        self
    }

    /// Marks the row's symbol as replaceable by a non-overridable definition.
    pub fn with_overridable(mut self, overridable: bool) -> Self {
        self.overridable = overridable;
        self
    }

    pub fn definition(&self) -> &Arc<TableDefinition> {
        &self.definition
    }

    pub fn table_name(&self) -> &str {
        &self.definition.name
    }

    pub fn fields(&self) -> &[FieldValue] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldValue> {
        self.fields.get(index)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldValue> {
        self.definition.column_index(name).and_then(|i| self.fields.get(i))
    }

    pub fn is_overridable(&self) -> bool {
        self.overridable
    }

    pub fn source(&self) -> Option<&SourceLineNumber> {
        self.source.as_ref()
    }

    /// The primary key, or `None` for tables without key columns.
    pub fn primary_key(&self) -> Option<PrimaryKey> {
        if !self.definition.has_primary_key() {
            return None;
        }
        Some(PrimaryKey(
            self.definition
                .primary_key_columns()
                .map(|i| match &self.fields[i] {
                    FieldValue::Null => String::new(),
                    other => other.to_string(),
                })
                .collect(),
        ))
    }

    /// A copy of this row with one field replaced, re-validated.
    pub fn with_field(&self, column: &str, value: FieldValue) -> Result<Row, SchemaViolation> {
        let index = self
            .definition
            .column_index(column)
            .ok_or_else(|| SchemaViolation::UnknownColumn {
                table: self.definition.name.clone(),
                column: column.to_string(),
            })?;
        validate_field(&self.definition.name, &self.definition.columns[index], &value)?;

        let mut row = self.clone();
        row.fields[index] = value;
        Ok(row)
    }
}

fn validate_field(table: &str, column: &ColumnDefinition, value: &FieldValue) -> Result<(), SchemaViolation> {
    let mismatch = || SchemaViolation::TypeMismatch {
        table: table.to_string(),
        column: column.name.clone(),
        expected: column.ty,
        value: value.to_string(),
    };

    match value {
        FieldValue::Null if column.nullable => Ok(()),
        FieldValue::Null => Err(SchemaViolation::NullValue {
            table: table.to_string(),
            column: column.name.clone(),
        }),
        FieldValue::Integer(n) => {
            if column.ty != ColumnType::Number {
                return Err(mismatch());
            }
            let min = column.min_value.unwrap_or(i64::MIN);
            let max = column.max_value.unwrap_or(i64::MAX);
            if *n < min || *n > max {
                return Err(SchemaViolation::OutOfRange {
                    table: table.to_string(),
                    column: column.name.clone(),
                    value: *n,
                    min,
                    max,
                });
            }
            Ok(())
        }
        FieldValue::String(s) => {
            if !column.ty.is_textual() {
                return Err(mismatch());
            }
            if column.ty == ColumnType::Identifier && !is_identifier(s) {
                return Err(SchemaViolation::InvalidIdentifier {
                    table: table.to_string(),
                    column: column.name.clone(),
                    value: s.clone(),
                });
            }
            if let Some(allowed) = &column.possibilities {
                if !allowed.iter().any(|a| a == s) {
                    return Err(SchemaViolation::NotAllowed {
                        table: table.to_string(),
                        column: column.name.clone(),
                        value: s.clone(),
                        allowed: allowed.clone(),
                    });
                }
            }
            Ok(())
        }
    }
}
