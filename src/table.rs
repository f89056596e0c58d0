//! Table definitions.
//!
//! A table definition names a table and lists its ordered columns. Definitions are
//! immutable once registered and are shared read-only (`Arc`) by every row of the run.
//! The standard catalogue covers the installer concepts the linker itself understands;
//! extensions register their own tables on top of it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::row::SchemaViolation;

/// Column value categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnType {
    /// Free-form text.
    String,
    /// Integer value, optionally range-checked.
    Number,
    /// Text that may contain `!(loc.Id)` localization references.
    Localized,
    /// An identifier: letter or underscore followed by letters, digits, `_` or `.`.
    Identifier,
    /// A reference to binary content (a path resolved by the binder).
    Object,
}

impl ColumnType {
    pub fn is_textual(self) -> bool {
        !matches!(self, ColumnType::Number)
    }
}

/// A single column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    /// Part of the primary key.
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub nullable: bool,
    /// Inclusive bounds for `Number` columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
    /// Allowed values for enumerated text columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub possibilities: Option<Vec<String>>,
}

impl ColumnDefinition {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            primary_key: false,
            nullable: false,
            min_value: None,
            max_value: None,
            possibilities: None,
        }
    }

    pub fn key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.possibilities = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }
}

/// Schema of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    pub fn new(name: &str, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            name: name.to_string(),
            columns,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Indices of the primary key columns, in column order.
    pub fn primary_key_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
    }

    pub fn has_primary_key(&self) -> bool {
        self.columns.iter().any(|c| c.primary_key)
    }
}

/// The set of table definitions known to a run, keyed by table name.
#[derive(Debug, Clone, Default)]
pub struct TableDefinitions {
    tables: IndexMap<String, Arc<TableDefinition>>,
}

impl TableDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in catalogue.
    pub fn standard() -> Self {
        use ColumnType::*;

        let mut defs = Self::new();
        let builtin = [
            TableDefinition::new(
                "Property",
                vec![
                    ColumnDefinition::new("Property", Identifier).key(),
                    ColumnDefinition::new("Value", Localized),
                ],
            ),
            TableDefinition::new(
                "Directory",
                vec![
                    ColumnDefinition::new("Directory", Identifier).key(),
                    ColumnDefinition::new("Directory_Parent", Identifier).nullable(),
                    ColumnDefinition::new("DefaultDir", Localized),
                ],
            ),
            TableDefinition::new(
                "Feature",
                vec![
                    ColumnDefinition::new("Feature", Identifier).key(),
                    ColumnDefinition::new("Feature_Parent", Identifier).nullable(),
                    ColumnDefinition::new("Title", Localized).nullable(),
                    ColumnDefinition::new("Description", Localized).nullable(),
                    ColumnDefinition::new("Display", Number).nullable().range(0, 32767),
                    ColumnDefinition::new("Level", Number).range(0, 32767),
                    ColumnDefinition::new("Directory_", Identifier).nullable(),
                    ColumnDefinition::new("Attributes", Number).range(0, 0x3F),
                ],
            ),
            TableDefinition::new(
                "Component",
                vec![
                    ColumnDefinition::new("Component", Identifier).key(),
                    ColumnDefinition::new("ComponentId", String).nullable(),
                    ColumnDefinition::new("Directory_", Identifier),
                    ColumnDefinition::new("Attributes", Number).range(0, 0xFFFF),
                    ColumnDefinition::new("Condition", String).nullable(),
                    ColumnDefinition::new("KeyPath", Identifier).nullable(),
                ],
            ),
            TableDefinition::new(
                "FeatureComponents",
                vec![
                    ColumnDefinition::new("Feature_", Identifier).key(),
                    ColumnDefinition::new("Component_", Identifier).key(),
                ],
            ),
            TableDefinition::new(
                "CustomAction",
                vec![
                    ColumnDefinition::new("Action", Identifier).key(),
                    ColumnDefinition::new("Type", Number).range(0, 0x7FFF),
                    ColumnDefinition::new("Source", String).nullable(),
                    ColumnDefinition::new("Target", Localized).nullable(),
                ],
            ),
            TableDefinition::new(
                "Binary",
                vec![
                    ColumnDefinition::new("Name", Identifier).key(),
                    ColumnDefinition::new("Data", Object),
                ],
            ),
            TableDefinition::new(
                "Dialog",
                vec![
                    ColumnDefinition::new("Dialog", Identifier).key(),
                    ColumnDefinition::new("HCentering", Number).range(0, 100),
                    ColumnDefinition::new("VCentering", Number).range(0, 100),
                    ColumnDefinition::new("Width", Number).range(0, 32767),
                    ColumnDefinition::new("Height", Number).range(0, 32767),
                    ColumnDefinition::new("Attributes", Number).nullable(),
                    ColumnDefinition::new("Title", Localized).nullable(),
                    ColumnDefinition::new("Control_First", Identifier),
                ],
            ),
            TableDefinition::new(
                "Control",
                vec![
                    ColumnDefinition::new("Dialog_", Identifier).key(),
                    ColumnDefinition::new("Control", Identifier).key(),
                    ColumnDefinition::new("Type", Identifier),
                    ColumnDefinition::new("X", Number).range(0, 32767),
                    ColumnDefinition::new("Y", Number).range(0, 32767),
                    ColumnDefinition::new("Width", Number).range(0, 32767),
                    ColumnDefinition::new("Height", Number).range(0, 32767),
                    ColumnDefinition::new("Attributes", Number).nullable(),
                    ColumnDefinition::new("Property", Identifier).nullable(),
                    ColumnDefinition::new("Text", Localized).nullable(),
                ],
            ),
            TableDefinition::new(
                "WixVariable",
                vec![
                    ColumnDefinition::new("WixVariable", Identifier).key(),
                    ColumnDefinition::new("Value", Localized),
                    ColumnDefinition::new("Overridable", String).one_of(&["yes", "no"]),
                ],
            ),
            TableDefinition::new(
                "WixComponentGroup",
                vec![ColumnDefinition::new("WixComponentGroup", Identifier).key()],
            ),
            TableDefinition::new(
                "WixFeatureGroup",
                vec![ColumnDefinition::new("WixFeatureGroup", Identifier).key()],
            ),
            TableDefinition::new(
                "WixMerge",
                vec![
                    ColumnDefinition::new("WixMerge", Identifier).key(),
                    ColumnDefinition::new("Language", Number).range(0, 0xFFFF),
                    ColumnDefinition::new("Directory_", Identifier),
                    ColumnDefinition::new("SourceFile", Object),
                ],
            ),
        ];

        for def in builtin {
            defs.tables.insert(def.name.clone(), Arc::new(def));
        }
        defs
    }

    /// Registers an additional table, typically from an extension.
    pub fn add(&mut self, definition: TableDefinition) -> Result<Arc<TableDefinition>, SchemaViolation> {
        if self.tables.contains_key(&definition.name) {
            return Err(SchemaViolation::DuplicateTable {
                table: definition.name,
            });
        }
        let def = Arc::new(definition);
        self.tables.insert(def.name.clone(), Arc::clone(&def));
        Ok(def)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TableDefinition>> {
        self.tables.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Arc<TableDefinition>, SchemaViolation> {
        self.get(name).ok_or_else(|| SchemaViolation::UnknownTable {
            table: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TableDefinition>> {
        self.tables.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalogue_has_core_tables() {
        let defs = TableDefinitions::standard();
        for name in ["Feature", "Component", "CustomAction", "Property", "Control"] {
            assert!(defs.get(name).is_some(), "missing {name}");
        }
        let control = defs.require("Control").unwrap();
        let keys: Vec<_> = control.primary_key_columns().collect();
        assert_eq!(keys, vec![0, 1]);
    }

    #[test]
    fn extension_tables_cannot_shadow_existing_ones() {
        let mut defs = TableDefinitions::standard();
        let dup = TableDefinition::new("Feature", vec![ColumnDefinition::new("Id", ColumnType::Identifier).key()]);
        assert!(matches!(defs.add(dup), Err(SchemaViolation::DuplicateTable { .. })));

        let ext = TableDefinition::new(
            "XmlFile",
            vec![ColumnDefinition::new("XmlFile", ColumnType::Identifier).key()],
        );
        defs.add(ext).unwrap();
        assert_eq!(defs.require("XmlFile").unwrap().column_index("XmlFile"), Some(0));
    }

    #[test]
    fn unknown_table_is_a_schema_violation() {
        let defs = TableDefinitions::standard();
        assert!(matches!(
            defs.require("NoSuchTable"),
            Err(SchemaViolation::UnknownTable { table }) if table == "NoSuchTable"
        ));
    }
}
