//! Linked output.
//!
//! The `Output` aggregates the rows of every reachable section into per-table
//! collections, much like segments aggregate input sections of the same kind. It is
//! created once per successful link and never mutated afterwards.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::localization::{ControlKey, LocalizedControl, LocalizedString};
use crate::row::Row;
use crate::section::{ComplexReference, EntityRef};
use crate::table::TableDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputType {
    /// A single installer package.
    Product,
    /// A merge module.
    Module,
    PatchCreation,
    Patch,
    Bundle,
}

impl OutputType {
    /// Infers the expected output type from an output file extension.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().trim_start_matches('.') {
            "msi" => Some(OutputType::Product),
            "msm" => Some(OutputType::Module),
            "pcp" => Some(OutputType::PatchCreation),
            "msp" | "wixmsp" => Some(OutputType::Patch),
            "exe" => Some(OutputType::Bundle),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|e| e.to_str()).and_then(Self::from_extension)
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputType::Product => "Product",
            OutputType::Module => "Module",
            OutputType::PatchCreation => "PatchCreation",
            OutputType::Patch => "Patch",
            OutputType::Bundle => "Bundle",
        })
    }
}

/// All linked rows of one table, in link order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTable {
    pub definition: Arc<TableDefinition>,
    pub rows: Vec<Arc<Row>>,
}

impl OutputTable {
    pub fn new(definition: Arc<TableDefinition>) -> Self {
        Self {
            definition,
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

/// The fully linked, resolved model handed to the binder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub output_type: OutputType,
    /// Id of the entry section.
    pub entry: String,
    pub codepage: Option<u32>,
    /// Cultures of the localization that was merged in, in merge order.
    pub cultures: Vec<String>,
    pub tables: IndexMap<String, OutputTable>,
    pub variables: IndexMap<String, LocalizedString>,
    pub controls: IndexMap<ControlKey, LocalizedControl>,
    /// Resolved structural edges among linked entities.
    pub complex_references: Vec<ComplexReference>,
    /// Owning parent of every child entity.
    pub owners: IndexMap<EntityRef, EntityRef>,
}

impl Output {
    pub fn new(output_type: OutputType, entry: &str) -> Self {
        Self {
            output_type,
            entry: entry.to_string(),
            codepage: None,
            cultures: Vec::new(),
            tables: IndexMap::new(),
            variables: IndexMap::new(),
            controls: IndexMap::new(),
            complex_references: Vec::new(),
            owners: IndexMap::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&OutputTable> {
        self.tables.get(name)
    }

    /// Appends a row to its table, creating the table on first use.
    pub(crate) fn push_row(&mut self, row: Arc<Row>) {
        self.tables
            .entry(row.table_name().to_string())
            .or_insert_with(|| OutputTable::new(Arc::clone(row.definition())))
            .rows
            .push(row);
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(|t| t.rows.len()).sum()
    }

    pub fn rows(&self) -> impl Iterator<Item = &Arc<Row>> {
        self.tables.values().flat_map(|t| t.rows.iter())
    }

    pub fn variable(&self, id: &str) -> Option<&str> {
        self.variables.get(id).map(|v| v.value.as_str())
    }

    pub fn owner(&self, child: &EntityRef) -> Option<&EntityRef> {
        self.owners.get(child)
    }
}
