//! Sections: the unit of linking.
//!
//! A section is what one compiled fragment (or one entry of a library) contributes:
//! its rows, the symbols those rows export, and the references it declares. Sections are
//! immutable once built; the linker only reads them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::diagnostic::SourceLineNumber;
use crate::output::OutputType;
use crate::row::{PrimaryKey, Row, SchemaViolation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SectionType {
    Fragment,
    Product,
    Module,
    PatchCreation,
    Patch,
    Bundle,
}

impl SectionType {
    /// The output type an entry section of this type produces; `None` for fragments.
    pub fn output_type(self) -> Option<OutputType> {
        match self {
            SectionType::Fragment => None,
            SectionType::Product => Some(OutputType::Product),
            SectionType::Module => Some(OutputType::Module),
            SectionType::PatchCreation => Some(OutputType::PatchCreation),
            SectionType::Patch => Some(OutputType::Patch),
            SectionType::Bundle => Some(OutputType::Bundle),
        }
    }

    pub fn is_entry(self) -> bool {
        self.output_type().is_some()
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SectionType::Fragment => "fragment",
            SectionType::Product => "product",
            SectionType::Module => "module",
            SectionType::PatchCreation => "patchCreation",
            SectionType::Patch => "patch",
            SectionType::Bundle => "bundle",
        })
    }
}

/// Where a section came from, for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Provenance {
    #[default]
    Inline,
    Object(PathBuf),
    Library(PathBuf),
    Extension(String),
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Inline => f.write_str("<inline>"),
            Provenance::Object(path) => write!(f, "{}", path.display()),
            Provenance::Library(path) => write!(f, "library {}", path.display()),
            Provenance::Extension(name) => write!(f, "extension {name}"),
        }
    }
}

/// A (table, primary key) identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolKey {
    pub table: String,
    pub key: PrimaryKey,
}

impl SymbolKey {
    pub fn new(table: &str, key: PrimaryKey) -> Self {
        Self {
            table: table.to_string(),
            key,
        }
    }

    pub fn single(table: &str, key: &str) -> Self {
        Self::new(table, PrimaryKey::single(key))
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.key)
    }
}

/// A symbol exported by one row of a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedSymbol {
    pub key: SymbolKey,
    pub row: usize,
    pub overridable: bool,
}

/// A lookup dependency on a symbol defined somewhere in the link unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleReference {
    pub symbol: SymbolKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceLineNumber>,
}

impl SimpleReference {
    pub fn new(table: &str, key: &str) -> Self {
        Self {
            symbol: SymbolKey::single(table, key),
            source: None,
        }
    }
}

/// Kinds of entities taking part in the ownership tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Product,
    Module,
    Patch,
    Bundle,
    Feature,
    FeatureGroup,
    Component,
    ComponentGroup,
    Merge,
}

impl EntityKind {
    /// Table whose rows define entities of this kind. Root kinds are defined by the
    /// entry section itself and have no table.
    pub fn table(self) -> Option<&'static str> {
        match self {
            EntityKind::Product | EntityKind::Module | EntityKind::Patch | EntityKind::Bundle => None,
            EntityKind::Feature => Some("Feature"),
            EntityKind::FeatureGroup => Some("WixFeatureGroup"),
            EntityKind::Component => Some("Component"),
            EntityKind::ComponentGroup => Some("WixComponentGroup"),
            EntityKind::Merge => Some("WixMerge"),
        }
    }

    /// The root entity kind of an entry section.
    pub fn root_of(section_type: SectionType) -> Option<EntityKind> {
        match section_type {
            SectionType::Product => Some(EntityKind::Product),
            SectionType::Module => Some(EntityKind::Module),
            SectionType::Patch | SectionType::PatchCreation => Some(EntityKind::Patch),
            SectionType::Bundle => Some(EntityKind::Bundle),
            SectionType::Fragment => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An identifiable node of the ownership tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }

    /// The symbol defining this entity, if it is table-backed.
    pub fn symbol(&self) -> Option<SymbolKey> {
        self.kind.table().map(|t| SymbolKey::single(t, &self.id))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.id)
    }
}

/// A structural parent/child edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexReference {
    pub parent: EntityRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_language: Option<String>,
    pub child: EntityRef,
    #[serde(default)]
    pub primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceLineNumber>,
}

impl ComplexReference {
    pub fn new(parent: EntityRef, child: EntityRef, primary: bool) -> Self {
        Self {
            parent,
            parent_language: None,
            child,
            primary,
            source: None,
        }
    }

    /// Qualifies the parent with a language, as a localized parent owns a separate
    /// copy of the edge.
    pub fn with_parent_language(mut self, language: &str) -> Self {
        self.parent_language = Some(language.to_string());
        self
    }
}

/// One compiled fragment or library entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    id: Option<String>,
    ty: SectionType,
    codepage: Option<u32>,
    language: Option<String>,
    rows: Vec<Arc<Row>>,
    symbols: Vec<ExportedSymbol>,
    simple_references: Vec<SimpleReference>,
    complex_references: Vec<ComplexReference>,
    source: Option<SourceLineNumber>,
    provenance: Provenance,
}

impl Section {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn section_type(&self) -> SectionType {
        self.ty
    }

    pub fn codepage(&self) -> Option<u32> {
        self.codepage
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn rows(&self) -> &[Arc<Row>] {
        &self.rows
    }

    pub fn symbols(&self) -> &[ExportedSymbol] {
        &self.symbols
    }

    pub fn simple_references(&self) -> &[SimpleReference] {
        &self.simple_references
    }

    pub fn complex_references(&self) -> &[ComplexReference] {
        &self.complex_references
    }

    pub fn source(&self) -> Option<&SourceLineNumber> {
        self.source.as_ref()
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// The entity this section roots, for entry sections.
    pub fn root_entity(&self) -> Option<EntityRef> {
        let kind = EntityKind::root_of(self.ty)?;
        Some(EntityRef::new(kind, self.id.as_deref().unwrap_or_default()))
    }

    /// Best location for a row: its own source, else the section's, else the file it came from.
    pub fn row_location(&self, row: usize) -> SourceLineNumber {
        self.rows
            .get(row)
            .and_then(|r| r.source().cloned())
            .unwrap_or_else(|| self.location())
    }

    pub fn location(&self) -> SourceLineNumber {
        self.source
            .clone()
            .unwrap_or_else(|| SourceLineNumber::file(&self.provenance.to_string()))
    }

    /// Human-readable identity, e.g. `product:MyProduct` or `fragment#3`.
    pub fn display_name(&self, index: usize) -> String {
        match &self.id {
            Some(id) => format!("{}:{}", self.ty, id),
            None => format!("{}#{}", self.ty, index),
        }
    }
}

/// Incrementally assembles a `Section`.
#[derive(Debug, Clone)]
pub struct SectionBuilder {
    section: Section,
}

impl SectionBuilder {
    pub fn new(ty: SectionType, id: Option<&str>) -> Self {
        Self {
            section: Section {
                id: id.map(str::to_string),
                ty,
                codepage: None,
                language: None,
                rows: Vec::new(),
                symbols: Vec::new(),
                simple_references: Vec::new(),
                complex_references: Vec::new(),
                source: None,
                provenance: Provenance::Inline,
            },
        }
    }

    pub fn fragment() -> Self {
        Self::new(SectionType::Fragment, None)
    }

    pub fn codepage(mut self, codepage: u32) -> Self {
        self.section.codepage = Some(codepage);
        self
    }

    pub fn language(mut self, language: &str) -> Self {
        self.section.language = Some(language.to_string());
        self
    }

    pub fn source(mut self, source: SourceLineNumber) -> Self {
        self.section.source = Some(source);
        self
    }

    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.section.provenance = provenance;
        self
    }

    pub fn row(mut self, row: Row) -> Self {
        self.push_row(row);
        self
    }

    pub fn push_row(&mut self, row: Row) {
        self.section.rows.push(Arc::new(row));
    }

    pub fn simple_reference(mut self, reference: SimpleReference) -> Self {
        self.push_simple_reference(reference);
        self
    }

    pub fn push_simple_reference(&mut self, reference: SimpleReference) {
        self.section.simple_references.push(reference);
    }

    pub fn complex_reference(mut self, reference: ComplexReference) -> Self {
        self.push_complex_reference(reference);
        self
    }

    pub fn push_complex_reference(&mut self, reference: ComplexReference) {
        self.section.complex_references.push(reference);
    }

    /// Finishes the section, deriving the exported symbols from keyed rows.
    pub fn build(mut self) -> Result<Section, SchemaViolation> {
        if self.section.ty.is_entry() && self.section.id.as_deref().map_or(true, str::is_empty) {
            return Err(SchemaViolation::MissingSectionId {
                section_type: self.section.ty.to_string(),
            });
        }

        self.section.symbols = self
            .section
            .rows
            .iter()
            .enumerate()
            .filter_map(|(index, row)| {
                row.primary_key().map(|key| ExportedSymbol {
                    key: SymbolKey::new(row.table_name(), key),
                    row: index,
                    overridable: row.is_overridable(),
                })
            })
            .collect();

        Ok(self.section)
    }
}
