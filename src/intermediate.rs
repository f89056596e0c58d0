//! Intermediate and library documents.
//!
//! Compiled fragments reach the linker as JSON documents: an *intermediate* holds the
//! sections of one compiled source file, a *library* bundles sections with the
//! localization documents they need. Both may declare custom tables their rows use.
//!
//! Reading is split in two: documents are mapped and decoded in parallel, then turned
//! into sections one after another so that declared tables register in argument order.

use memmap2::Mmap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::diagnostic::SourceLineNumber;
use crate::localization::{LocalizationError, LocalizationSet};
use crate::row::{FieldValue, Row, SchemaViolation};
use crate::section::{ComplexReference, Provenance, Section, SectionBuilder, SectionType, SimpleReference};
use crate::table::{TableDefinition, TableDefinitions};

/// Document format version written and accepted by this toolchain.
pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: invalid document: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path}: {source}")]
    Schema {
        path: String,
        #[source]
        source: SchemaViolation,
    },

    #[error("{path}: {source}")]
    Localization {
        path: String,
        #[source]
        source: LocalizationError,
    },

    #[error("{path}: document version {found} is not supported, expected version {expected}")]
    VersionMismatch { path: String, found: u32, expected: u32 },

    #[error("{path}: expected a {expected} document but found a {found} document")]
    WrongKind {
        path: String,
        expected: DocumentKind,
        found: DocumentKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentKind {
    Intermediate,
    Library,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentKind::Intermediate => "intermediate",
            DocumentKind::Library => "library",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowDocument {
    pub table: String,
    pub fields: Vec<FieldValue>,
    #[serde(default)]
    pub overridable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceLineNumber>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionDocument {
    #[serde(rename = "type")]
    pub section_type: SectionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codepage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceLineNumber>,
    #[serde(default)]
    pub rows: Vec<RowDocument>,
    #[serde(default)]
    pub simple_references: Vec<SimpleReference>,
    #[serde(default)]
    pub complex_references: Vec<ComplexReference>,
}

/// On-disk shape of intermediates and libraries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub kind: DocumentKind,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableDefinition>,
    #[serde(default)]
    pub sections: Vec<SectionDocument>,
    /// Embedded `WixLocalization` documents (libraries only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub localizations: Vec<String>,
    /// Culture applied when the library is used as an extension and no culture was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_culture: Option<String>,
}

impl Document {
    /// Maps `path` and decodes it.
    pub fn read(path: &Path) -> Result<Self, LoadError> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|source| LoadError::Io {
            path: display.clone(),
            source,
        })?;
        // SAFETY: the mapping is read-only and dropped before returning.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| LoadError::Io {
            path: display.clone(),
            source,
        })?;
        serde_json::from_slice(&mmap).map_err(|source| LoadError::Json { path: display, source })
    }
}

/// Pre-linked sections plus the localization shipped with them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Library {
    pub sections: Vec<Arc<Section>>,
    pub localizations: Vec<Arc<LocalizationSet>>,
    /// Custom tables used by the library's rows.
    pub tables: Vec<TableDefinition>,
    pub default_culture: Option<String>,
}

/// One loaded input.
#[derive(Debug, Clone)]
pub enum Loaded {
    Intermediate(Vec<Arc<Section>>),
    Library(Library),
}

/// Turns documents into sections against a growing set of table definitions.
#[derive(Debug, Clone)]
pub struct Loader {
    tables: TableDefinitions,
    suppress_version_check: bool,
}

impl Loader {
    pub fn new(tables: TableDefinitions) -> Self {
        Self {
            tables,
            suppress_version_check: false,
        }
    }

    pub fn suppress_version_check(mut self, suppress: bool) -> Self {
        self.suppress_version_check = suppress;
        self
    }

    pub fn tables(&self) -> &TableDefinitions {
        &self.tables
    }

    pub fn into_tables(self) -> TableDefinitions {
        self.tables
    }

    /// Loads every path. Decoding runs in parallel; results keep the order of `paths`.
    pub fn load_all(&mut self, paths: &[PathBuf]) -> Result<Vec<Loaded>, LoadError> {
        let documents = paths
            .par_iter()
            .map(|path| Document::read(path))
            .collect::<Result<Vec<_>, _>>()?;

        paths
            .iter()
            .zip(documents)
            .map(|(path, document)| self.load_document(document, path))
            .collect()
    }

    pub fn load(&mut self, path: &Path) -> Result<Loaded, LoadError> {
        let document = Document::read(path)?;
        self.load_document(document, path)
    }

    pub fn load_library(&mut self, path: &Path) -> Result<Library, LoadError> {
        match self.load(path)? {
            Loaded::Library(library) => Ok(library),
            Loaded::Intermediate(_) => Err(LoadError::WrongKind {
                path: path.display().to_string(),
                expected: DocumentKind::Library,
                found: DocumentKind::Intermediate,
            }),
        }
    }

    /// Loads a library on behalf of the extension `name`.
    pub fn load_extension(&mut self, path: &Path, name: &str) -> Result<Library, LoadError> {
        let document = Document::read(path)?;
        if document.kind != DocumentKind::Library {
            return Err(LoadError::WrongKind {
                path: path.display().to_string(),
                expected: DocumentKind::Library,
                found: document.kind,
            });
        }
        match self.convert(document, path, Provenance::Extension(name.to_string()))? {
            Loaded::Library(library) => Ok(library),
            Loaded::Intermediate(_) => Err(LoadError::WrongKind {
                path: path.display().to_string(),
                expected: DocumentKind::Library,
                found: DocumentKind::Intermediate,
            }),
        }
    }

    pub fn load_document(&mut self, document: Document, path: &Path) -> Result<Loaded, LoadError> {
        let provenance = match document.kind {
            DocumentKind::Intermediate => Provenance::Object(path.to_path_buf()),
            DocumentKind::Library => Provenance::Library(path.to_path_buf()),
        };
        self.convert(document, path, provenance)
    }

    fn convert(&mut self, document: Document, path: &Path, provenance: Provenance) -> Result<Loaded, LoadError> {
        let shown = path.display().to_string();
        if document.version != DOCUMENT_VERSION && !self.suppress_version_check {
            return Err(LoadError::VersionMismatch {
                path: shown,
                found: document.version,
                expected: DOCUMENT_VERSION,
            });
        }
        let schema = |source| LoadError::Schema {
            path: shown.clone(),
            source,
        };

        for table in &document.tables {
            match self.tables.get(&table.name) {
                Some(existing) if **existing == *table => {}
                _ => {
                    self.tables.add(table.clone()).map_err(schema)?;
                }
            }
        }

        let sections = document
            .sections
            .into_iter()
            .map(|section| self.build_section(section, provenance.clone()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()
            .map_err(schema)?;
        tracing::debug!(path = %shown, kind = %document.kind, sections = sections.len(), "loaded document");

        match document.kind {
            DocumentKind::Intermediate => Ok(Loaded::Intermediate(sections)),
            DocumentKind::Library => {
                let localizations = document
                    .localizations
                    .iter()
                    .enumerate()
                    .map(|(index, xml)| {
                        LocalizationSet::parse(xml, &format!("{shown}#{index}")).map(Arc::new)
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|source| LoadError::Localization {
                        path: shown.clone(),
                        source,
                    })?;
                Ok(Loaded::Library(Library {
                    sections,
                    localizations,
                    tables: document.tables,
                    default_culture: document.default_culture,
                }))
            }
        }
    }

    fn build_section(&self, document: SectionDocument, provenance: Provenance) -> Result<Section, SchemaViolation> {
        let mut builder = SectionBuilder::new(document.section_type, document.id.as_deref()).provenance(provenance);
        if let Some(codepage) = document.codepage {
            builder = builder.codepage(codepage);
        }
        if let Some(language) = &document.language {
            builder = builder.language(language);
        }
        if let Some(source) = document.source {
            builder = builder.source(source);
        }
        for row in document.rows {
            let definition = Arc::clone(self.tables.require(&row.table)?);
            let mut built = Row::new(definition, row.fields)?.with_overridable(row.overridable);
            if let Some(source) = row.source {
                built = built.with_source(source);
            }
            builder.push_row(built);
        }
        for reference in document.simple_references {
            builder.push_simple_reference(reference);
        }
        for reference in document.complex_references {
            builder.push_complex_reference(reference);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intermediate(json: &str) -> Document {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn builds_sections_from_document() {
        let document = intermediate(
            r#"{
                "kind": "intermediate",
                "version": 1,
                "sections": [{
                    "type": "product",
                    "id": "P",
                    "rows": [{ "table": "Property", "fields": ["Mode", "1"] }],
                    "simpleReferences": [{ "symbol": { "table": "CustomAction", "key": ["Run"] } }]
                }]
            }"#,
        );
        let mut loader = Loader::new(TableDefinitions::standard());
        let Loaded::Intermediate(sections) = loader.load_document(document, Path::new("p.json")).unwrap() else {
            panic!("expected an intermediate");
        };

        assert_eq!(sections.len(), 1);
        let section = &sections[0];
        assert_eq!(section.id(), Some("P"));
        assert_eq!(section.rows()[0].field(0), Some(&FieldValue::from("Mode")));
        assert_eq!(section.simple_references()[0].symbol.to_string(), "CustomAction:Run");
        assert_eq!(section.provenance(), &Provenance::Object(PathBuf::from("p.json")));
    }

    #[test]
    fn rejects_other_versions_unless_suppressed() {
        let json = r#"{ "kind": "intermediate", "version": 7, "sections": [] }"#;
        let mut strict = Loader::new(TableDefinitions::standard());
        assert!(matches!(
            strict.load_document(intermediate(json), Path::new("old.json")),
            Err(LoadError::VersionMismatch { found: 7, expected: 1, .. })
        ));

        let mut lenient = Loader::new(TableDefinitions::standard()).suppress_version_check(true);
        assert!(lenient.load_document(intermediate(json), Path::new("old.json")).is_ok());
    }

    #[test]
    fn declared_tables_are_registered() {
        let document = intermediate(
            r#"{
                "kind": "intermediate",
                "version": 1,
                "tables": [{
                    "name": "Wix4Setting",
                    "columns": [
                        { "name": "Id", "type": "identifier", "primaryKey": true },
                        { "name": "Value", "type": "string", "nullable": true }
                    ]
                }],
                "sections": [{ "type": "fragment", "rows": [{ "table": "Wix4Setting", "fields": ["A", null] }] }]
            }"#,
        );
        let mut loader = Loader::new(TableDefinitions::standard());
        loader.load_document(document.clone(), Path::new("a.json")).unwrap();
        assert!(loader.tables().get("Wix4Setting").is_some());
        // Identical redeclarations are fine.
        loader.load_document(document, Path::new("b.json")).unwrap();
    }

    #[test]
    fn unknown_tables_are_schema_errors() {
        let document = intermediate(
            r#"{ "kind": "intermediate", "version": 1,
                 "sections": [{ "type": "fragment", "rows": [{ "table": "Nope", "fields": [] }] }] }"#,
        );
        let mut loader = Loader::new(TableDefinitions::standard());
        assert!(matches!(
            loader.load_document(document, Path::new("x.json")),
            Err(LoadError::Schema {
                source: SchemaViolation::UnknownTable { .. },
                ..
            })
        ));
    }
}
