//! Extension capabilities.
//!
//! Two independent seams:
//! - `ExtensionData`: what an extension contributes to a link (tables, a library of
//!   fragments, localization and its default culture).
//! - `CompilerExtension`: how an extension turns markup in its own namespace into rows
//!   and references of the section being compiled.
//!
//! The linker only ever sees `ExtensionData` through `Arc<dyn ExtensionData>`; it never
//! depends on a concrete extension type.

use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::diagnostic::SourceLineNumber;
use crate::intermediate::Library;
use crate::row::SchemaViolation;
use crate::section::SectionBuilder;
use crate::table::{TableDefinition, TableDefinitions};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    #[error("{location}: the {parent} element contains an unexpected child element {namespace}:{element}")]
    UnexpectedElement {
        location: SourceLineNumber,
        namespace: String,
        parent: String,
        element: String,
    },

    #[error("{location}: the {element} element contains an unexpected attribute {namespace}:{attribute}")]
    UnexpectedAttribute {
        location: SourceLineNumber,
        namespace: String,
        element: String,
        attribute: String,
    },

    #[error("{location}: the {element} element requires the {attribute} attribute")]
    ExpectedAttribute {
        location: SourceLineNumber,
        element: String,
        attribute: String,
    },

    #[error("no extension handles the namespace '{namespace}'")]
    UnknownNamespace { namespace: String },

    #[error("an extension for the namespace '{namespace}' is already registered")]
    DuplicateNamespace { namespace: String },

    #[error(transparent)]
    Schema(#[from] SchemaViolation),
}

/// A markup element handed to a compiler extension.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub namespace: String,
    pub name: String,
    pub attributes: IndexMap<String, String>,
    pub children: Vec<Element>,
    pub text: Option<String>,
    pub source: Option<SourceLineNumber>,
}

impl Element {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn location(&self) -> SourceLineNumber {
        self.source.clone().unwrap_or_else(|| SourceLineNumber::file(&self.name))
    }

    /// A required attribute.
    pub fn require(&self, name: &str) -> Result<&str, ExtensionError> {
        self.get(name).ok_or_else(|| ExtensionError::ExpectedAttribute {
            location: self.location(),
            element: self.name.clone(),
            attribute: name.to_string(),
        })
    }

    pub fn unexpected_child(&self, child: &Element) -> ExtensionError {
        ExtensionError::UnexpectedElement {
            location: child.location(),
            namespace: child.namespace.clone(),
            parent: self.name.clone(),
            element: child.name.clone(),
        }
    }
}

/// Data contributed to a link by an extension.
pub trait ExtensionData: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Tables the extension's rows live in.
    fn table_definitions(&self) -> Vec<TableDefinition> {
        Vec::new()
    }

    /// Culture used for the extension's localization when the caller asked for none.
    fn default_culture(&self) -> Option<&str> {
        None
    }

    /// Fragments linked in only when referenced, plus their localization.
    fn library(&self) -> Option<&Library> {
        None
    }
}

/// Compiles elements and attributes of one XML namespace.
pub trait CompilerExtension: Send + Sync {
    fn namespace(&self) -> &str;

    /// Handles an element from this extension's namespace nested in `parent`.
    fn parse_element(
        &self,
        parent: &Element,
        element: &Element,
        tables: &TableDefinitions,
        section: &mut SectionBuilder,
    ) -> Result<(), ExtensionError>;

    /// Handles an attribute from this extension's namespace on a core element.
    fn parse_attribute(
        &self,
        element: &Element,
        attribute: &str,
        _value: &str,
        _tables: &TableDefinitions,
        _section: &mut SectionBuilder,
    ) -> Result<(), ExtensionError> {
        Err(ExtensionError::UnexpectedAttribute {
            location: element.location(),
            namespace: self.namespace().to_string(),
            element: element.name.clone(),
            attribute: attribute.to_string(),
        })
    }

    /// Called once the whole section has been parsed.
    fn finalize(&self, _tables: &TableDefinitions, _section: &mut SectionBuilder) -> Result<(), ExtensionError> {
        Ok(())
    }
}

/// Registered extensions of a run.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    compilers: IndexMap<String, Arc<dyn CompilerExtension>>,
    data: Vec<Arc<dyn ExtensionData>>,
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("compilers", &self.compilers.keys().collect::<Vec<_>>())
            .field("data", &self.data)
            .finish()
    }
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_compiler(&mut self, extension: Arc<dyn CompilerExtension>) -> Result<(), ExtensionError> {
        let namespace = extension.namespace().to_string();
        if self.compilers.contains_key(&namespace) {
            return Err(ExtensionError::DuplicateNamespace { namespace });
        }
        self.compilers.insert(namespace, extension);
        Ok(())
    }

    pub fn add_data(&mut self, extension: Arc<dyn ExtensionData>) {
        self.data.push(extension);
    }

    pub fn data(&self) -> &[Arc<dyn ExtensionData>] {
        &self.data
    }

    /// The standard tables plus every table contributed by a data extension.
    pub fn table_definitions(&self) -> Result<TableDefinitions, SchemaViolation> {
        let mut tables = TableDefinitions::standard();
        for extension in &self.data {
            for definition in extension.table_definitions() {
                if tables.get(&definition.name).map_or(false, |existing| **existing == definition) {
                    continue;
                }
                tables.add(definition)?;
            }
        }
        Ok(tables)
    }

    fn compiler(&self, namespace: &str) -> Result<&Arc<dyn CompilerExtension>, ExtensionError> {
        self.compilers.get(namespace).ok_or_else(|| ExtensionError::UnknownNamespace {
            namespace: namespace.to_string(),
        })
    }

    /// Dispatches `element` to the extension owning its namespace.
    pub fn parse_element(
        &self,
        parent: &Element,
        element: &Element,
        tables: &TableDefinitions,
        section: &mut SectionBuilder,
    ) -> Result<(), ExtensionError> {
        self.compiler(&element.namespace)?
            .parse_element(parent, element, tables, section)
    }

    /// Dispatches a namespaced attribute of `element`.
    pub fn parse_attribute(
        &self,
        element: &Element,
        namespace: &str,
        attribute: &str,
        value: &str,
        tables: &TableDefinitions,
        section: &mut SectionBuilder,
    ) -> Result<(), ExtensionError> {
        self.compiler(namespace)?
            .parse_attribute(element, attribute, value, tables, section)
    }

    /// Finalizes `section` with every compiler extension, in registration order.
    pub fn finalize(&self, tables: &TableDefinitions, section: &mut SectionBuilder) -> Result<(), ExtensionError> {
        for extension in self.compilers.values() {
            extension.finalize(tables, section)?;
        }
        Ok(())
    }
}

/// An extension whose contribution is a library loaded from disk.
#[derive(Debug, Clone)]
pub struct LibraryExtension {
    name: String,
    library: Library,
}

impl LibraryExtension {
    pub fn new(name: &str, library: Library) -> Self {
        Self {
            name: name.to_string(),
            library,
        }
    }
}

impl ExtensionData for LibraryExtension {
    fn name(&self) -> &str {
        &self.name
    }

    fn table_definitions(&self) -> Vec<TableDefinition> {
        self.library.tables.clone()
    }

    fn default_culture(&self) -> Option<&str> {
        self.library.default_culture.as_deref()
    }

    fn library(&self) -> Option<&Library> {
        Some(&self.library)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;
    use crate::section::SimpleReference;
    use crate::table::{ColumnDefinition, ColumnType};

    const UTIL: &str = "http://example.org/schemas/util";

    /// Compiles `<util:Property Id=".." Value=".."/>` into a Property row and a
    /// `util:Search` attribute into a reference.
    struct UtilCompiler;

    impl CompilerExtension for UtilCompiler {
        fn namespace(&self) -> &str {
            UTIL
        }

        fn parse_element(
            &self,
            parent: &Element,
            element: &Element,
            tables: &TableDefinitions,
            section: &mut SectionBuilder,
        ) -> Result<(), ExtensionError> {
            if element.name != "Property" {
                return Err(parent.unexpected_child(element));
            }
            let id = element.require("Id")?;
            let value = element.require("Value")?;
            section.push_row(Row::new(
                Arc::clone(tables.require("Property")?),
                vec![id.into(), value.into()],
            )?);
            Ok(())
        }

        fn parse_attribute(
            &self,
            element: &Element,
            attribute: &str,
            value: &str,
            _tables: &TableDefinitions,
            section: &mut SectionBuilder,
        ) -> Result<(), ExtensionError> {
            match attribute {
                "Search" => {
                    section.push_simple_reference(SimpleReference::new("Property", value));
                    Ok(())
                }
                _ => Err(ExtensionError::UnexpectedAttribute {
                    location: element.location(),
                    namespace: UTIL.to_string(),
                    element: element.name.clone(),
                    attribute: attribute.to_string(),
                }),
            }
        }
    }

    #[derive(Debug)]
    struct TablesOnly;

    impl ExtensionData for TablesOnly {
        fn name(&self) -> &str {
            "tables"
        }

        fn table_definitions(&self) -> Vec<TableDefinition> {
            vec![TableDefinition::new(
                "Wix4Setting",
                vec![
                    ColumnDefinition::new("Id", ColumnType::Identifier).key(),
                    ColumnDefinition::new("Value", ColumnType::String).nullable(),
                ],
            )]
        }
    }

    fn registry() -> ExtensionRegistry {
        let mut registry = ExtensionRegistry::new();
        registry.add_compiler(Arc::new(UtilCompiler)).unwrap();
        registry.add_data(Arc::new(TablesOnly));
        registry
    }

    #[test]
    fn dispatches_by_namespace() {
        let registry = registry();
        let tables = registry.table_definitions().unwrap();
        let fragment = Element::new("wix", "Fragment");
        let mut section = SectionBuilder::fragment();

        let property = Element::new(UTIL, "Property").attribute("Id", "Mode").attribute("Value", "1");
        registry.parse_element(&fragment, &property, &tables, &mut section).unwrap();
        registry
            .parse_attribute(&fragment, UTIL, "Search", "Other", &tables, &mut section)
            .unwrap();
        registry.finalize(&tables, &mut section).unwrap();

        let section = section.build().unwrap();
        assert_eq!(section.rows().len(), 1);
        assert_eq!(section.simple_references().len(), 1);
    }

    #[test]
    fn rejects_unknown_input() {
        let registry = registry();
        let tables = registry.table_definitions().unwrap();
        let fragment = Element::new("wix", "Fragment");
        let mut section = SectionBuilder::fragment();

        let other = Element::new("http://example.org/other", "Thing");
        assert_eq!(
            registry.parse_element(&fragment, &other, &tables, &mut section),
            Err(ExtensionError::UnknownNamespace {
                namespace: "http://example.org/other".into()
            })
        );

        let missing = Element::new(UTIL, "Property").attribute("Id", "Mode");
        assert!(matches!(
            registry.parse_element(&fragment, &missing, &tables, &mut section),
            Err(ExtensionError::ExpectedAttribute { attribute, .. }) if attribute == "Value"
        ));

        let unexpected = Element::new(UTIL, "Widget");
        assert!(matches!(
            registry.parse_element(&fragment, &unexpected, &tables, &mut section),
            Err(ExtensionError::UnexpectedElement { .. })
        ));
    }

    #[test]
    fn extension_tables_join_the_standard_set() {
        let tables = registry().table_definitions().unwrap();
        assert!(tables.get("Wix4Setting").is_some());
        assert!(tables.get("Property").is_some());

        let mut duplicate = registry();
        assert_eq!(
            duplicate.add_compiler(Arc::new(UtilCompiler)),
            Err(ExtensionError::DuplicateNamespace { namespace: UTIL.into() })
        );
    }
}
