//! Core Linker logic.
//!
//! This module contains the `Linker` struct which orchestrates a link run:
//! 1. Working set: the caller's sections followed by extension library sections.
//! 2. Symbol Resolution: builds the symbol table and reports duplicates.
//! 3. Entry: finds the single top-level section and checks the output type.
//! 4. Reachability: keeps only sections reachable from the entry section.
//! 5. References: resolves simple references and validates the complex graph.
//! 6. Localization: merges string variables and localized controls.
//! 7. Output: flattens reachable rows in load order, then row order.
//!
//! Every phase runs even after an earlier one reported an error, so one link reports
//! every independent problem. The output is only produced when no error was reported.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::diagnostic::{Diagnostic, Diagnostics, Message, Severity};
use crate::extension::ExtensionData;
use crate::graph::{reachable_sections, ComplexGraph, EntityResolver};
use crate::localizer::{localization_references, Localizer, TieBreak};
use crate::output::{Output, OutputType};
use crate::row::Row;
use crate::section::{EntityKind, EntityRef, Provenance, Section, SymbolKey};
use crate::symbol::SymbolTable;
use crate::table::ColumnType;
use crate::utils::component_guid;

/// Placeholder asking the linker to generate a component GUID.
pub const GENERATE_GUID: &str = "*";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOptions {
    /// Output type the entry section must produce, usually implied by the output file.
    pub expected_type: Option<OutputType>,
    /// Report otherwise silent notices such as dropped sections and overridable ties.
    pub pedantic: bool,
    /// Report unresolved references as warnings instead of errors.
    pub allow_unresolved_references: bool,
    /// Overrides the localization tie-break implied by culture selection.
    pub tie_break: Option<TieBreak>,
}

/// Everything a link run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkResult {
    /// Present only when no error was reported.
    pub output: Option<Output>,
    pub diagnostics: Vec<Diagnostic>,
    /// Symbols exported by sections that were not linked.
    pub unreferenced_symbols: Vec<SymbolKey>,
}

impl LinkResult {
    pub fn succeeded(&self) -> bool {
        self.output.is_some()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn codes(&self) -> Vec<u32> {
        self.diagnostics.iter().map(Diagnostic::code).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Linker {
    options: LinkOptions,
    extensions: Vec<Arc<dyn ExtensionData>>,
}

impl Linker {
    pub fn new(options: LinkOptions) -> Self {
        Self {
            options,
            extensions: Vec::new(),
        }
    }

    pub fn with_extension(mut self, extension: Arc<dyn ExtensionData>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn with_extensions<I>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ExtensionData>>,
    {
        self.extensions.extend(extensions);
        self
    }

    pub fn options(&self) -> &LinkOptions {
        &self.options
    }

    /// Links `sections` (in load order) with the localization collected in `localizer`.
    pub fn link(&self, sections: &[Arc<Section>], mut localizer: Localizer) -> LinkResult {
        let mut diagnostics = Diagnostics::new();
        let pedantic = self.options.pedantic;

        let mut working: Vec<Arc<Section>> = sections.to_vec();
        for extension in &self.extensions {
            if let Some(library) = extension.library() {
                debug!(extension = extension.name(), sections = library.sections.len(), "adding extension library");
                working.extend(library.sections.iter().cloned());
                localizer.add_extension_localizations(extension.default_culture(), &library.localizations);
            }
        }
        if let Some(tie_break) = self.options.tie_break {
            localizer = localizer.with_tie_break(tie_break);
        }

        let symbols = SymbolTable::index(&working, pedantic, &mut diagnostics);

        let Some((entry, output_type)) = self.find_entry(&working, &mut diagnostics) else {
            return LinkResult {
                output: None,
                diagnostics: diagnostics.into_vec(),
                unreferenced_symbols: Vec::new(),
            };
        };
        debug!(entry = %working[entry].display_name(entry), %output_type, "found entry section");

        let resolver = EntityResolver::new(&working, &symbols);
        let reachable = reachable_sections(&working, &resolver, entry);
        let unreferenced_symbols = self.report_unreferenced(&working, &reachable, &mut diagnostics);
        debug!(
            reachable = reachable.len(),
            dropped = working.len() - reachable.len(),
            "computed reachable sections"
        );

        let unresolved = if self.options.allow_unresolved_references {
            Severity::Warning
        } else {
            Severity::Error
        };
        symbols.resolve_simple_references(&working, &reachable, unresolved, &mut diagnostics);
        let graph = ComplexGraph::build(
            &working,
            &reachable,
            &resolver,
            working[entry].root_entity(),
            unresolved,
            &mut diagnostics,
        );

        let merged = localizer.merge(pedantic, &mut diagnostics);
        debug!(
            variables = merged.variables.len(),
            controls = merged.controls.len(),
            "merged localization"
        );

        let entry_section = &working[entry];
        let mut output = Output::new(output_type, entry_section.id().unwrap_or_default());
        output.codepage = entry_section.codepage().or(merged.codepage);
        output.cultures = merged.cultures;

        for &index in &reachable {
            let section = &working[index];
            for (row_index, row) in section.rows().iter().enumerate() {
                if symbols.is_overridden(index, row_index) {
                    continue;
                }
                for id in unknown_localization_variables(row, &merged.variables) {
                    diagnostics.report(
                        Message::UnresolvedLocalizationVariable {
                            id,
                            table: row.table_name().to_string(),
                        },
                        vec![section.row_location(row_index)],
                    );
                }
                output.push_row(finish_row(row));
            }
        }

        if matches!(output_type, OutputType::Product | OutputType::Module) {
            report_orphaned_components(&output, &graph, &working, &reachable, &mut diagnostics);
        }

        output.variables = merged.variables;
        output.controls = merged.controls;
        let (complex_references, owners) = graph.into_parts();
        output.complex_references = complex_references;
        output.owners = owners;

        let succeeded = !diagnostics.has_errors();
        info!(
            rows = output.row_count(),
            errors = diagnostics.error_count(),
            diagnostics = diagnostics.len(),
            succeeded,
            "link finished"
        );

        LinkResult {
            output: succeeded.then_some(output),
            diagnostics: diagnostics.into_vec(),
            unreferenced_symbols,
        }
    }

    /// The single section producing an output, and that output's type.
    fn find_entry(&self, sections: &[Arc<Section>], diagnostics: &mut Diagnostics) -> Option<(usize, OutputType)> {
        let mut entry: Option<(usize, OutputType)> = None;

        for (index, section) in sections.iter().enumerate() {
            let Some(output_type) = section.section_type().output_type() else {
                continue;
            };
            match entry {
                None => entry = Some((index, output_type)),
                Some((first, _)) => diagnostics.report(
                    Message::MultipleEntrySections {
                        first: sections[first].display_name(first),
                        second: section.display_name(index),
                    },
                    vec![section.location(), sections[first].location()],
                ),
            }
        }

        let expected = self.options.expected_type;
        match entry {
            None => diagnostics.report(Message::NoEntryPoint { expected }, Vec::new()),
            Some((index, actual)) => {
                if let Some(expected) = expected.filter(|expected| *expected != actual) {
                    diagnostics.report(
                        Message::OutputTypeMismatch { expected, actual },
                        vec![sections[index].location()],
                    );
                }
            }
        }
        entry
    }

    /// Warns (pedantic only) about dropped sections and lists the symbols they export.
    fn report_unreferenced(
        &self,
        sections: &[Arc<Section>],
        reachable: &[usize],
        diagnostics: &mut Diagnostics,
    ) -> Vec<SymbolKey> {
        let mut linked = vec![false; sections.len()];
        for &index in reachable {
            linked[index] = true;
        }

        let mut unreferenced = Vec::new();
        for (index, section) in sections.iter().enumerate() {
            if linked[index] {
                continue;
            }
            let from_extension = matches!(section.provenance(), Provenance::Extension(_));
            if self.options.pedantic && !from_extension {
                diagnostics.report(
                    Message::UnreferencedSection {
                        section: section.display_name(index),
                    },
                    vec![section.location()],
                );
            }
            unreferenced.extend(section.symbols().iter().map(|s| s.key.clone()));
        }
        unreferenced
    }
}

/// Ids referenced through `!(loc.Id)` in localized columns of `row` with no merged value.
fn unknown_localization_variables<V>(row: &Row, variables: &indexmap::IndexMap<String, V>) -> Vec<String> {
    let mut unknown: Vec<String> = Vec::new();
    for (column, value) in row.definition().columns.iter().zip(row.fields()) {
        if column.ty != ColumnType::Localized {
            continue;
        }
        let Some(text) = value.as_str() else {
            continue;
        };
        for id in localization_references(text) {
            if !variables.contains_key(id) && !unknown.iter().any(|u| u == id) {
                unknown.push(id.to_string());
            }
        }
    }
    unknown
}

/// The row as it goes into the output: generated component GUIDs are filled in.
fn finish_row(row: &Arc<Row>) -> Arc<Row> {
    if row.table_name() != "Component" {
        return Arc::clone(row);
    }
    let requested = row.field_by_name("ComponentId").and_then(|f| f.as_str()) == Some(GENERATE_GUID);
    let component = row.field_by_name("Component").and_then(|f| f.as_str());
    let directory = row.field_by_name("Directory_").and_then(|f| f.as_str());
    let (true, Some(component), Some(directory)) = (requested, component, directory) else {
        return Arc::clone(row);
    };

    match row.with_field("ComponentId", component_guid(directory, component).into()) {
        Ok(finished) => Arc::new(finished),
        Err(error) => {
            warn!(%error, component, "could not generate component guid");
            Arc::clone(row)
        }
    }
}

fn report_orphaned_components(
    output: &Output,
    graph: &ComplexGraph,
    sections: &[Arc<Section>],
    reachable: &[usize],
    diagnostics: &mut Diagnostics,
) {
    let Some(components) = output.table("Component") else {
        return;
    };
    for row in &components.rows {
        let Some(id) = row.field_by_name("Component").and_then(|f| f.as_str()) else {
            continue;
        };
        if graph.is_child(&EntityRef::new(EntityKind::Component, id)) {
            continue;
        }
        let location = row.source().cloned().unwrap_or_else(|| {
            reachable
                .iter()
                .map(|&index| &sections[index])
                .find(|section| section.rows().iter().any(|r| Arc::ptr_eq(r, row)))
                .map(|section| section.location())
                .unwrap_or_else(|| sections[reachable[0]].location())
        });
        diagnostics.report(
            Message::OrphanedComponent {
                component: id.to_string(),
            },
            vec![location],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::FieldValue;
    use crate::section::{ComplexReference, SectionBuilder, SectionType, SimpleReference};
    use crate::table::TableDefinitions;

    fn row(table: &str, fields: Vec<FieldValue>) -> Row {
        let defs = TableDefinitions::standard();
        Row::new(Arc::clone(defs.require(table).unwrap()), fields).unwrap()
    }

    fn component(id: &str, guid: &str) -> Row {
        row(
            "Component",
            vec![id.into(), guid.into(), "INSTALLDIR".into(), FieldValue::Integer(0), FieldValue::Null, FieldValue::Null],
        )
    }

    fn feature(id: &str) -> Row {
        row(
            "Feature",
            vec![
                id.into(),
                FieldValue::Null,
                FieldValue::Null,
                FieldValue::Null,
                FieldValue::Null,
                FieldValue::Integer(1),
                FieldValue::Null,
                FieldValue::Integer(0),
            ],
        )
    }

    fn product(rows: Vec<Row>, references: Vec<ComplexReference>) -> Arc<Section> {
        let mut builder = SectionBuilder::new(SectionType::Product, Some("P"));
        for r in rows {
            builder.push_row(r);
        }
        for r in references {
            builder.push_complex_reference(r);
        }
        Arc::new(builder.build().unwrap())
    }

    fn owns(feature: &str, component: &str) -> ComplexReference {
        ComplexReference::new(
            EntityRef::new(EntityKind::Feature, feature),
            EntityRef::new(EntityKind::Component, component),
            true,
        )
    }

    #[test]
    fn generates_component_guids() {
        let sections = vec![product(
            vec![feature("Main"), component("Exe", "*")],
            vec![owns("Main", "Exe")],
        )];
        let result = Linker::default().link(&sections, Localizer::default());
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);

        let output = result.output.unwrap();
        let guid = output.table("Component").unwrap().rows[0]
            .field_by_name("ComponentId")
            .and_then(FieldValue::as_str)
            .unwrap()
            .to_string();
        assert_eq!(guid, component_guid("INSTALLDIR", "Exe"));
    }

    #[test]
    fn orphaned_components_fail_products() {
        let sections = vec![product(vec![feature("Main"), component("Loose", "{00000000-0000-0000-0000-000000000001}")], vec![])];
        let result = Linker::default().link(&sections, Localizer::default());
        assert!(!result.succeeded());
        assert_eq!(result.codes(), vec![95]);
    }

    #[test]
    fn multiple_entry_sections_are_rejected() {
        let second = Arc::new(SectionBuilder::new(SectionType::Module, Some("M")).build().unwrap());
        let sections = vec![product(vec![], vec![]), second];
        let result = Linker::default().link(&sections, Localizer::default());
        assert_eq!(result.codes(), vec![89]);
        assert!(!result.succeeded());
    }

    #[test]
    fn unresolved_references_can_be_downgraded() {
        let root = SectionBuilder::new(SectionType::Product, Some("P"))
            .simple_reference(SimpleReference::new("Property", "Missing"))
            .build()
            .unwrap();
        let sections = vec![Arc::new(root)];

        let strict = Linker::default().link(&sections, Localizer::default());
        assert_eq!(strict.codes(), vec![94]);
        assert!(!strict.succeeded());

        let lenient = Linker::new(LinkOptions {
            allow_unresolved_references: true,
            ..LinkOptions::default()
        })
        .link(&sections, Localizer::default());
        assert_eq!(lenient.codes(), vec![94]);
        assert!(lenient.succeeded());
    }

    #[test]
    fn unknown_loc_variables_are_errors() {
        let property = row("Property", vec!["Title".into(), "!(loc.ProductName)".into()]);
        let sections = vec![product(vec![property], vec![])];
        let result = Linker::default().link(&sections, Localizer::default());
        assert_eq!(result.codes(), vec![102]);
    }
}
