//! Symbol table management.
//!
//! Maps every `(table, primary key)` exported by a section to the row defining it and
//! resolves simple references against that map.

use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::diagnostic::{Diagnostics, Message, Severity};
use crate::row::Row;
use crate::section::{Section, SymbolKey};

/// A symbol defined by one row of one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedSymbol {
    /// Index of the section in the link's working set.
    pub section: usize,
    /// Row index within that section.
    pub row: usize,
    /// Whether a non-overridable definition may replace this one.
    pub overridable: bool,
}

impl DefinedSymbol {
    pub fn row<'s>(&self, sections: &'s [Arc<Section>]) -> Option<&'s Arc<Row>> {
        sections.get(self.section)?.rows().get(self.row)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: IndexMap<SymbolKey, DefinedSymbol>,
    /// `(section, row)` pairs whose definition lost to another one.
    overridden: HashSet<(usize, usize)>,
}

impl SymbolTable {
    /// Indexes the symbols of every section in load order.
    ///
    /// A fixed definition replaces an overridable one regardless of order. Two fixed
    /// definitions are a `DuplicateSymbol`; two overridable ones keep the first loaded.
    pub fn index(sections: &[Arc<Section>], pedantic: bool, diagnostics: &mut Diagnostics) -> Self {
        let mut table = Self::default();

        for (section_index, section) in sections.iter().enumerate() {
            for exported in section.symbols() {
                let candidate = DefinedSymbol {
                    section: section_index,
                    row: exported.row,
                    overridable: exported.overridable,
                };

                let Some(existing) = table.symbols.get(&exported.key) else {
                    tracing::trace!(symbol = %exported.key, section = section_index, "defined");
                    table.symbols.insert(exported.key.clone(), candidate);
                    continue;
                };

                let existing_location = sections[existing.section].row_location(existing.row);
                let candidate_location = section.row_location(exported.row);

                match (existing.overridable, candidate.overridable) {
                    (true, false) => {
                        tracing::trace!(symbol = %exported.key, section = section_index, "overrides");
                        table.overridden.insert((existing.section, existing.row));
                        table.symbols.insert(exported.key.clone(), candidate);
                    }
                    (false, true) => {
                        table.overridden.insert((candidate.section, candidate.row));
                    }
                    (true, true) => {
                        if pedantic {
                            diagnostics.report(
                                Message::OverridableSymbolTie {
                                    symbol: exported.key.clone(),
                                },
                                vec![candidate_location, existing_location],
                            );
                        }
                        table.overridden.insert((candidate.section, candidate.row));
                    }
                    (false, false) => {
                        diagnostics.report(
                            Message::DuplicateSymbol {
                                symbol: exported.key.clone(),
                            },
                            vec![candidate_location, existing_location],
                        );
                        table.overridden.insert((candidate.section, candidate.row));
                    }
                }
            }
        }

        tracing::debug!(symbols = table.symbols.len(), "indexed symbols");
        table
    }

    pub fn get(&self, key: &SymbolKey) -> Option<&DefinedSymbol> {
        self.symbols.get(key)
    }

    pub fn contains(&self, key: &SymbolKey) -> bool {
        self.symbols.contains_key(key)
    }

    /// Whether the row lost its symbol to another definition and must not be linked.
    pub fn is_overridden(&self, section: usize, row: usize) -> bool {
        self.overridden.contains(&(section, row))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SymbolKey, &DefinedSymbol)> {
        self.symbols.iter()
    }

    /// Checks the simple references of the `reachable` sections. A missing target is
    /// reported at `severity` once per referencing section and symbol.
    pub fn resolve_simple_references(
        &self,
        sections: &[Arc<Section>],
        reachable: &[usize],
        severity: Severity,
        diagnostics: &mut Diagnostics,
    ) {
        for &index in reachable {
            let section = &sections[index];
            let mut reported = HashSet::new();
            for reference in section.simple_references() {
                if self.contains(&reference.symbol) || !reported.insert(&reference.symbol) {
                    continue;
                }
                let location = reference.source.clone().unwrap_or_else(|| section.location());
                diagnostics.report_with(
                    severity,
                    Message::UnresolvedReference {
                        symbol: reference.symbol.to_string(),
                        section: section.display_name(index),
                    },
                    vec![location],
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::{SectionBuilder, SimpleReference};
    use crate::table::TableDefinitions;

    fn property(id: &str, value: &str, overridable: bool) -> Row {
        let defs = TableDefinitions::standard();
        Row::new(Arc::clone(defs.require("Property").unwrap()), vec![id.into(), value.into()])
            .unwrap()
            .with_overridable(overridable)
    }

    fn fragment(rows: Vec<Row>) -> Arc<Section> {
        let mut builder = SectionBuilder::fragment();
        for row in rows {
            builder.push_row(row);
        }
        Arc::new(builder.build().unwrap())
    }

    #[test]
    fn fixed_definition_wins_over_overridable() {
        let sections = vec![
            fragment(vec![property("Mode", "default", true)]),
            fragment(vec![property("Mode", "custom", false)]),
        ];
        let mut diagnostics = Diagnostics::new();
        let table = SymbolTable::index(&sections, true, &mut diagnostics);

        let symbol = table.get(&SymbolKey::single("Property", "Mode")).unwrap();
        assert_eq!(symbol.section, 1);
        assert_eq!(symbol.row(&sections).unwrap().field(1).unwrap().as_str(), Some("custom"));
        assert!(table.is_overridden(0, 0));
        assert!(!table.is_overridden(1, 0));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn duplicate_fixed_definitions_are_reported_once() {
        let sections = vec![
            fragment(vec![property("A", "1", false)]),
            fragment(vec![property("A", "2", false)]),
        ];
        let mut diagnostics = Diagnostics::new();
        SymbolTable::index(&sections, false, &mut diagnostics);

        assert_eq!(diagnostics.error_count(), 1);
        let diagnostic = diagnostics.iter().next().unwrap();
        assert_eq!(diagnostic.code(), 91);
        assert_eq!(diagnostic.locations.len(), 2);
    }

    #[test]
    fn overridable_tie_keeps_first_and_warns_when_pedantic() {
        let sections = vec![
            fragment(vec![property("A", "1", true)]),
            fragment(vec![property("A", "2", true)]),
        ];
        let mut quiet = Diagnostics::new();
        let table = SymbolTable::index(&sections, false, &mut quiet);
        assert_eq!(table.get(&SymbolKey::single("Property", "A")).unwrap().section, 0);
        assert!(quiet.is_empty());

        let mut pedantic = Diagnostics::new();
        SymbolTable::index(&sections, true, &mut pedantic);
        assert_eq!(pedantic.len(), 1);
        assert!(!pedantic.has_errors());
    }

    #[test]
    fn unresolved_simple_references_are_reported() {
        let referencing = SectionBuilder::fragment()
            .simple_reference(SimpleReference::new("Property", "Missing"))
            .simple_reference(SimpleReference::new("Property", "Missing"))
            .simple_reference(SimpleReference::new("Property", "A"))
            .build()
            .unwrap();
        let sections = vec![Arc::new(referencing), fragment(vec![property("A", "1", false)])];
        let mut diagnostics = Diagnostics::new();
        let table = SymbolTable::index(&sections, false, &mut diagnostics);

        table.resolve_simple_references(&sections, &[0], Severity::Error, &mut diagnostics);
        assert_eq!(diagnostics.error_count(), 1);
        assert_eq!(diagnostics.iter().next().unwrap().code(), 94);

        let mut lenient = Diagnostics::new();
        table.resolve_simple_references(&sections, &[0], Severity::Warning, &mut lenient);
        assert!(!lenient.has_errors());
        assert_eq!(lenient.len(), 1);
    }
}
