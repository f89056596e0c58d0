//! Complex reference graph.
//!
//! Complex references form the ownership tree of installable entities (features own
//! components, groups gather either). This module decides which sections take part in a
//! link, validates the edges declared by those sections, and finds cycles.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::diagnostic::{Diagnostics, Message, Severity};
use crate::section::{ComplexReference, EntityRef, Section};
use crate::symbol::SymbolTable;

/// Maps entities to the section defining them.
pub struct EntityResolver<'a> {
    symbols: &'a SymbolTable,
    roots: HashMap<EntityRef, usize>,
}

impl<'a> EntityResolver<'a> {
    pub fn new(sections: &[Arc<Section>], symbols: &'a SymbolTable) -> Self {
        let roots = sections
            .iter()
            .enumerate()
            .filter_map(|(index, section)| section.root_entity().map(|entity| (entity, index)))
            .collect();
        Self { symbols, roots }
    }

    /// Section defining `entity`, if any. Root entities are defined by their entry
    /// section, everything else by the row exporting the matching symbol.
    pub fn resolve(&self, entity: &EntityRef) -> Option<usize> {
        match entity.symbol() {
            Some(key) => self.symbols.get(&key).map(|s| s.section),
            None => self.roots.get(entity).copied(),
        }
    }
}

/// Sections reachable from `entry` through simple and complex references, and through
/// overridden symbols to the section defining the winner, in load order.
/// Unresolvable targets are skipped here and reported by the later phases.
pub fn reachable_sections(sections: &[Arc<Section>], resolver: &EntityResolver<'_>, entry: usize) -> Vec<usize> {
    let mut visited = vec![false; sections.len()];
    let mut queue = VecDeque::from([entry]);
    visited[entry] = true;

    while let Some(index) = queue.pop_front() {
        let section = &sections[index];
        let simple = section
            .simple_references()
            .iter()
            .filter_map(|r| resolver.symbols.get(&r.symbol).map(|s| s.section));
        let complex = section
            .complex_references()
            .iter()
            .flat_map(|r| [resolver.resolve(&r.parent), resolver.resolve(&r.child)])
            .flatten();
        // A row that lost its symbol pulls in the section holding the winning definition.
        let overrides = section
            .symbols()
            .iter()
            .filter_map(|s| resolver.symbols.get(&s.key).map(|d| d.section));

        for target in simple.chain(complex).chain(overrides).collect::<Vec<_>>() {
            if !visited[target] {
                tracing::trace!(from = index, to = target, "section reached");
                visited[target] = true;
                queue.push_back(target);
            }
        }
    }

    visited
        .iter()
        .enumerate()
        .filter_map(|(index, &reached)| reached.then_some(index))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    InProgress,
    Done,
}

/// The validated complex references of the reachable sections.
#[derive(Debug, Clone, Default)]
pub struct ComplexGraph {
    root: Option<EntityRef>,
    references: Vec<ComplexReference>,
    children: IndexMap<EntityRef, Vec<EntityRef>>,
    owners: IndexMap<EntityRef, EntityRef>,
}

impl ComplexGraph {
    /// Collects the complex references declared by `reachable` sections.
    ///
    /// Edges whose parent or child does not resolve are reported at `unresolved` severity
    /// and left out. A child declared primary more than once is reported, as is every
    /// cycle found walking from `root` and then from any entity not yet visited.
    pub fn build(
        sections: &[Arc<Section>],
        reachable: &[usize],
        resolver: &EntityResolver<'_>,
        root: Option<EntityRef>,
        unresolved: Severity,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let mut graph = ComplexGraph {
            root,
            ..Self::default()
        };
        let mut seen = HashSet::new();
        // Keyed by child and parent language: each language of a localized parent may
        // claim the child once.
        let mut primaries: IndexMap<(EntityRef, Option<String>), Vec<EntityRef>> = IndexMap::new();

        for &index in reachable {
            let section = &sections[index];
            for reference in section.complex_references() {
                let mut resolved = true;
                for entity in [&reference.parent, &reference.child] {
                    if resolver.resolve(entity).is_none() {
                        resolved = false;
                        let symbol = entity.symbol().map_or_else(|| entity.to_string(), |s| s.to_string());
                        diagnostics.report_with(
                            unresolved,
                            Message::UnresolvedReference {
                                symbol,
                                section: section.display_name(index),
                            },
                            vec![reference.source.clone().unwrap_or_else(|| section.location())],
                        );
                    }
                }
                if !resolved {
                    continue;
                }
                // Every primary declaration counts, even a repeat of the same edge.
                if reference.primary {
                    primaries
                        .entry((reference.child.clone(), reference.parent_language.clone()))
                        .or_default()
                        .push(reference.parent.clone());
                }
                let key = (
                    reference.parent.clone(),
                    reference.parent_language.clone(),
                    reference.child.clone(),
                    reference.primary,
                );
                if !seen.insert(key) {
                    continue;
                }
                let children = graph.children.entry(reference.parent.clone()).or_default();
                if !children.contains(&reference.child) {
                    children.push(reference.child.clone());
                }
                graph.references.push(reference.clone());
            }
        }

        for ((child, language), parents) in &primaries {
            if parents.len() > 1 {
                let location = graph
                    .references
                    .iter()
                    .find(|r| &r.child == child && &r.parent_language == language && r.primary)
                    .and_then(|r| r.source.clone());
                diagnostics.report(
                    Message::MultiplePrimaryReferences {
                        child: child.clone(),
                        parents: parents.clone(),
                    },
                    location.into_iter().collect(),
                );
            }
        }

        for path in graph.find_cycles() {
            diagnostics.report(Message::CircularReference { path }, Vec::new());
        }

        for reference in &graph.references {
            let primary = primaries
                .iter()
                .find(|((child, _), _)| child == &reference.child)
                .and_then(|(_, parents)| parents.first());
            let owner = primary.unwrap_or(&reference.parent);
            graph
                .owners
                .entry(reference.child.clone())
                .or_insert_with(|| owner.clone());
        }

        tracing::debug!(
            edges = graph.references.len(),
            owned = graph.owners.len(),
            "built complex reference graph"
        );
        graph
    }

    /// Every cycle as a path that starts and ends on the same entity.
    fn find_cycles(&self) -> Vec<Vec<EntityRef>> {
        let mut colors: HashMap<&EntityRef, Color> = HashMap::new();
        let mut cycles = Vec::new();

        for start in self.root.iter().chain(self.children.keys()) {
            if colors.contains_key(start) {
                continue;
            }
            colors.insert(start, Color::InProgress);
            let mut stack: Vec<(&EntityRef, usize)> = vec![(start, 0)];

            while let Some(&(node, next)) = stack.last() {
                let children = self.children.get(node).map(Vec::as_slice).unwrap_or(&[]);
                let Some(child) = children.get(next) else {
                    colors.insert(node, Color::Done);
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                match colors.get(child) {
                    None => {
                        colors.insert(child, Color::InProgress);
                        stack.push((child, 0));
                    }
                    Some(Color::InProgress) => {
                        let begin = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                        let mut path: Vec<EntityRef> = stack[begin..].iter().map(|(n, _)| (*n).clone()).collect();
                        path.push(child.clone());
                        cycles.push(path);
                    }
                    Some(Color::Done) => {}
                }
            }
        }
        cycles
    }

    pub fn references(&self) -> &[ComplexReference] {
        &self.references
    }

    pub fn children(&self, parent: &EntityRef) -> &[EntityRef] {
        self.children.get(parent).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Primary parent of `child`, else its first declared parent.
    pub fn owner(&self, child: &EntityRef) -> Option<&EntityRef> {
        self.owners.get(child)
    }

    pub fn is_child(&self, entity: &EntityRef) -> bool {
        self.owners.contains_key(entity)
    }

    pub fn into_parts(self) -> (Vec<ComplexReference>, IndexMap<EntityRef, EntityRef>) {
        (self.references, self.owners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;
    use crate::section::{EntityKind, SectionBuilder, SectionType, SimpleReference};
    use crate::table::TableDefinitions;
    use pretty_assertions::assert_eq;

    fn keyed(table: &str, id: &str) -> Row {
        let defs = TableDefinitions::standard();
        Row::new(Arc::clone(defs.require(table).unwrap()), vec![id.into()]).unwrap()
    }

    fn feature_group(id: &str) -> EntityRef {
        EntityRef::new(EntityKind::FeatureGroup, id)
    }

    fn component_group(id: &str) -> EntityRef {
        EntityRef::new(EntityKind::ComponentGroup, id)
    }

    fn groups(ids: &[&str]) -> Arc<Section> {
        let mut builder = SectionBuilder::fragment();
        for id in ids {
            builder.push_row(keyed("WixFeatureGroup", id));
        }
        Arc::new(builder.build().unwrap())
    }

    fn link_graph(sections: &[Arc<Section>], diagnostics: &mut Diagnostics) -> ComplexGraph {
        let symbols = SymbolTable::index(sections, false, diagnostics);
        let resolver = EntityResolver::new(sections, &symbols);
        let reachable: Vec<_> = (0..sections.len()).collect();
        ComplexGraph::build(sections, &reachable, &resolver, None, Severity::Error, diagnostics)
    }

    #[test]
    fn reaches_sections_through_both_reference_kinds() {
        let product = SectionBuilder::new(SectionType::Product, Some("P"))
            .complex_reference(ComplexReference::new(
                EntityRef::new(EntityKind::Product, "P"),
                feature_group("Core"),
                false,
            ))
            .build()
            .unwrap();
        let core = SectionBuilder::fragment()
            .row(keyed("WixFeatureGroup", "Core"))
            .simple_reference(SimpleReference::new("WixComponentGroup", "Files"))
            .build()
            .unwrap();
        let files = SectionBuilder::fragment().row(keyed("WixComponentGroup", "Files")).build().unwrap();
        let unused = groups(&["Unused"]);
        let sections = vec![Arc::new(product), unused, Arc::new(files), Arc::new(core)];

        let symbols = SymbolTable::index(&sections, false, &mut Diagnostics::new());
        let resolver = EntityResolver::new(&sections, &symbols);
        assert_eq!(reachable_sections(&sections, &resolver, 0), vec![0, 2, 3]);
    }

    #[test]
    fn overridden_rows_reach_the_winning_section() {
        let product = SectionBuilder::new(SectionType::Product, Some("P"))
            .row(keyed("WixFeatureGroup", "Core").with_overridable(true))
            .build()
            .unwrap();
        let winner = groups(&["Core"]);
        let sections = vec![Arc::new(product), groups(&["Unused"]), winner];

        let symbols = SymbolTable::index(&sections, false, &mut Diagnostics::new());
        let resolver = EntityResolver::new(&sections, &symbols);
        assert_eq!(reachable_sections(&sections, &resolver, 0), vec![0, 2]);
    }

    #[test]
    fn reports_cycle_path() {
        let edges = SectionBuilder::fragment()
            .row(keyed("WixFeatureGroup", "A"))
            .row(keyed("WixFeatureGroup", "B"))
            .complex_reference(ComplexReference::new(feature_group("A"), feature_group("B"), false))
            .complex_reference(ComplexReference::new(feature_group("B"), feature_group("A"), false))
            .build()
            .unwrap();
        let mut diagnostics = Diagnostics::new();
        link_graph(&[Arc::new(edges)], &mut diagnostics);

        let messages: Vec<_> = diagnostics.iter().map(|d| d.message.clone()).collect();
        assert_eq!(
            messages,
            vec![Message::CircularReference {
                path: vec![feature_group("A"), feature_group("B"), feature_group("A")]
            }]
        );
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let edges = SectionBuilder::fragment()
            .row(keyed("WixFeatureGroup", "A"))
            .complex_reference(ComplexReference::new(feature_group("A"), feature_group("A"), false))
            .build()
            .unwrap();
        let mut diagnostics = Diagnostics::new();
        link_graph(&[Arc::new(edges)], &mut diagnostics);
        assert_eq!(diagnostics.error_count(), 1);
        assert_eq!(diagnostics.iter().next().unwrap().code(), 86);
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let edges = SectionBuilder::fragment()
            .row(keyed("WixFeatureGroup", "Top"))
            .row(keyed("WixFeatureGroup", "Left"))
            .row(keyed("WixFeatureGroup", "Right"))
            .row(keyed("WixComponentGroup", "Shared"))
            .complex_reference(ComplexReference::new(feature_group("Top"), feature_group("Left"), false))
            .complex_reference(ComplexReference::new(feature_group("Top"), feature_group("Right"), false))
            .complex_reference(ComplexReference::new(feature_group("Left"), component_group("Shared"), true))
            .complex_reference(ComplexReference::new(feature_group("Right"), component_group("Shared"), false))
            .build()
            .unwrap();
        let mut diagnostics = Diagnostics::new();
        let graph = link_graph(&[Arc::new(edges)], &mut diagnostics);

        assert!(diagnostics.is_empty());
        assert_eq!(graph.owner(&component_group("Shared")), Some(&feature_group("Left")));
        assert_eq!(graph.children(&feature_group("Top")).len(), 2);
    }

    #[test]
    fn repeated_primary_declarations_are_rejected() {
        let first = SectionBuilder::fragment()
            .row(keyed("WixFeatureGroup", "Main"))
            .row(keyed("WixComponentGroup", "Shared"))
            .complex_reference(ComplexReference::new(feature_group("Main"), component_group("Shared"), true))
            .build()
            .unwrap();
        let second = SectionBuilder::fragment()
            .complex_reference(ComplexReference::new(feature_group("Main"), component_group("Shared"), true))
            .build()
            .unwrap();
        let mut diagnostics = Diagnostics::new();
        let graph = link_graph(&[Arc::new(first), Arc::new(second)], &mut diagnostics);

        let messages: Vec<_> = diagnostics.iter().map(|d| d.message.clone()).collect();
        assert_eq!(
            messages,
            vec![Message::MultiplePrimaryReferences {
                child: component_group("Shared"),
                parents: vec![feature_group("Main"), feature_group("Main")],
            }]
        );
        assert_eq!(graph.references().len(), 1);
    }

    #[test]
    fn localized_parents_keep_one_edge_per_language() {
        let shared = || component_group("Shared");
        let edges = SectionBuilder::fragment()
            .row(keyed("WixFeatureGroup", "Main"))
            .row(keyed("WixComponentGroup", "Shared"))
            .complex_reference(ComplexReference::new(feature_group("Main"), shared(), true).with_parent_language("1033"))
            .complex_reference(ComplexReference::new(feature_group("Main"), shared(), true).with_parent_language("1031"))
            .complex_reference(ComplexReference::new(feature_group("Main"), shared(), true).with_parent_language("1031"))
            .build()
            .unwrap();
        let mut diagnostics = Diagnostics::new();
        let graph = link_graph(&[Arc::new(edges)], &mut diagnostics);

        let languages: Vec<_> = graph.references().iter().map(|r| r.parent_language.as_deref()).collect();
        assert_eq!(languages, vec![Some("1033"), Some("1031")]);
        assert_eq!(graph.children(&feature_group("Main")), &[shared()]);
        assert_eq!(graph.owner(&shared()), Some(&feature_group("Main")));
        let codes: Vec<_> = diagnostics.iter().map(|d| d.code()).collect();
        assert_eq!(codes, vec![90]);
    }

    #[test]
    fn primary_and_secondary_parents_are_fine() {
        let edges = SectionBuilder::fragment()
            .row(keyed("WixFeatureGroup", "One"))
            .row(keyed("WixFeatureGroup", "Two"))
            .row(keyed("WixComponentGroup", "Shared"))
            .complex_reference(ComplexReference::new(feature_group("One"), component_group("Shared"), false))
            .complex_reference(ComplexReference::new(feature_group("Two"), component_group("Shared"), true))
            .build()
            .unwrap();
        let mut diagnostics = Diagnostics::new();
        let graph = link_graph(&[Arc::new(edges)], &mut diagnostics);

        assert!(diagnostics.is_empty());
        assert_eq!(graph.owner(&component_group("Shared")), Some(&feature_group("Two")));
    }

    #[test]
    fn unresolved_edges_are_reported_and_dropped() {
        let edges = SectionBuilder::fragment()
            .row(keyed("WixFeatureGroup", "A"))
            .complex_reference(ComplexReference::new(feature_group("A"), component_group("Ghost"), false))
            .build()
            .unwrap();
        let mut diagnostics = Diagnostics::new();
        let graph = link_graph(&[Arc::new(edges)], &mut diagnostics);

        assert_eq!(diagnostics.error_count(), 1);
        assert_eq!(diagnostics.iter().next().unwrap().code(), 94);
        assert!(graph.references().is_empty());
    }
}
