//! Localization selection and merge.
//!
//! Lifecycle: sets are parsed (`LocalizationSet`), handed to a `Localizer`, selected
//! according to the requested cultures, then merged once into the linked output.
//! Merging consumes the localizer.

use indexmap::IndexMap;
use std::borrow::Cow;
use std::sync::Arc;

use crate::diagnostic::{Diagnostics, Message, SourceLineNumber};
use crate::intermediate::Library;
use crate::localization::{ControlKey, LocalizationSet, LocalizedControl, LocalizedString};
use crate::utils::culture_matches;

/// Culture token selecting culture-less sets in an explicit culture list.
pub const NEUTRAL_CULTURE: &str = "neutral";

/// Which definition wins when two overridable definitions of one id compete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    FirstLoaded,
    LastLoaded,
}

impl TieBreak {
    fn describe(self) -> &'static str {
        match self {
            TieBreak::FirstLoaded => "first loaded",
            TieBreak::LastLoaded => "last loaded",
        }
    }
}

/// Sets chosen for a link, in merge order, with the tie-break their selection implies.
#[derive(Debug, Clone)]
pub struct Selection {
    pub sets: Vec<Arc<LocalizationSet>>,
    pub tie_break: TieBreak,
}

/// Picks the sets to merge.
///
/// With a culture list, every set matching each culture in turn (case-insensitive;
/// `neutral` matches culture-less sets). Without one, the neutral sets if there are any,
/// otherwise every set, in which case later sets win overridable ties.
pub fn select_active_sets(requested: Option<&[String]>, available: &[Arc<LocalizationSet>]) -> Selection {
    match requested {
        Some(cultures) => {
            let mut sets: Vec<Arc<LocalizationSet>> = Vec::new();
            for culture in cultures {
                for set in available {
                    let matches = match set.culture() {
                        Some(c) => culture_matches(c, culture),
                        None => culture_matches(NEUTRAL_CULTURE, culture),
                    };
                    if matches && !sets.iter().any(|s| Arc::ptr_eq(s, set)) {
                        sets.push(Arc::clone(set));
                    }
                }
            }
            Selection {
                sets,
                tie_break: TieBreak::FirstLoaded,
            }
        }
        None => {
            let neutral: Vec<_> = available.iter().filter(|s| s.is_neutral()).cloned().collect();
            if neutral.is_empty() {
                Selection {
                    sets: available.to_vec(),
                    tie_break: TieBreak::LastLoaded,
                }
            } else {
                Selection {
                    sets: neutral,
                    tie_break: TieBreak::FirstLoaded,
                }
            }
        }
    }
}

fn locations(a: Option<&SourceLineNumber>, b: Option<&SourceLineNumber>) -> Vec<SourceLineNumber> {
    a.into_iter().chain(b).cloned().collect()
}

fn merge_string(
    merged: &mut IndexMap<String, LocalizedString>,
    string: &LocalizedString,
    tie_break: TieBreak,
    pedantic: bool,
    diagnostics: &mut Diagnostics,
) {
    let replace = match merged.get(&string.id) {
        None => true,
        Some(existing) => match (existing.overridable, string.overridable) {
            (true, false) => true,
            (true, true) => {
                if pedantic {
                    diagnostics.report(
                        Message::OverridableLocalizationTie {
                            id: string.id.clone(),
                            winner: tie_break.describe(),
                        },
                        locations(string.source.as_ref(), existing.source.as_ref()),
                    );
                }
                tie_break == TieBreak::LastLoaded
            }
            (false, true) => false,
            (false, false) => {
                diagnostics.report(
                    Message::DuplicateLocalizationIdentifier { id: string.id.clone() },
                    locations(string.source.as_ref(), existing.source.as_ref()),
                );
                false
            }
        },
    };

    if replace {
        merged.insert(string.id.clone(), string.clone());
    }
}

/// Merges string variables across sets in order. The first definition of an id stands
/// unless it was overridable; two fixed definitions are reported as duplicates.
pub fn merge_variables(
    sets: &[Arc<LocalizationSet>],
    tie_break: TieBreak,
    pedantic: bool,
    diagnostics: &mut Diagnostics,
) -> IndexMap<String, LocalizedString> {
    let mut merged = IndexMap::new();
    for set in sets {
        for string in set.strings() {
            merge_string(&mut merged, string, tie_break, pedantic, diagnostics);
        }
    }
    merged
}

/// Merges localized controls. Controls have no override concept: any repeated
/// dialog/control key is an error.
pub fn merge_controls(
    sets: &[Arc<LocalizationSet>],
    diagnostics: &mut Diagnostics,
) -> IndexMap<ControlKey, LocalizedControl> {
    let mut merged: IndexMap<ControlKey, LocalizedControl> = IndexMap::new();
    for set in sets {
        for (key, control) in set.controls() {
            if let Some(existing) = merged.get(key) {
                diagnostics.report(
                    Message::DuplicatedUiLocalization { key: key.clone() },
                    locations(control.source.as_ref(), existing.source.as_ref()),
                );
                continue;
            }
            merged.insert(key.clone(), control.clone());
        }
    }
    merged
}

/// Result of merging a localizer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedLocalization {
    pub cultures: Vec<String>,
    pub codepage: Option<u32>,
    pub variables: IndexMap<String, LocalizedString>,
    pub controls: IndexMap<ControlKey, LocalizedControl>,
}

/// Collects localization sets for one link run.
#[derive(Debug, Clone, Default)]
pub struct Localizer {
    cultures: Option<Vec<String>>,
    available: Vec<Arc<LocalizationSet>>,
    extension_sets: Vec<Arc<LocalizationSet>>,
    tie_break: Option<TieBreak>,
}

impl Localizer {
    /// An empty culture list is the same as none.
    pub fn new(cultures: Option<Vec<String>>) -> Self {
        Self {
            cultures: cultures.filter(|c| !c.is_empty()),
            ..Self::default()
        }
    }

    /// Overrides the tie-break implied by the selection mode.
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = Some(tie_break);
        self
    }

    pub fn cultures(&self) -> Option<&[String]> {
        self.cultures.as_deref()
    }

    pub fn add_localization(&mut self, set: Arc<LocalizationSet>) {
        self.available.push(set);
    }

    pub fn add_library(&mut self, library: &Library) {
        self.available.extend(library.localizations.iter().cloned());
    }

    /// Adds an extension's localization. Sets matching the requested cultures are used;
    /// with no culture list, only the extension's default culture is. Extension strings
    /// merge last and never override explicitly loaded ones.
    pub fn add_extension_localizations(&mut self, default_culture: Option<&str>, sets: &[Arc<LocalizationSet>]) {
        let cultures = match (&self.cultures, default_culture) {
            (Some(cultures), _) => cultures.clone(),
            (None, Some(default)) => vec![default.to_string()],
            (None, None) => return,
        };
        let selection = select_active_sets(Some(&cultures), sets);
        self.extension_sets.extend(selection.sets);
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty() && self.extension_sets.is_empty()
    }

    /// Selects and merges everything collected so far.
    pub fn merge(self, pedantic: bool, diagnostics: &mut Diagnostics) -> MergedLocalization {
        let selection = select_active_sets(self.cultures.as_deref(), &self.available);
        let tie_break = self.tie_break.unwrap_or(selection.tie_break);
        tracing::debug!(
            selected = selection.sets.len(),
            extension = self.extension_sets.len(),
            ?tie_break,
            "merging localization"
        );

        let mut variables = merge_variables(&selection.sets, tie_break, pedantic, diagnostics);
        let mut controls = merge_controls(&selection.sets, diagnostics);

        let extension_tie = self.tie_break.unwrap_or(TieBreak::FirstLoaded);
        for (id, string) in merge_variables(&self.extension_sets, extension_tie, pedantic, diagnostics) {
            variables.entry(id).or_insert(string);
        }
        for (key, control) in merge_controls(&self.extension_sets, diagnostics) {
            controls.entry(key).or_insert(control);
        }

        let all_sets = || selection.sets.iter().chain(&self.extension_sets);
        let cultures = match self.cultures {
            Some(cultures) => cultures,
            None => {
                let mut cultures: Vec<String> = Vec::new();
                for culture in all_sets().filter_map(|s| s.culture()) {
                    if !cultures.iter().any(|c| c == culture) {
                        cultures.push(culture.to_string());
                    }
                }
                cultures
            }
        };
        let codepage = all_sets().find_map(|s| s.codepage());

        MergedLocalization {
            cultures,
            codepage,
            variables,
            controls,
        }
    }
}

const LOC_PREFIX: &str = "!(loc.";

/// Ids of every `!(loc.Id)` reference in `text`, in order.
pub fn localization_references(text: &str) -> Vec<&str> {
    let mut ids = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(LOC_PREFIX) {
        let after = &rest[start + LOC_PREFIX.len()..];
        match after.find(')') {
            Some(end) => {
                ids.push(&after[..end]);
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    ids
}

/// Substitutes every `!(loc.Id)` reference. Fails with the first unknown id.
pub fn expand_localization_variables<'a>(
    text: &'a str,
    variables: &IndexMap<String, LocalizedString>,
) -> Result<Cow<'a, str>, String> {
    if !text.contains(LOC_PREFIX) {
        return Ok(Cow::Borrowed(text));
    }
    // Values are copied as is, never rescanned for references of their own.
    let mut expanded = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(LOC_PREFIX) {
        let after = &rest[start + LOC_PREFIX.len()..];
        let Some(end) = after.find(')') else {
            break;
        };
        let id = &after[..end];
        let value = variables.get(id).ok_or_else(|| id.to_string())?;
        expanded.push_str(&rest[..start]);
        expanded.push_str(&value.value);
        rest = &after[end + 1..];
    }
    expanded.push_str(rest);
    Ok(Cow::Owned(expanded))
}
