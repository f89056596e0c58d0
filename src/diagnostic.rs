//! Structured diagnostics.
//!
//! Every link run owns a `Diagnostics` accumulator. Phases push into it and keep going,
//! so one run reports every independent problem. Display policy (suppression, warnings as
//! errors, verbosity) is applied afterwards by a `MessageFilter` owned by the driver.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::localization::ControlKey;
use crate::output::OutputType;
use crate::section::{EntityRef, SymbolKey};

/// Prefix used when rendering message codes, e.g. `ILD0091`.
pub const MESSAGE_PREFIX: &str = "ILD";

/// A position in a source document, with an optional "included from" parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLineNumber {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<SourceLineNumber>>,
}

impl SourceLineNumber {
    pub fn new(file: &str, line: Option<u32>) -> Self {
        Self {
            file: file.to_string(),
            line,
            parent: None,
        }
    }

    pub fn file(file: &str) -> Self {
        Self::new(file, None)
    }

    pub fn included_from(mut self, parent: SourceLineNumber) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// This location followed by every enclosing one.
    pub fn chain(&self) -> impl Iterator<Item = &SourceLineNumber> {
        std::iter::successors(Some(self), |s| s.parent.as_deref())
    }
}

impl fmt::Display for SourceLineNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}({})", self.file, line),
            None => f.write_str(&self.file),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

fn cycle_path(path: &[EntityRef]) -> String {
    path.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
}

fn entity_list(entities: &[EntityRef]) -> String {
    entities.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn expected_suffix(expected: &Option<OutputType>) -> String {
    expected.map(|t| format!(" Expected a section of type '{t}'.")).unwrap_or_default()
}

/// Everything the linker can report. `Display` is the user-facing text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Message {
    #[error("A circular reference was detected: {}.", cycle_path(.path))]
    CircularReference { path: Vec<EntityRef> },

    #[error("Multiple entry sections '{first}' and '{second}' were found. Only one product, module, patch or bundle may be linked at a time.")]
    MultipleEntrySections { first: String, second: String },

    #[error("{child} has multiple primary references: {}. Only one parent may be marked primary.", entity_list(.parents))]
    MultiplePrimaryReferences {
        child: EntityRef,
        parents: Vec<EntityRef>,
    },

    #[error("Duplicate symbol '{symbol}' found. Identifiers of a given type must be unique across all linked sections.")]
    DuplicateSymbol { symbol: SymbolKey },

    #[error("The output type '{actual}' implied by the entry section does not match the expected output type '{expected}'.")]
    OutputTypeMismatch {
        expected: OutputType,
        actual: OutputType,
    },

    #[error("Could not find an entry section in the provided sections.{}", expected_suffix(.expected))]
    NoEntryPoint { expected: Option<OutputType> },

    #[error("Unresolved reference to {symbol} in section '{section}'.")]
    UnresolvedReference { symbol: String, section: String },

    #[error("Found orphaned Component '{component}'. Every component must be referenced by a feature, group or module.")]
    OrphanedComponent { component: String },

    #[error("The localization variable '{id}' is defined more than once and is not overridable.")]
    DuplicateLocalizationIdentifier { id: String },

    #[error("The localized control {key} is defined more than once.")]
    DuplicatedUiLocalization { key: ControlKey },

    #[error("The localization variable !(loc.{id}) used in table '{table}' is unknown.")]
    UnresolvedLocalizationVariable { id: String, table: String },

    #[error("Section '{section}' is not referenced from the entry section and was dropped.")]
    UnreferencedSection { section: String },

    #[error("Symbol '{symbol}' has more than one overridable definition; the first loaded definition is used.")]
    OverridableSymbolTie { symbol: SymbolKey },

    #[error("Localization variable '{id}' has more than one overridable definition; the {winner} definition is used.")]
    OverridableLocalizationTie { id: String, winner: &'static str },
}

impl Message {
    /// Stable numeric code.
    pub fn code(&self) -> u32 {
        match self {
            Message::CircularReference { .. } => 86,
            Message::MultipleEntrySections { .. } => 89,
            Message::MultiplePrimaryReferences { .. } => 90,
            Message::DuplicateSymbol { .. } => 91,
            Message::OutputTypeMismatch { .. } => 92,
            Message::NoEntryPoint { .. } => 93,
            Message::UnresolvedReference { .. } => 94,
            Message::OrphanedComponent { .. } => 95,
            Message::DuplicateLocalizationIdentifier { .. } => 100,
            Message::DuplicatedUiLocalization { .. } => 101,
            Message::UnresolvedLocalizationVariable { .. } => 102,
            Message::UnreferencedSection { .. } => 1079,
            Message::OverridableSymbolTie { .. } => 1080,
            Message::OverridableLocalizationTie { .. } => 1081,
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            Message::UnreferencedSection { .. }
            | Message::OverridableSymbolTie { .. }
            | Message::OverridableLocalizationTie { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// One reported problem or notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: Message,
    /// Primary location first, then related locations.
    pub locations: Vec<SourceLineNumber>,
}

impl Diagnostic {
    pub fn new(message: Message, locations: Vec<SourceLineNumber>) -> Self {
        Self {
            severity: message.default_severity(),
            message,
            locations,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn code(&self) -> u32 {
        self.message.code()
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.severity == Severity::Info {
            return write!(f, "{}", self.message);
        }

        let origin = self
            .locations
            .first()
            .map(ToString::to_string)
            .unwrap_or_else(|| "ild".to_string());
        write!(
            f,
            "{origin} : {} {MESSAGE_PREFIX}{:04} : {}",
            self.severity,
            self.code(),
            self.message
        )?;

        if let Some(primary) = self.locations.first() {
            if primary.parent.is_some() {
                write!(f, "\nSource trace:")?;
                for location in primary.chain() {
                    write!(f, "\n\tat {location}")?;
                }
            }
        }
        for related in self.locations.iter().skip(1) {
            write!(f, "\n\trelated: {related}")?;
        }
        Ok(())
    }
}

/// Accumulator owned by a single link run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::trace!(code = diagnostic.code(), severity = %diagnostic.severity, "{}", diagnostic.message);
        self.items.push(diagnostic);
    }

    /// Reports a message at its default severity.
    pub fn report(&mut self, message: Message, locations: Vec<SourceLineNumber>) {
        self.push(Diagnostic::new(message, locations));
    }

    pub fn report_with(&mut self, severity: Severity, message: Message, locations: Vec<SourceLineNumber>) {
        self.push(Diagnostic::new(message, locations).with_severity(severity));
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.is_error()).count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

/// Driver-side display policy, applied to a finished diagnostic stream.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub show_verbose: bool,
    pub suppress_all_warnings: bool,
    pub suppressed_warnings: HashSet<u32>,
    pub warnings_as_errors: bool,
    pub elevated_warnings: HashSet<u32>,
}

impl MessageFilter {
    /// Drops or re-tags a diagnostic. Errors are never suppressed.
    pub fn apply(&self, diagnostic: Diagnostic) -> Option<Diagnostic> {
        match diagnostic.severity {
            Severity::Error => Some(diagnostic),
            Severity::Info => self.show_verbose.then_some(diagnostic),
            Severity::Warning => {
                let code = diagnostic.code();
                if self.suppress_all_warnings || self.suppressed_warnings.contains(&code) {
                    None
                } else if self.warnings_as_errors || self.elevated_warnings.contains(&code) {
                    Some(diagnostic.with_severity(Severity::Error))
                } else {
                    Some(diagnostic)
                }
            }
        }
    }

    pub fn apply_all<I>(&self, diagnostics: I) -> Vec<Diagnostic>
    where
        I: IntoIterator<Item = Diagnostic>,
    {
        diagnostics.into_iter().filter_map(|d| self.apply(d)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreferenced() -> Diagnostic {
        Diagnostic::new(
            Message::UnreferencedSection {
                section: "fragment:Extras".into(),
            },
            vec![SourceLineNumber::new("extras.wxs", Some(4))],
        )
    }

    #[test]
    fn formats_like_a_compiler_message() {
        let d = Diagnostic::new(
            Message::NoEntryPoint { expected: None },
            vec![SourceLineNumber::new("product.wxs", Some(12))],
        );
        assert_eq!(
            d.to_string(),
            "product.wxs(12) : error ILD0093 : Could not find an entry section in the provided sections."
        );
    }

    #[test]
    fn nested_locations_produce_a_source_trace() {
        let inner = SourceLineNumber::new("inc.wxi", Some(3))
            .included_from(SourceLineNumber::new("main.wxs", Some(10)));
        let d = Diagnostic::new(Message::NoEntryPoint { expected: None }, vec![inner]);
        let text = d.to_string();
        assert!(text.starts_with("inc.wxi(3) : error"));
        assert!(text.contains("Source trace:\n\tat inc.wxi(3)\n\tat main.wxs(10)"), "{text}");
    }

    #[test]
    fn filter_suppresses_and_elevates_warnings() {
        let mut filter = MessageFilter::default();
        assert_eq!(filter.apply(unreferenced()).unwrap().severity, Severity::Warning);

        filter.elevated_warnings.insert(1079);
        assert_eq!(filter.apply(unreferenced()).unwrap().severity, Severity::Error);

        filter.suppressed_warnings.insert(1079);
        assert!(filter.apply(unreferenced()).is_none());
    }

    #[test]
    fn filter_never_drops_errors() {
        let filter = MessageFilter {
            suppress_all_warnings: true,
            ..MessageFilter::default()
        };
        let error = Diagnostic::new(Message::NoEntryPoint { expected: None }, vec![]);
        assert_eq!(filter.apply_all(vec![error.clone(), unreferenced()]), vec![error]);
    }

    #[test]
    fn accumulator_counts_errors() {
        let mut diags = Diagnostics::new();
        diags.push(unreferenced());
        assert!(!diags.has_errors());
        diags.report(Message::NoEntryPoint { expected: None }, vec![]);
        assert!(diags.has_errors());
        assert_eq!((diags.len(), diags.error_count()), (2, 1));
    }
}
