//! Localization sets.
//!
//! A localization set is the parsed form of one `.wxl` document: an optional culture,
//! an optional codepage, string variables and localized dialog controls. Sets are
//! immutable once parsed; `localizer` selects and merges them into a link.

use bitflags::bitflags;
use indexmap::IndexMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::diagnostic::SourceLineNumber;

/// Namespace of localization documents.
pub const WXL_NAMESPACE: &str = "http://wixtoolset.org/schemas/v4/wxl";

const ROOT_ELEMENT: &str = "WixLocalization";

/// Upper bound of control geometry values.
const MAX_GEOMETRY: u16 = i16::MAX as u16;

bitflags! {
    /// Layout flags of a localized control, using the installer's control attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControlAttributes: u32 {
        const RIGHT_TO_LEFT = 0x0000_0020;
        const RIGHT_ALIGNED = 0x0000_0040;
        const LEFT_SCROLL = 0x0000_0080;
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocalizationError {
    #[error("{path}: failed to read localization file: {message}")]
    Io { path: String, message: String },

    #[error("{location}: localization document is not valid XML: {message}")]
    Xml {
        location: SourceLineNumber,
        message: String,
    },

    #[error("{location}: the document element '{element}' is not a valid localization root; expected 'WixLocalization'")]
    InvalidDocumentElement {
        location: SourceLineNumber,
        element: String,
    },

    #[error("{location}: the 'WixLocalization' element has namespace '{found}'; expected 'http://wixtoolset.org/schemas/v4/wxl'")]
    InvalidNamespace {
        location: SourceLineNumber,
        found: String,
    },

    #[error("{location}: the '{parent}' element contains an unexpected child element '{element}'")]
    UnexpectedElement {
        location: SourceLineNumber,
        parent: String,
        element: String,
    },

    #[error("{location}: the '{element}' element contains an unexpected attribute '{attribute}'")]
    UnexpectedAttribute {
        location: SourceLineNumber,
        element: String,
        attribute: String,
    },

    #[error("{location}: the '{element}' element requires the '{attribute}' attribute")]
    ExpectedAttribute {
        location: SourceLineNumber,
        element: String,
        attribute: String,
    },

    #[error("{location}: the '{element}' element's '{attribute}' value '{value}' is not a legal identifier")]
    IllegalIdentifier {
        location: SourceLineNumber,
        element: String,
        attribute: String,
        value: String,
    },

    #[error("{location}: the '{attribute}' attribute must be 'yes' or 'no', found '{value}'")]
    InvalidYesNo {
        location: SourceLineNumber,
        attribute: String,
        value: String,
    },

    #[error("{location}: the '{attribute}' attribute value '{value}' must be an integer in 0..=32767")]
    IllegalInteger {
        location: SourceLineNumber,
        attribute: String,
        value: String,
    },

    #[error("{location}: '{value}' is not a valid codepage")]
    InvalidCodepage {
        location: SourceLineNumber,
        value: String,
    },

    #[error("{location}: the UI element's '{attribute}' attribute requires the 'Control' attribute")]
    IllegalAttributeWithoutControl {
        location: SourceLineNumber,
        attribute: String,
    },

    #[error("{location}: the UI element requires the 'Dialog' or 'Control' attribute")]
    ExpectedDialogOrControl { location: SourceLineNumber },

    #[error("{location}: the localization variable '{id}' is defined more than once and is not overridable")]
    DuplicateLocalizationIdentifier { location: SourceLineNumber, id: String },

    #[error("{location}: the localized control {key} is defined more than once")]
    DuplicatedUiLocalization {
        location: SourceLineNumber,
        key: ControlKey,
    },
}

/// A string variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedString {
    pub id: String,
    pub value: String,
    #[serde(default)]
    pub overridable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceLineNumber>,
}

impl LocalizedString {
    pub fn new(id: &str, value: &str, overridable: bool) -> Self {
        Self {
            id: id.to_string(),
            value: value.to_string(),
            overridable,
            source: None,
        }
    }
}

/// Identity of a localized control: the dialog, the control, or both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControlKey {
    pub dialog: Option<String>,
    pub control: Option<String>,
}

impl ControlKey {
    pub fn new(dialog: Option<&str>, control: Option<&str>) -> Self {
        Self {
            dialog: dialog.map(str::to_string),
            control: control.map(str::to_string),
        }
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.dialog, &self.control) {
            (Some(d), Some(c)) => write!(f, "'{d}/{c}'"),
            (Some(d), None) => write!(f, "'{d}'"),
            (None, Some(c)) => write!(f, "'/{c}'"),
            (None, None) => f.write_str("''"),
        }
    }
}

/// Geometry, text and layout flags of a localized control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizedControl {
    pub x: Option<u16>,
    pub y: Option<u16>,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub attributes: ControlAttributes,
    pub text: Option<String>,
    pub source: Option<SourceLineNumber>,
}

impl LocalizedControl {
    pub fn with_text(text: &str) -> Self {
        Self {
            x: None,
            y: None,
            width: None,
            height: None,
            attributes: ControlAttributes::empty(),
            text: Some(text.to_string()),
            source: None,
        }
    }
}

/// One parsed localization document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalizationSet {
    culture: Option<String>,
    codepage: Option<u32>,
    strings: IndexMap<String, LocalizedString>,
    controls: IndexMap<ControlKey, LocalizedControl>,
    source: Option<SourceLineNumber>,
}

impl LocalizationSet {
    /// An empty set. Cultures are compared case-insensitively and stored lower-cased;
    /// an empty culture means neutral.
    pub fn new(culture: Option<&str>) -> Self {
        Self {
            culture: culture.filter(|c| !c.is_empty()).map(str::to_ascii_lowercase),
            ..Self::default()
        }
    }

    pub fn with_codepage(mut self, codepage: u32) -> Self {
        self.codepage = Some(codepage);
        self
    }

    pub fn with_source(mut self, source: SourceLineNumber) -> Self {
        self.source = Some(source);
        self
    }

    pub fn culture(&self) -> Option<&str> {
        self.culture.as_deref()
    }

    pub fn is_neutral(&self) -> bool {
        self.culture.is_none()
    }

    pub fn codepage(&self) -> Option<u32> {
        self.codepage
    }

    pub fn source(&self) -> Option<&SourceLineNumber> {
        self.source.as_ref()
    }

    pub fn strings(&self) -> impl Iterator<Item = &LocalizedString> {
        self.strings.values()
    }

    pub fn string(&self, id: &str) -> Option<&LocalizedString> {
        self.strings.get(id)
    }

    pub fn controls(&self) -> impl Iterator<Item = (&ControlKey, &LocalizedControl)> {
        self.controls.iter()
    }

    pub fn control(&self, key: &ControlKey) -> Option<&LocalizedControl> {
        self.controls.get(key)
    }

    fn location(&self) -> SourceLineNumber {
        self.source.clone().unwrap_or_else(|| SourceLineNumber::file("<localization>"))
    }

    /// Adds a string variable. A non-overridable definition replaces an overridable one;
    /// a later overridable definition is ignored; two fixed definitions conflict.
    pub fn add_string(&mut self, string: LocalizedString) -> Result<(), LocalizationError> {
        match self.strings.get(&string.id) {
            None => {}
            Some(existing) if existing.overridable && !string.overridable => {}
            Some(_) if string.overridable => return Ok(()),
            Some(_) => {
                return Err(LocalizationError::DuplicateLocalizationIdentifier {
                    location: string.source.clone().unwrap_or_else(|| self.location()),
                    id: string.id,
                })
            }
        }
        self.strings.insert(string.id.clone(), string);
        Ok(())
    }

    pub fn add_control(&mut self, key: ControlKey, control: LocalizedControl) -> Result<(), LocalizationError> {
        if self.controls.contains_key(&key) {
            return Err(LocalizationError::DuplicatedUiLocalization {
                location: control.source.clone().unwrap_or_else(|| self.location()),
                key,
            });
        }
        self.controls.insert(key, control);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, LocalizationError> {
        let xml = std::fs::read_to_string(path).map_err(|e| LocalizationError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&xml, &path.display().to_string())
    }

    /// Parses a `WixLocalization` document. `file` names the document in locations.
    pub fn parse(xml: &str, file: &str) -> Result<Self, LocalizationError> {
        WxlParser::new(xml, file).parse()
    }

    /// Loads several documents in parallel. The result keeps the order of `paths`.
    pub fn load_all(paths: &[PathBuf]) -> Result<Vec<Self>, LocalizationError> {
        paths.par_iter().map(|path| Self::load(path)).collect()
    }
}

/// Single-pass reader over a localization document.
struct WxlParser<'a> {
    xml: &'a str,
    file: &'a str,
    reader: Reader<&'a [u8]>,
}

impl<'a> WxlParser<'a> {
    fn new(xml: &'a str, file: &'a str) -> Self {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        Self { xml, file, reader }
    }

    fn location(&self) -> SourceLineNumber {
        let position = (self.reader.buffer_position() as usize).min(self.xml.len());
        let line = self.xml.as_bytes()[..position].iter().filter(|b| **b == b'\n').count() + 1;
        SourceLineNumber::new(self.file, Some(line as u32))
    }

    fn xml_error(&self, error: impl fmt::Display) -> LocalizationError {
        LocalizationError::Xml {
            location: self.location(),
            message: error.to_string(),
        }
    }

    fn next_event(&mut self) -> Result<Event<'a>, LocalizationError> {
        self.reader.read_event().map_err(|e| self.xml_error(e))
    }

    fn parse(mut self) -> Result<LocalizationSet, LocalizationError> {
        loop {
            match self.next_event()? {
                Event::Start(e) => return self.parse_root(&e, false),
                Event::Empty(e) => return self.parse_root(&e, true),
                Event::Eof => {
                    return Err(LocalizationError::InvalidDocumentElement {
                        location: self.location(),
                        element: String::new(),
                    })
                }
                _ => {}
            }
        }
    }

    fn attributes(&self, element: &BytesStart<'_>) -> Result<Vec<(String, String)>, LocalizationError> {
        let mut attributes = Vec::new();
        for attr in element.attributes() {
            let attr = attr.map_err(|e| self.xml_error(e))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(|e| self.xml_error(e))?.into_owned();
            attributes.push((key, value));
        }
        Ok(attributes)
    }

    fn parse_root(&mut self, root: &BytesStart<'_>, empty: bool) -> Result<LocalizationSet, LocalizationError> {
        let location = self.location();
        let name = String::from_utf8_lossy(root.name().as_ref()).into_owned();
        if name != ROOT_ELEMENT {
            return Err(LocalizationError::InvalidDocumentElement { location, element: name });
        }

        let mut namespace = String::new();
        let mut culture = None;
        let mut codepage = None;
        for (key, value) in self.attributes(root)? {
            match key.as_str() {
                "xmlns" => namespace = value,
                "Codepage" => {
                    codepage = Some(value.trim().parse::<u32>().map_err(|_| {
                        LocalizationError::InvalidCodepage {
                            location: location.clone(),
                            value: value.clone(),
                        }
                    })?)
                }
                "Culture" => culture = Some(value),
                "Language" => {}
                k if k.starts_with("xmlns:") => {}
                _ => {
                    return Err(LocalizationError::UnexpectedAttribute {
                        location,
                        element: name,
                        attribute: key,
                    })
                }
            }
        }
        if namespace != WXL_NAMESPACE {
            return Err(LocalizationError::InvalidNamespace { location, found: namespace });
        }

        let mut set = LocalizationSet::new(culture.as_deref()).with_source(location);
        set.codepage = codepage;
        if empty {
            return Ok(set);
        }

        loop {
            match self.next_event()? {
                Event::Start(e) => self.parse_child(&mut set, &e, false)?,
                Event::Empty(e) => self.parse_child(&mut set, &e, true)?,
                Event::End(_) | Event::Eof => break,
                _ => {}
            }
        }
        tracing::trace!(
            culture = set.culture().unwrap_or("neutral"),
            strings = set.strings.len(),
            controls = set.controls.len(),
            "parsed localization {}",
            self.file
        );
        Ok(set)
    }

    fn parse_child(&mut self, set: &mut LocalizationSet, element: &BytesStart<'_>, empty: bool) -> Result<(), LocalizationError> {
        let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
        match name.as_str() {
            "String" => self.parse_string(set, element, empty),
            "UI" => self.parse_ui(set, element, empty),
            _ => Err(LocalizationError::UnexpectedElement {
                location: self.location(),
                parent: ROOT_ELEMENT.to_string(),
                element: name,
            }),
        }
    }

    /// Collects the text content up to the element's end tag.
    fn inner_text(&mut self, element: &str, empty: bool) -> Result<Option<String>, LocalizationError> {
        if empty {
            return Ok(None);
        }
        let mut text = String::new();
        loop {
            match self.next_event()? {
                Event::Text(t) => text.push_str(&t.unescape().map_err(|e| self.xml_error(e))?),
                Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
                Event::End(_) => break,
                Event::Start(e) | Event::Empty(e) => {
                    return Err(LocalizationError::UnexpectedElement {
                        location: self.location(),
                        parent: element.to_string(),
                        element: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    })
                }
                Event::Eof => return Err(self.xml_error(format!("unexpected end of document inside '{element}'"))),
                _ => {}
            }
        }
        Ok((!text.is_empty()).then_some(text))
    }

    fn parse_string(&mut self, set: &mut LocalizationSet, element: &BytesStart<'_>, empty: bool) -> Result<(), LocalizationError> {
        let location = self.location();
        let mut id = None;
        let mut overridable = false;
        for (key, value) in self.attributes(element)? {
            match key.as_str() {
                "Id" => id = Some(value),
                "Overridable" => overridable = yes_no(&location, &key, &value)?,
                "Localizable" => {}
                _ => {
                    return Err(LocalizationError::UnexpectedAttribute {
                        location,
                        element: "String".into(),
                        attribute: key,
                    })
                }
            }
        }

        let id = id.ok_or_else(|| LocalizationError::ExpectedAttribute {
            location: location.clone(),
            element: "String".into(),
            attribute: "Id".into(),
        })?;
        if id.is_empty() {
            return Err(LocalizationError::IllegalIdentifier {
                location,
                element: "String".into(),
                attribute: "Id".into(),
                value: id,
            });
        }

        let value = self.inner_text("String", empty)?.unwrap_or_default();
        set.add_string(LocalizedString {
            id,
            value,
            overridable,
            source: Some(location),
        })
    }

    fn parse_ui(&mut self, set: &mut LocalizationSet, element: &BytesStart<'_>, empty: bool) -> Result<(), LocalizationError> {
        let location = self.location();
        let mut dialog = None;
        let mut control = None;
        let mut localized = LocalizedControl {
            x: None,
            y: None,
            width: None,
            height: None,
            attributes: ControlAttributes::empty(),
            text: None,
            source: Some(location.clone()),
        };
        let mut first_flag = None;

        for (key, value) in self.attributes(element)? {
            match key.as_str() {
                "Dialog" => dialog = Some(value),
                "Control" => control = Some(value),
                "X" => localized.x = Some(geometry(&location, &key, &value)?),
                "Y" => localized.y = Some(geometry(&location, &key, &value)?),
                "Width" => localized.width = Some(geometry(&location, &key, &value)?),
                "Height" => localized.height = Some(geometry(&location, &key, &value)?),
                "RightToLeft" | "RightAligned" | "LeftScroll" => {
                    if yes_no(&location, &key, &value)? {
                        localized.attributes |= match key.as_str() {
                            "RightToLeft" => ControlAttributes::RIGHT_TO_LEFT,
                            "RightAligned" => ControlAttributes::RIGHT_ALIGNED,
                            _ => ControlAttributes::LEFT_SCROLL,
                        };
                        first_flag.get_or_insert(key);
                    }
                }
                _ => {
                    return Err(LocalizationError::UnexpectedAttribute {
                        location,
                        element: "UI".into(),
                        attribute: key,
                    })
                }
            }
        }
        localized.text = self.inner_text("UI", empty)?;

        let dialog = dialog.filter(|d| !d.is_empty());
        let control = control.filter(|c| !c.is_empty());
        if control.is_none() {
            if let Some(attribute) = first_flag {
                return Err(LocalizationError::IllegalAttributeWithoutControl { location, attribute });
            }
            if dialog.is_none() {
                return Err(LocalizationError::ExpectedDialogOrControl { location });
            }
        }

        set.add_control(ControlKey { dialog, control }, localized)
    }
}

fn yes_no(location: &SourceLineNumber, attribute: &str, value: &str) -> Result<bool, LocalizationError> {
    match value {
        "yes" => Ok(true),
        "no" => Ok(false),
        _ => Err(LocalizationError::InvalidYesNo {
            location: location.clone(),
            attribute: attribute.to_string(),
            value: value.to_string(),
        }),
    }
}

fn geometry(location: &SourceLineNumber, attribute: &str, value: &str) -> Result<u16, LocalizationError> {
    value
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|v| *v <= MAX_GEOMETRY)
        .ok_or_else(|| LocalizationError::IllegalInteger {
            location: location.clone(),
            attribute: attribute.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wxl(body: &str) -> String {
        format!(r#"<?xml version="1.0" encoding="utf-8"?>
<WixLocalization Culture="EN-us" Codepage="1252" xmlns="{WXL_NAMESPACE}">
{body}
</WixLocalization>"#)
    }

    #[test]
    fn parses_strings_and_controls() {
        let set = LocalizationSet::parse(
            &wxl(r#"
  <String Id="Greeting">Hello &amp; welcome</String>
  <String Id="Title" Overridable="yes"><![CDATA[<Setup>]]></String>
  <UI Dialog="WelcomeDlg" Control="Title" X="10" Y="20" RightToLeft="yes">Bienvenue</UI>
  <UI Dialog="ExitDlg" Width="370" Height="270" />"#),
            "en-us.wxl",
        )
        .unwrap();

        assert_eq!(set.culture(), Some("en-us"));
        assert_eq!(set.codepage(), Some(1252));
        assert_eq!(set.string("Greeting").unwrap().value, "Hello & welcome");
        let title = set.string("Title").unwrap();
        assert!(title.overridable);
        assert_eq!(title.value, "<Setup>");
        assert_eq!(title.source.as_ref().unwrap().file, "en-us.wxl");

        let control = set.control(&ControlKey::new(Some("WelcomeDlg"), Some("Title"))).unwrap();
        assert_eq!((control.x, control.y, control.width), (Some(10), Some(20), None));
        assert_eq!(control.attributes, ControlAttributes::RIGHT_TO_LEFT);
        assert_eq!(control.text.as_deref(), Some("Bienvenue"));

        let dialog = set.control(&ControlKey::new(Some("ExitDlg"), None)).unwrap();
        assert_eq!((dialog.width, dialog.height, dialog.text.clone()), (Some(370), Some(270), None));
    }

    #[test]
    fn neutral_document_has_no_culture() {
        let xml = format!(r#"<WixLocalization xmlns="{WXL_NAMESPACE}"><String Id="A">a</String></WixLocalization>"#);
        let set = LocalizationSet::parse(&xml, "neutral.wxl").unwrap();
        assert!(set.is_neutral());
        assert_eq!(set.codepage(), None);
    }

    #[test]
    fn fixed_definition_replaces_overridable_one_within_a_set() {
        let set = LocalizationSet::parse(
            &wxl(r#"
  <String Id="A" Overridable="yes">first</String>
  <String Id="A">second</String>
  <String Id="A" Overridable="yes">third</String>"#),
            "a.wxl",
        )
        .unwrap();
        assert_eq!(set.string("A").unwrap().value, "second");
        assert_eq!(set.strings().count(), 1);
    }

    #[test]
    fn duplicate_fixed_strings_fail_with_location() {
        let err = LocalizationSet::parse(&wxl("<String Id=\"A\">1</String>\n<String Id=\"A\">2</String>"), "dup.wxl")
            .unwrap_err();
        match err {
            LocalizationError::DuplicateLocalizationIdentifier { location, id } => {
                assert_eq!(id, "A");
                assert_eq!(location.file, "dup.wxl");
                assert_eq!(location.line, Some(4));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_controls_fail() {
        let err = LocalizationSet::parse(
            &wxl(r#"<UI Dialog="D" Control="C">a</UI><UI Dialog="D" Control="C">b</UI>"#),
            "ui.wxl",
        )
        .unwrap_err();
        assert!(matches!(err, LocalizationError::DuplicatedUiLocalization { key, .. } if key == ControlKey::new(Some("D"), Some("C"))));
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(matches!(
            LocalizationSet::parse("<Wix xmlns=\"x\"/>", "bad.wxl"),
            Err(LocalizationError::InvalidDocumentElement { element, .. }) if element == "Wix"
        ));
        assert!(matches!(
            LocalizationSet::parse("<WixLocalization xmlns=\"urn:other\"/>", "bad.wxl"),
            Err(LocalizationError::InvalidNamespace { found, .. }) if found == "urn:other"
        ));
        assert!(matches!(
            LocalizationSet::parse(&wxl("<Strin Id=\"A\"/>"), "bad.wxl"),
            Err(LocalizationError::UnexpectedElement { element, .. }) if element == "Strin"
        ));
        assert!(matches!(
            LocalizationSet::parse(&wxl("<String>no id</String>"), "bad.wxl"),
            Err(LocalizationError::ExpectedAttribute { attribute, .. }) if attribute == "Id"
        ));
        assert!(matches!(
            LocalizationSet::parse(&wxl("<String Id=\"\">x</String>"), "bad.wxl"),
            Err(LocalizationError::IllegalIdentifier { .. })
        ));
        assert!(matches!(
            LocalizationSet::parse(&wxl("<String Id=\"A\" Overridable=\"maybe\"/>"), "bad.wxl"),
            Err(LocalizationError::InvalidYesNo { .. })
        ));
    }

    #[test]
    fn ui_attribute_rules() {
        assert!(matches!(
            LocalizationSet::parse(&wxl("<UI Dialog=\"D\" LeftScroll=\"yes\"/>"), "ui.wxl"),
            Err(LocalizationError::IllegalAttributeWithoutControl { attribute, .. }) if attribute == "LeftScroll"
        ));
        assert!(matches!(
            LocalizationSet::parse(&wxl("<UI X=\"1\"/>"), "ui.wxl"),
            Err(LocalizationError::ExpectedDialogOrControl { .. })
        ));
        assert!(matches!(
            LocalizationSet::parse(&wxl("<UI Dialog=\"D\" X=\"40000\"/>"), "ui.wxl"),
            Err(LocalizationError::IllegalInteger { .. })
        ));
    }
}
