//! Output writer.
//!
//! Persists a linked `Output` as a JSON document for the binder. The document is fully
//! determined by the output: tables, rows and variables keep link order.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::intermediate::DOCUMENT_VERSION;
use crate::localization::{ControlKey, LocalizedControl, LocalizedString};
use crate::output::{Output, OutputTable, OutputType};
use crate::row::FieldValue;
use crate::section::{ComplexReference, EntityRef};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TableDocument<'a> {
    name: &'a str,
    columns: Vec<&'a str>,
    rows: Vec<&'a [FieldValue]>,
}

impl<'a> From<&'a OutputTable> for TableDocument<'a> {
    fn from(table: &'a OutputTable) -> Self {
        Self {
            name: table.name(),
            columns: table.definition.columns.iter().map(|c| c.name.as_str()).collect(),
            rows: table.rows.iter().map(|r| r.fields()).collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ControlDocument<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    dialog: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    control: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    x: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    y: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u16>,
    attributes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

impl<'a> ControlDocument<'a> {
    fn new(key: &'a ControlKey, control: &'a LocalizedControl) -> Self {
        Self {
            dialog: key.dialog.as_deref(),
            control: key.control.as_deref(),
            x: control.x,
            y: control.y,
            width: control.width,
            height: control.height,
            attributes: control.attributes.bits(),
            text: control.text.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct OwnerDocument<'a> {
    child: &'a EntityRef,
    parent: &'a EntityRef,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputDocument<'a> {
    version: u32,
    output_type: OutputType,
    entry: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    codepage: Option<u32>,
    cultures: &'a [String],
    tables: Vec<TableDocument<'a>>,
    variables: Vec<&'a LocalizedString>,
    controls: Vec<ControlDocument<'a>>,
    complex_references: &'a [ComplexReference],
    owners: Vec<OwnerDocument<'a>>,
}

impl<'a> From<&'a Output> for OutputDocument<'a> {
    fn from(output: &'a Output) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            output_type: output.output_type,
            entry: &output.entry,
            codepage: output.codepage,
            cultures: &output.cultures,
            tables: output.tables.values().map(TableDocument::from).collect(),
            variables: output.variables.values().collect(),
            controls: output
                .controls
                .iter()
                .map(|(key, control)| ControlDocument::new(key, control))
                .collect(),
            complex_references: &output.complex_references,
            owners: output
                .owners
                .iter()
                .map(|(child, parent)| OwnerDocument { child, parent })
                .collect(),
        }
    }
}

/// Serializes `output` to pretty-printed JSON.
pub fn to_json(output: &Output) -> Result<Vec<u8>> {
    let mut buffer = serde_json::to_vec_pretty(&OutputDocument::from(output)).context("failed to serialize output")?;
    buffer.push(b'\n');
    Ok(buffer)
}

/// Writes the linked output to `path`.
pub fn write_output(output: &Output, path: &Path) -> Result<()> {
    let buffer = to_json(output)?;
    std::fs::write(path, &buffer).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), bytes = buffer.len(), "wrote output");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;
    use crate::table::TableDefinitions;
    use std::sync::Arc;

    #[test]
    fn serializes_tables_in_link_order() {
        let defs = TableDefinitions::standard();
        let mut output = Output::new(OutputType::Product, "P");
        for (name, value) in [("B", "2"), ("A", "1")] {
            let row = Row::new(Arc::clone(defs.require("Property").unwrap()), vec![name.into(), value.into()]).unwrap();
            output.push_row(Arc::new(row));
        }
        output
            .variables
            .insert("Title".into(), LocalizedString::new("Title", "Setup", false));

        let json: serde_json::Value = serde_json::from_slice(&to_json(&output).unwrap()).unwrap();
        assert_eq!(json["outputType"], "product");
        assert_eq!(json["tables"][0]["name"], "Property");
        assert_eq!(json["tables"][0]["columns"], serde_json::json!(["Property", "Value"]));
        assert_eq!(json["tables"][0]["rows"], serde_json::json!([["B", "2"], ["A", "1"]]));
        assert_eq!(json["variables"][0]["value"], "Setup");
    }
}
