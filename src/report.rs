//! Format-agnostic result tree and the writers that serialise it.
//!
//! Every module's report goes in as a serde value under the module's name.
//! Writers only walk the tree and never know which module produced a node.
use crate::error::{Error, Result};
use crate::input::OutputFormat;
use chrono::{DateTime, Local};
use log::info;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;
use serde_derive::Serialize;
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

pub const XML_ROOT: &str = "SpotterResults";
const XML_ITEM: &str = "item";
const RULE_WIDTH: usize = 80;

/// Module name → module report, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Report {
    sections: Map<String, Value>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the section called `name`.
    pub fn insert<T: Serialize>(&mut self, name: &str, section: &T) -> Result<()> {
        let value = serde_json::to_value(section).map_err(|e| Error::parse("report section", e))?;
        self.sections.insert(name.to_owned(), value);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => to_json(self),
            OutputFormat::Xml => to_xml(self),
            OutputFormat::Txt => Ok(to_text(self)),
        }
    }
}

pub fn to_json(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(|e| Error::parse("JSON report", e))
}

pub fn to_xml(report: &Report) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    emit(&mut writer, Event::Start(BytesStart::new(XML_ROOT)))?;
    for (key, value) in &report.sections {
        write_xml_node(&mut writer, &xml_name(key), value)?;
    }
    emit(&mut writer, Event::End(BytesEnd::new(XML_ROOT)))?;

    String::from_utf8(writer.into_inner().into_inner()).map_err(|e| Error::parse("XML report", e))
}

fn emit(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> Result<()> {
    writer.write_event(event).map_err(io::Error::other)?;
    Ok(())
}

fn write_xml_node(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, value: &Value) -> Result<()> {
    emit(writer, Event::Start(BytesStart::new(name)))?;
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                write_xml_node(writer, &xml_name(key), child)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                write_xml_node(writer, XML_ITEM, item)?;
            }
        }
        scalar => emit(writer, Event::Text(BytesText::new(&scalar_text(scalar))))?,
    }
    emit(writer, Event::End(BytesEnd::new(name)))
}

/// Makes `key` a legal element name: separators become `_`, anything else
/// outside `[A-Za-z0-9_.]` too, and a leading digit gets a `_` prefix.
pub fn xml_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        name.insert(0, '_');
    }
    name
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn to_text(report: &Report) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = format!("{rule}\nSPOTTER RECONNAISSANCE REPORT\n{rule}\n\n");
    write_text_map(&mut out, &report.sections, 0);
    out
}

fn write_text_map(out: &mut String, map: &Map<String, Value>, depth: usize) {
    let indent = "  ".repeat(depth);
    for (key, value) in map {
        match value {
            Value::Object(child) => {
                let _ = writeln!(out, "{indent}{key}:");
                write_text_map(out, child, depth + 1);
            }
            Value::Array(items) => {
                let _ = writeln!(out, "{indent}{key}:");
                for (i, item) in items.iter().enumerate() {
                    if let Value::Object(child) = item {
                        let _ = writeln!(out, "{indent}  [{}]", i + 1);
                        write_text_map(out, child, depth + 2);
                    } else {
                        let _ = writeln!(out, "{indent}  - {}", scalar_text(item));
                    }
                }
            }
            scalar => {
                let _ = writeln!(out, "{indent}{key}: {}", scalar_text(scalar));
            }
        }
    }
}

/// `<target with dots as underscores>_<YYYYmmdd_HHMMSS>.<ext>`
pub fn file_name(target: &str, format: OutputFormat, at: DateTime<Local>) -> String {
    format!(
        "{}_{}.{}",
        target.replace('.', "_"),
        at.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// Renders `report` and writes it under `dir`, creating `dir` if needed.
pub fn save_results(
    report: &Report,
    dir: &Path,
    target: &str,
    format: OutputFormat,
) -> Result<PathBuf> {
    let rendered = report.render(format)?;
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name(target, format, Local::now()));
    fs::write(&path, rendered)?;
    info!("Results saved to: {}", path.display());
    Ok(path)
}
