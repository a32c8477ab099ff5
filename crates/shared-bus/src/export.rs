//! # Event History Export
//!
//! Flattened serializations of persisted events in JSON, CSV or XML. Full
//! event data is included only on request.

use crate::error::BusError;
use crate::events::BusEvent;
use serde::{Deserialize, Serialize};
use shared_types::{Payload, Timestamp};
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Output format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    Xml,
}

impl FromStr for ExportFormat {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "xml" => Ok(Self::Xml),
            other => Err(BusError::Export(format!("unknown export format: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub include_data: bool,
}

impl ExportOptions {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            include_data: false,
        }
    }

    pub fn with_data(mut self) -> Self {
        self.include_data = true;
        self
    }
}

/// One flattened event row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedEvent {
    pub id: Uuid,
    pub name: String,
    pub channel: String,
    pub source_module: String,
    pub user: String,
    pub machine: String,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
}

impl ExportedEvent {
    fn from_event(event: &BusEvent, include_data: bool) -> Self {
        Self {
            id: event.id,
            name: event.name.clone(),
            channel: event.channel.clone(),
            source_module: event.source.module.clone(),
            user: event.source.user.clone(),
            machine: event.source.machine.clone(),
            timestamp: event.timestamp,
            data: include_data.then(|| event.data.clone()),
        }
    }
}

/// Serialize `events` in the requested format.
pub fn export_events(events: &[BusEvent], options: &ExportOptions) -> Result<String, BusError> {
    let rows: Vec<ExportedEvent> = events
        .iter()
        .map(|e| ExportedEvent::from_event(e, options.include_data))
        .collect();

    match options.format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(&rows).map_err(|e| BusError::Export(e.to_string()))
        }
        ExportFormat::Csv => Ok(to_csv(&rows, options.include_data)),
        ExportFormat::Xml => Ok(to_xml(&rows)),
    }
}

/// Export to a file, returning the number of events written.
pub fn export_to_file(
    path: &Path,
    events: &[BusEvent],
    options: &ExportOptions,
) -> Result<usize, BusError> {
    let body = export_events(events, options)?;
    std::fs::write(path, body)
        .map_err(|e| BusError::Export(format!("{}: {e}", path.display())))?;
    Ok(events.len())
}

/// Re-read a JSON export.
pub fn parse_json_export(input: &str) -> Result<Vec<ExportedEvent>, BusError> {
    serde_json::from_str(input).map_err(|e| BusError::Export(e.to_string()))
}

const CSV_HEADER: [&str; 7] = ["Id", "Name", "Channel", "SourceModule", "User", "Machine", "Timestamp"];

fn to_csv(rows: &[ExportedEvent], include_data: bool) -> String {
    let mut out = CSV_HEADER.join(",");
    if include_data {
        out.push_str(",Data");
    }
    out.push('\n');

    for row in rows {
        let mut fields = vec![
            row.id.to_string(),
            row.name.clone(),
            row.channel.clone(),
            row.source_module.clone(),
            row.user.clone(),
            row.machine.clone(),
            row.timestamp.to_rfc3339(),
        ];
        if include_data {
            fields.push(row.data.as_ref().map(|d| d.to_string()).unwrap_or_default());
        }
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn to_xml(rows: &[ExportedEvent]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<Events>\n");
    for row in rows {
        out.push_str("  <Event>\n");
        let _ = writeln!(out, "    <Id>{}</Id>", row.id);
        let _ = writeln!(out, "    <Name>{}</Name>", xml_escape(&row.name));
        let _ = writeln!(out, "    <Channel>{}</Channel>", xml_escape(&row.channel));
        let _ = writeln!(
            out,
            "    <SourceModule>{}</SourceModule>",
            xml_escape(&row.source_module)
        );
        let _ = writeln!(out, "    <User>{}</User>", xml_escape(&row.user));
        let _ = writeln!(out, "    <Machine>{}</Machine>", xml_escape(&row.machine));
        let _ = writeln!(out, "    <Timestamp>{}</Timestamp>", row.timestamp.to_rfc3339());
        if let Some(data) = &row.data {
            let _ = writeln!(out, "    <Data>{}</Data>", xml_escape(&data.to_string()));
        }
        out.push_str("  </Event>\n");
    }
    out.push_str("</Events>\n");
    out
}

fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
