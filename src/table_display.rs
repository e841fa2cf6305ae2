use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use crossterm::style::Stylize;
use serde_json::{Map, Value};
use std::io::Write;

use crate::config::OutputFormat;

/// Rows carried by a response: the `Rows` member of an object, or the
/// response itself when the service answers with a bare array.
pub fn response_rows(response: &Value) -> Option<&[Value]> {
    match response {
        Value::Array(rows) => Some(rows.as_slice()),
        Value::Object(obj) => obj.get("Rows").and_then(Value::as_array).map(Vec::as_slice),
        _ => None,
    }
}

/// Column names in first-seen order across all object rows.
fn column_names(rows: &[Value]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for obj in rows.iter().filter_map(Value::as_object) {
        for key in obj.keys() {
            if !names.iter().any(|n| n == key) {
                names.push(key.clone());
            }
        }
    }
    names
}

fn cell_text(obj: &Map<String, Value>, field: &str) -> String {
    match obj.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Null) => "NULL".to_string(),
        Some(v) => v.to_string(),
        None => "".to_string(),
    }
}

pub fn render_table(rows: &[Value]) -> Table {
    let fields = column_names(rows);

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    let headers: Vec<Cell> = fields
        .iter()
        .map(|f| Cell::new(f).add_attribute(Attribute::Bold))
        .collect();
    table.set_header(headers);

    for obj in rows.iter().filter_map(Value::as_object) {
        let row: Vec<String> = fields.iter().map(|field| cell_text(obj, field)).collect();
        table.add_row(row);
    }

    table
}

pub fn write_csv<W: Write>(rows: &[Value], out: W) -> Result<(), csv::Error> {
    let fields = column_names(rows);
    let mut wtr = csv::Writer::from_writer(out);

    wtr.write_record(&fields)?;
    for obj in rows.iter().filter_map(Value::as_object) {
        let record: Vec<String> = fields.iter().map(|field| cell_text(obj, field)).collect();
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn display_response(response: &Value, format: OutputFormat) -> anyhow::Result<()> {
    match (format, response_rows(response)) {
        (OutputFormat::Json, _) => println!("{}", serde_json::to_string(response)?),
        (OutputFormat::Table, Some(rows)) => {
            if rows.is_empty() {
                println!("{}", "No rows returned.".yellow());
            } else {
                println!("{}", render_table(rows));
                println!("\n{}", format!("{} rows returned", rows.len()).green());
            }
        }
        (OutputFormat::Csv, Some(rows)) => write_csv(rows, std::io::stdout().lock())?,
        _ => println!("{}", serde_json::to_string_pretty(response)?),
    }
    Ok(())
}
