//! Log inspection: renders a database log record-by-record for `show-log`.
//!
//! The standalone renderer keeps a map from row UUID to the row's last known
//! name (its `name` column when it has one, the first eight UUID characters
//! otherwise) so that successive changes to one row read coherently. The
//! clustered renderer only identifies known fields by name and prints them;
//! it does no semantic validation.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{Local, TimeZone};
use journal::Journal;
use model::{Datum, Schema, TableSchema};
use serde_json::{Map, Value};

/// Renders a standalone database log.
///
/// Verbosity 0 prints one header line per record; 1 adds per-row change
/// lines; 2 adds column values.
pub fn show_standalone(log: &mut Journal, verbosity: u8) -> Result<()> {
    let mut names: HashMap<String, String> = HashMap::new();
    let mut schema: Option<Schema> = None;

    for index in 0.. {
        let Some(json) = log.read()? else {
            break;
        };

        print!("record {index}:");
        if index == 0 {
            let parsed = Schema::from_json(&json)?;
            println!(
                " \"{}\" schema, version=\"{}\", cksum=\"{}\"",
                parsed.name, parsed.version, parsed.cksum
            );
            schema = Some(parsed);
        } else if let Some(obj) = json.as_object() {
            if let Some(date) = obj.get("_date").and_then(Value::as_i64) {
                print!(" {}", format_date(date));
            }
            if let Some(comment) = obj.get("_comment").and_then(Value::as_str) {
                print!(" \"{comment}\"");
            }
            if verbosity > 0 {
                println!();
                print_db_changes(obj, &mut names, schema.as_ref(), verbosity);
            }
        }
        println!();
    }
    Ok(())
}

/// Formats a `_date` stamp as local time with millisecond precision.
///
/// Early releases recorded `_date` in seconds; a value that fits in a signed
/// 32-bit integer is re-interpreted as seconds. (Millisecond stamps crossed
/// 2^31 back in 1970, so any real one is far above the bound.)
fn format_date(date: i64) -> String {
    let msec = if date < i32::MAX as i64 { date * 1000 } else { date };
    match Local.timestamp_millis_opt(msec).single() {
        Some(when) => when.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => format!("<invalid date {date}>"),
    }
}

fn print_db_changes(
    tables: &Map<String, Value>,
    names: &mut HashMap<String, String>,
    schema: Option<&Schema>,
    verbosity: u8,
) {
    for (table_name, rows) in tables {
        if table_name.starts_with('_') {
            continue;
        }
        let Some(rows) = rows.as_object() else {
            continue;
        };
        let table_schema = schema.and_then(|s| s.table(table_name));

        for (row_uuid, columns) in rows {
            let short_uuid = row_uuid.get(..8).unwrap_or(row_uuid);
            let old_name = names.get(row_uuid).cloned();
            let new_name = columns
                .as_object()
                .and_then(|cols| cols.get("name"))
                .map(|v| v.to_string())
                .or_else(|| old_name.clone());

            print!("\ttable {table_name}");
            match &old_name {
                None => match &new_name {
                    Some(name) => println!(" insert row {name} ({short_uuid}):"),
                    None => println!(" insert row {short_uuid}:"),
                },
                Some(name) => println!(" row {name} ({short_uuid}):"),
            }

            match columns {
                Value::Object(cols) => {
                    if verbosity > 1 {
                        for (column, value) in cols {
                            println!(
                                "\t\t{}={}",
                                column,
                                render_value(table_schema, column, value)
                            );
                        }
                    }
                    if old_name.is_none() || new_name != old_name {
                        names.insert(
                            row_uuid.clone(),
                            new_name.unwrap_or_else(|| short_uuid.to_string()),
                        );
                    }
                }
                Value::Null => {
                    println!("\t\tdelete row");
                    names.remove(row_uuid);
                }
                _ => {}
            }
        }
    }
}

/// Renders a column value through the schema's datum layer when possible,
/// raw JSON otherwise.
fn render_value(table_schema: Option<&TableSchema>, column: &str, value: &Value) -> String {
    if let Some(column) = table_schema.and_then(|ts| ts.column(column)) {
        if let Ok(datum) = Datum::from_json(column.ty, value) {
            return datum.to_display_string();
        }
    }
    value.to_string()
}

/// Renders a clustered database log: known fields are printed by name, and
/// nothing is validated.
pub fn show_cluster(log: &mut Journal) -> Result<()> {
    for index in 0.. {
        let Some(json) = log.read()? else {
            break;
        };

        println!("record {index}:");
        if let Some(obj) = json.as_object() {
            if index == 0 {
                print_member(obj, "name");
                print_member(obj, "address");
                print_uuid(obj, "server_id");
                print_uuid(obj, "cluster_id");
                print_servers(obj, "prev_servers");
                print_member(obj, "prev_term");
                print_member(obj, "prev_index");
                print_data(obj, "prev_data");
                print_member(obj, "remotes");
            } else {
                print_member(obj, "term");
                print_member(obj, "index");
                print_data(obj, "data");
                print_servers(obj, "servers");
                print_uuid(obj, "vote");
            }
        }
        println!();
    }
    Ok(())
}

fn print_member(obj: &Map<String, Value>, name: &str) {
    if let Some(value) = obj.get(name) {
        println!("\t{name}: {value}");
    }
}

fn print_uuid(obj: &Map<String, Value>, name: &str) {
    let Some(value) = obj.get(name) else {
        return;
    };
    match value.as_str() {
        Some(s) => println!("\t{name}: {}", s.get(..4).unwrap_or(s)),
        None => println!("\t{name}: ***invalid***"),
    }
}

fn print_servers(obj: &Map<String, Value>, name: &str) {
    let Some(value) = obj.get(name) else {
        return;
    };
    let Some(servers) = value.as_object() else {
        println!("\t{name}: ***invalid {name}***");
        return;
    };
    let rendered: Vec<String> = servers
        .iter()
        .map(|(server_id, address)| {
            let short_id = server_id.get(..4).unwrap_or(server_id);
            match address.as_str() {
                Some(addr) => format!("{short_id}({addr})"),
                None => format!("{short_id}(***invalid***)"),
            }
        })
        .collect();
    println!("\t{name}: {}", rendered.join(", "));
}

/// A clustered data member is `[schema-or-null, contents]`.
fn print_data(obj: &Map<String, Value>, name: &str) {
    let Some(data) = obj.get(name) else {
        return;
    };
    let Some(parts) = data.as_array().filter(|a| a.len() == 2) else {
        println!("\t***invalid data***");
        return;
    };

    if !parts[0].is_null() {
        match Schema::from_json(&parts[0]) {
            Ok(schema) => println!(
                "\tschema: \"{}\", version=\"{}\", cksum=\"{}\"",
                schema.name, schema.version, schema.cksum
            ),
            Err(_) => println!("\t***invalid schema***"),
        }
    }
    println!("\t{name}: {}", parts[1]);
}
