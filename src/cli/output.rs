//! Output formatting for read-only commands.
//!
//! Human-readable tables by default, JSON with `--json`.

use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print a list in the chosen mode
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    println!("{}", render_items(items, mode)?);
    Ok(())
}

/// Print one record. Table mode renders it as key/value pairs.
pub fn print_item<T: Serialize>(item: &T, mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(item)?),
        OutputMode::Table => {
            let value = serde_json::to_value(item)?;
            let rows: Vec<KeyValueRow> = match value {
                serde_json::Value::Object(map) => map
                    .into_iter()
                    .map(|(key, value)| KeyValueRow {
                        key,
                        value: display_value(&value),
                    })
                    .collect(),
                other => vec![KeyValueRow {
                    key: "value".to_string(),
                    value: display_value(&other),
                }],
            };
            println!("{}", Table::new(rows));
        }
    }
    Ok(())
}

pub fn render_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<String> {
    Ok(match mode {
        OutputMode::Table if items.is_empty() => "(no results)".to_string(),
        OutputMode::Table => Table::new(items).to_string(),
        OutputMode::Json => serde_json::to_string_pretty(items)?,
    })
}

#[derive(Tabled)]
struct KeyValueRow {
    #[tabled(rename = "Field")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Tabled, Serialize)]
    struct Row {
        id: u32,
        name: String,
    }

    #[test]
    fn test_empty_table_placeholder() {
        let out = render_items::<Row>(&[], OutputMode::Table).unwrap();
        assert_eq!(out, "(no results)");
    }

    #[test]
    fn test_json_mode_serializes_rows() {
        let rows = vec![Row {
            id: 7,
            name: "SOL-USDC".into(),
        }];
        let out = render_items(&rows, OutputMode::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["id"], 7);
        assert_eq!(parsed[0]["name"], "SOL-USDC");
    }

    #[test]
    fn test_table_mode_has_headers() {
        let rows = vec![Row {
            id: 1,
            name: "BONK-SOL".into(),
        }];
        let out = render_items(&rows, OutputMode::Table).unwrap();
        assert!(out.contains("name"));
        assert!(out.contains("BONK-SOL"));
    }
}
