//! Per-type cell normalization.

use crate::agents::validate::normalize_amount;
use crate::dates;
use crate::tabular::types::{ColumnSpec, ColumnType};
use chrono::NaiveDate;
use serde_json::{json, Value};

/// Result of normalizing one raw extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCell {
    pub value: Value,
    pub normalized_value: Value,
}

/// Normalize a raw extracted value against its column type.
///
/// `snippets` are the source passages the value came from; the verbatim
/// type requires the quote to be derivable from them.
pub fn normalize_cell(
    column: &ColumnSpec,
    raw: &Value,
    snippets: &[String],
) -> Result<NormalizedCell, String> {
    let text = raw.as_str().map(str::to_string).unwrap_or_else(|| raw.to_string());

    match column.column_type {
        ColumnType::Text => Ok(NormalizedCell {
            value: json!(text),
            normalized_value: Value::Null,
        }),
        ColumnType::Number => {
            let number: f64 = text
                .replace(',', ".")
                .replace(' ', "")
                .parse()
                .map_err(|_| format!("'{text}' is not a number"))?;
            Ok(NormalizedCell {
                value: json!(text),
                normalized_value: json!(number),
            })
        }
        ColumnType::Currency => {
            let numeric =
                normalize_amount(&text).ok_or_else(|| format!("'{text}' carries no amount"))?;
            // Original string preserved; numeric goes to the normalized
            // form.
            Ok(NormalizedCell {
                value: json!(text),
                normalized_value: json!(numeric),
            })
        }
        ColumnType::Date => {
            let reference = column
                .config
                .get("reference_date")
                .and_then(Value::as_str)
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
            let normalized = dates::parse_and_normalize_date(&text, reference)?;
            Ok(NormalizedCell {
                value: json!(text),
                normalized_value: json!(normalized),
            })
        }
        ColumnType::YesNo => {
            let lower = text.trim().to_lowercase();
            let mapped = match lower.as_str() {
                "yes" | "да" | "true" | "верно" => "Yes",
                "no" | "нет" | "false" | "неверно" => "No",
                _ => "Unknown",
            };
            Ok(NormalizedCell {
                value: json!(mapped),
                normalized_value: Value::Null,
            })
        }
        ColumnType::Tag => {
            let options = column.options();
            if options.is_empty() {
                return Err(format!("tag column {} has no options", column.column_id));
            }
            let matched = options
                .iter()
                .find(|o| o.eq_ignore_ascii_case(&text) || o.to_lowercase() == text.to_lowercase())
                .ok_or_else(|| format!("'{text}' is not one of the column options"))?;
            Ok(NormalizedCell {
                value: json!(matched),
                normalized_value: Value::Null,
            })
        }
        ColumnType::MultiTag => {
            let options = column.options();
            if options.is_empty() {
                return Err(format!("tag column {} has no options", column.column_id));
            }
            let raw_items: Vec<String> = match raw {
                Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect(),
                _ => text.split([',', ';']).map(|s| s.trim().to_string()).collect(),
            };
            let mut matched = Vec::new();
            for item in raw_items {
                if let Some(option) = options
                    .iter()
                    .find(|o| o.to_lowercase() == item.to_lowercase())
                {
                    matched.push(json!(option));
                }
            }
            if matched.is_empty() {
                return Err(format!("no value of '{text}' matches the column options"));
            }
            Ok(NormalizedCell {
                value: Value::Array(matched),
                normalized_value: Value::Null,
            })
        }
        ColumnType::Verbatim => {
            // The quote must be derivable from a source snippet.
            let found = snippets.iter().any(|s| s.contains(text.trim()));
            if !found {
                return Err("verbatim quote is not present in the source snippets".into());
            }
            Ok(NormalizedCell {
                value: json!(text),
                normalized_value: Value::Null,
            })
        }
        ColumnType::BulletedList => {
            let items: Vec<Value> = match raw {
                Value::Array(items) => items.clone(),
                _ => text
                    .lines()
                    .map(|l| l.trim_start_matches(['-', '*', '•']).trim())
                    .filter(|l| !l.is_empty())
                    .map(|l| json!(l))
                    .collect(),
            };
            if items.is_empty() {
                return Err("empty list".into());
            }
            Ok(NormalizedCell {
                value: Value::Array(items),
                normalized_value: Value::Null,
            })
        }
    }
}
