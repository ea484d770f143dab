//! Tabular extraction value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column value type, driving per-type normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Number,
    Currency,
    Date,
    YesNo,
    Tag,
    MultiTag,
    Verbatim,
    BulletedList,
}

/// One column specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub column_id: String,
    pub label: String,
    pub column_type: ColumnType,

    /// Extraction prompt for this column.
    pub prompt: String,

    /// Type-specific configuration: `options` for tag columns,
    /// `reference_date` for relative dates.
    #[serde(default)]
    pub config: Value,
}

impl ColumnSpec {
    /// The option list of a tag-typed column.
    pub fn options(&self) -> Vec<String> {
        self.config
            .get("options")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A tabular extraction request: one row per file, one cell per
/// (file, column).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabularRequest {
    pub review_id: String,
    pub case_id: String,
    pub file_ids: Vec<String>,
    pub columns: Vec<ColumnSpec>,

    /// Cells below this confidence trigger HITL when enabled.
    pub confidence_threshold: f64,

    pub enable_hitl: bool,
}

/// Cell lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Pending,
    Extracted,
    Conflict,
    Empty,
    ManualOverride,
}

/// One history entry; history is append-only and the current row always
/// reflects the latest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellHistoryEntry {
    pub changed_by: String,
    pub change_type: String,
    pub previous_value: Value,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// One extracted cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellExtraction {
    pub review_id: String,
    pub file_id: String,
    pub column_id: String,

    pub value: Value,

    /// Type-normalized form (numeric for currency, ISO for dates).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub normalized_value: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbatim_quote: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_page: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_section: Option<String>,

    pub confidence: f64,
    pub status: CellStatus,

    /// Competing values when passages disagree.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Value>,

    #[serde(default)]
    pub history: Vec<CellHistoryEntry>,
}

impl CellExtraction {
    /// The `file:column` identifier used in clarification requests.
    pub fn cell_id(&self) -> String {
        format!("{}:{}", self.file_id, self.column_id)
    }

    /// Apply a change, appending the history entry.
    pub fn apply_change(
        &mut self,
        value: Value,
        status: CellStatus,
        changed_by: &str,
        change_type: &str,
        reason: &str,
    ) {
        self.history.push(CellHistoryEntry {
            changed_by: changed_by.to_string(),
            change_type: change_type.to_string(),
            previous_value: self.value.clone(),
            reason: reason.to_string(),
            at: Utc::now(),
        });
        self.value = value;
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_id_format() {
        let cell = CellExtraction {
            review_id: "r1".into(),
            file_id: "f1".into(),
            column_id: "amount".into(),
            value: json!("500000"),
            normalized_value: Value::Null,
            verbatim_quote: None,
            source_page: None,
            source_section: None,
            confidence: 0.9,
            status: CellStatus::Extracted,
            candidates: vec![],
            history: vec![],
        };
        assert_eq!(cell.cell_id(), "f1:amount");
    }

    #[test]
    fn test_apply_change_appends_history() {
        let mut cell = CellExtraction {
            review_id: "r1".into(),
            file_id: "f1".into(),
            column_id: "amount".into(),
            value: json!("500000"),
            normalized_value: Value::Null,
            verbatim_quote: None,
            source_page: None,
            source_section: None,
            confidence: 0.6,
            status: CellStatus::Conflict,
            candidates: vec![json!("500000"), json!("550000")],
            history: vec![],
        };

        cell.apply_change(
            json!("550000"),
            CellStatus::ManualOverride,
            "u1",
            "manual_override",
            "confirmed by reviewer",
        );

        assert_eq!(cell.value, json!("550000"));
        assert_eq!(cell.status, CellStatus::ManualOverride);
        assert_eq!(cell.history.len(), 1);
        assert_eq!(cell.history[0].previous_value, json!("500000"));
        assert_eq!(cell.history[0].change_type, "manual_override");
    }

    #[test]
    fn test_tag_options() {
        let column = ColumnSpec {
            column_id: "status".into(),
            label: "Статус".into(),
            column_type: ColumnType::Tag,
            prompt: "Статус документа".into(),
            config: json!({"options": ["подписан", "проект"]}),
        };
        assert_eq!(column.options(), vec!["подписан", "проект"]);
    }
}
