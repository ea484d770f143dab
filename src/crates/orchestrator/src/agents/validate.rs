//! Per-kind post-validation of parsed agent output.
//!
//! Normalizes what can be normalized (dates to ISO, currency to numeric,
//! risk levels to the fixed scale) and rejects what violates the kind's
//! contract. An empty discrepancy list is success, not failure.

use crate::dates;
use crate::registry::AgentKind;
use serde_json::{json, Value};
use tracing::debug;

const RISK_LEVELS: [&str; 4] = ["critical", "high", "medium", "low"];

/// Validate and normalize a parsed result in place.
pub fn validate(kind: AgentKind, value: &mut Value) -> Result<(), String> {
    match kind {
        AgentKind::Timeline => validate_timeline(value),
        AgentKind::Discrepancy => validate_discrepancies(value),
        AgentKind::Risk => validate_risks(value),
        AgentKind::Summary => validate_summary(value),
        AgentKind::EntityExtraction => validate_entities(value),
        _ => Ok(()),
    }
}

/// Dates normalized to `YYYY-MM-DD`; events with unusable dates are
/// dropped. All events unusable is a validation failure.
fn validate_timeline(value: &mut Value) -> Result<(), String> {
    let Some(events) = value.get_mut("events").and_then(Value::as_array_mut) else {
        return Err("validation failed: timeline result has no events array".into());
    };
    if events.is_empty() {
        return Ok(());
    }

    let total = events.len();
    let mut kept = Vec::with_capacity(total);
    for event in events.drain(..) {
        let Some(raw) = event.get("date").and_then(Value::as_str) else {
            continue;
        };
        match dates::parse_and_normalize_date(raw, None) {
            Ok(normalized) => {
                let mut event = event;
                event["date"] = json!(normalized);
                kept.push(event);
            }
            Err(reason) => {
                debug!(date = raw, %reason, "dropping timeline event with unusable date");
            }
        }
    }

    if kept.is_empty() {
        return Err(format!(
            "validation failed: none of {total} timeline events carried a usable date"
        ));
    }
    kept.sort_by(|a, b| {
        a["date"]
            .as_str()
            .unwrap_or("")
            .cmp(b["date"].as_str().unwrap_or(""))
    });
    *events = kept;
    Ok(())
}

/// Each discrepancy must reference two distinct documents. An empty list
/// is expected on clean document sets.
fn validate_discrepancies(value: &mut Value) -> Result<(), String> {
    let Some(items) = value.get_mut("discrepancies").and_then(Value::as_array_mut) else {
        return Err("validation failed: discrepancy result has no discrepancies array".into());
    };

    let before = items.len();
    items.retain(|item| {
        let a = item.get("document_a").and_then(Value::as_str).unwrap_or("");
        let b = item.get("document_b").and_then(Value::as_str).unwrap_or("");
        !a.is_empty() && !b.is_empty() && a != b
    });
    if items.len() < before {
        debug!(
            dropped = before - items.len(),
            "dropped discrepancies without two distinct documents"
        );
    }

    // Empty is success: no discrepancies were found.
    if items.is_empty() {
        value["expected_empty"] = json!(true);
    }
    Ok(())
}

/// Risk levels normalized to lowercase and restricted to the fixed scale.
fn validate_risks(value: &mut Value) -> Result<(), String> {
    let Some(risks) = value.get_mut("risks").and_then(Value::as_array_mut) else {
        return Err("validation failed: risk result has no risks array".into());
    };

    for risk in risks.iter_mut() {
        let level = risk
            .get("level")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        if !RISK_LEVELS.contains(&level.as_str()) {
            return Err(format!(
                "validation failed: risk level '{level}' is not one of {RISK_LEVELS:?}"
            ));
        }
        risk["level"] = json!(level);
    }
    Ok(())
}

fn validate_summary(value: &mut Value) -> Result<(), String> {
    match value.get("summary").and_then(Value::as_str) {
        Some(text) if !text.trim().is_empty() => Ok(()),
        _ => Err("validation failed: summary is empty".into()),
    }
}

/// Currency amounts keep the original string and gain a numeric
/// normalization.
fn validate_entities(value: &mut Value) -> Result<(), String> {
    let Some(entities) = value.get_mut("entities").and_then(Value::as_array_mut) else {
        return Err("validation failed: entity result has no entities array".into());
    };

    for entity in entities.iter_mut() {
        let is_amount = entity
            .get("entity_type")
            .and_then(Value::as_str)
            .map(|t| {
                let t = t.to_lowercase();
                t.contains("amount") || t.contains("сумм") || t.contains("currency")
            })
            .unwrap_or(false);
        if !is_amount {
            continue;
        }
        if let Some(raw) = entity.get("value").and_then(Value::as_str) {
            if let Some(numeric) = normalize_amount(raw) {
                entity["normalized_value"] = json!(numeric);
            }
        }
    }
    Ok(())
}

/// Extract the numeric part of a currency string: "1 500 000,50 руб." is
/// 1500000.5.
pub fn normalize_amount(raw: &str) -> Option<f64> {
    let mut digits = String::new();
    let mut seen_decimal = false;
    for ch in raw.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            ',' | '.' if !seen_decimal && !digits.is_empty() => {
                // Treat the last separator group of 1-2 digits as decimals;
                // thousands separators are swallowed below.
                digits.push('.');
                seen_decimal = true;
            }
            ' ' | '\u{a0}' => {}
            _ => {}
        }
    }
    // A "decimal" point followed by exactly three digits was a thousands
    // separator.
    if seen_decimal {
        if let Some(dot) = digits.find('.') {
            if digits.len() - dot - 1 == 3 {
                digits.remove(dot);
            }
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}
