//! PII detection and redaction.
//!
//! Applied to prompt inputs (messages and metadata) before every agent
//! run. Stored documents are never mutated; only the per-call view is
//! redacted. Redaction is idempotent: the placeholder contains nothing the
//! patterns match.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// The replacement placeholder.
pub const REDACTED: &str = "[REDACTED]";

struct Patterns {
    phones: Vec<Regex>,
    email: Regex,
    passport: Regex,
    ip: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        phones: vec![
            // Russian formats: +7 (915) 123-45-67, 8 915 123 45 67
            Regex::new(r"(?:\+7|8)\s?\(?\d{3}\)?\s?\d{3}[-.\s]?\d{2}[-.\s]?\d{2}")
                .expect("static regex"),
            // US format: 555-123-4567
            Regex::new(r"\b\d{3}[-.\s]\d{3}[-.\s]\d{4}\b").expect("static regex"),
            // International: +44 20 7946 0958
            Regex::new(r"\+\d{1,3}[-.\s]?\d{2,4}[-.\s]?\d{3,4}[-.\s]?\d{3,4}")
                .expect("static regex"),
        ],
        email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
            .expect("static regex"),
        // Russian passport: 4 digits series + 6 digits number
        passport: Regex::new(r"\b\d{4}\s?\d{6}\b").expect("static regex"),
        ip: Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("static regex"),
    })
}

/// Redact PII in a text fragment.
pub fn redact_text(text: &str) -> String {
    if text.is_empty() {
        return text.to_string();
    }

    let p = patterns();
    let mut result = text.to_string();
    for phone in &p.phones {
        result = phone.replace_all(&result, REDACTED).into_owned();
    }
    result = p.email.replace_all(&result, REDACTED).into_owned();
    result = p.passport.replace_all(&result, REDACTED).into_owned();
    result = p.ip.replace_all(&result, REDACTED).into_owned();
    result
}

/// Recursively redact every string in a JSON value.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_text(s)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_russian_phone_redacted() {
        let text = "Позвоните +7 (915) 123-45-67 завтра";
        let redacted = redact_text(text);
        assert!(!redacted.contains("915"));
        assert!(redacted.contains(REDACTED));
    }

    #[test]
    fn test_email_and_ip_redacted() {
        let redacted = redact_text("ivanov@example.com подключался с 192.168.1.10");
        assert!(!redacted.contains('@'));
        assert!(!redacted.contains("192.168"));
        assert_eq!(redacted.matches(REDACTED).count(), 2);
    }

    #[test]
    fn test_passport_redacted() {
        let redacted = redact_text("паспорт 4509 123456 выдан в 2015");
        assert!(!redacted.contains("123456"));
    }

    #[test]
    fn test_redaction_is_idempotent() {
        let once = redact_text("email: a@b.com, tel: 555-123-4567");
        let twice = redact_text(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_value_redaction_recurses() {
        let value = json!({
            "note": "a@b.com",
            "nested": {"phones": ["+7 915 123 45 67", "none"]},
            "count": 3
        });
        let redacted = redact_value(&value);
        assert_eq!(redacted["note"], REDACTED);
        assert_eq!(redacted["nested"]["phones"][0], REDACTED);
        assert_eq!(redacted["nested"]["phones"][1], "none");
        assert_eq!(redacted["count"], 3);
    }

    #[test]
    fn test_ordinary_text_untouched() {
        let text = "Договор подписан 20 сентября 2023 года";
        assert_eq!(redact_text(text), text);
    }
}
