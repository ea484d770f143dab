//! Structured output parsing.
//!
//! Models are instructed to answer with a single JSON object, but answers
//! arrive wrapped in code fences or prose often enough that parsing
//! tolerates both. On failure the runtime retries once with a repair
//! prompt; a second failure yields a partial result.

use serde_json::Value;

/// Extract and parse the JSON object from an LLM answer.
pub fn parse_structured(text: &str, output_key: &str) -> Result<Value, String> {
    let candidate = extract_json(text).ok_or_else(|| "no JSON object found in answer".to_string())?;

    let value: Value =
        serde_json::from_str(&candidate).map_err(|e| format!("JSON parse failed: {e}"))?;

    if !value.is_object() {
        return Err("answer is not a JSON object".to_string());
    }
    if value.get(output_key).is_none() {
        return Err(format!("answer is missing required key '{output_key}'"));
    }
    Ok(value)
}

/// The repair prompt sent after a parse failure.
pub fn repair_prompt(original_answer: &str, error: &str, output_key: &str) -> String {
    format!(
        "Твой предыдущий ответ не удалось разобрать как JSON ({error}).\n\n\
         Предыдущий ответ:\n{original_answer}\n\n\
         Верни ТОЛЬКО валидный JSON-объект с полем \"{output_key}\", без пояснений и без markdown."
    )
}

/// Find the JSON object in a possibly fenced or prosaic answer.
fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();

    // Fenced block first.
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return Some(inner.to_string());
            }
        }
    }

    // Otherwise the outermost brace pair.
    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in trimmed[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(trimmed[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json_parses() {
        let value = parse_structured(r#"{"events": [{"date": "2023-09-20"}]}"#, "events").unwrap();
        assert_eq!(value["events"][0]["date"], "2023-09-20");
    }

    #[test]
    fn test_fenced_json_parses() {
        let text = "Вот результат:\n```json\n{\"facts\": [\"a\"]}\n```";
        let value = parse_structured(text, "facts").unwrap();
        assert_eq!(value["facts"][0], "a");
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let text = "Анализ завершён. {\"risks\": [{\"level\": \"high\"}]} Надеюсь, это поможет.";
        let value = parse_structured(text, "risks").unwrap();
        assert_eq!(value["risks"][0]["level"], "high");
    }

    #[test]
    fn test_nested_braces_and_strings() {
        let text = r#"{"facts": [{"fact": "сумма {в скобках} и \"кавычки\""}]}"#;
        let value = parse_structured(text, "facts").unwrap();
        assert!(value["facts"][0]["fact"].as_str().unwrap().contains("скобках"));
    }

    #[test]
    fn test_missing_key_is_error() {
        let err = parse_structured(r#"{"other": 1}"#, "events").unwrap_err();
        assert!(err.contains("events"));
    }

    #[test]
    fn test_no_json_is_error() {
        assert!(parse_structured("просто текст без JSON", "events").is_err());
    }

    #[test]
    fn test_repair_prompt_names_key() {
        let prompt = repair_prompt("bad", "missing brace", "events");
        assert!(prompt.contains("\"events\""));
        assert!(prompt.contains("missing brace"));
    }
}
