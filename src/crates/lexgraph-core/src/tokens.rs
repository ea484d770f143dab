//! Coarse token estimation.
//!
//! Context-overflow decisions use an approximation of four bytes per token
//! over the serialized JSON representation. Deliberately coarse; the
//! threshold it is compared against is configurable, so a real tokenizer
//! can replace this later without touching call sites.

use serde::Serialize;

const BYTES_PER_TOKEN: usize = 4;

/// Estimate the token count of any serializable value.
///
/// Returns 0 when the value cannot be serialized; overflow checks treat
/// that as "no pressure" rather than failing the run.
pub fn estimate_tokens<T: Serialize>(value: &T) -> usize {
    match serde_json::to_vec(value) {
        Ok(bytes) => bytes.len() / BYTES_PER_TOKEN,
        Err(_) => 0,
    }
}

/// Estimate the token count of an already-serialized JSON value.
pub fn estimate_value_tokens(value: &serde_json::Value) -> usize {
    estimate_tokens(value)
}

/// Estimate the token count of a text fragment.
pub fn estimate_text_tokens(text: &str) -> usize {
    text.len() / BYTES_PER_TOKEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate_scales_with_size() {
        let small = json!({"a": 1});
        let large = json!({"a": "x".repeat(4000)});
        assert!(estimate_value_tokens(&large) > estimate_value_tokens(&small));
        // 4000 chars of payload is roughly a thousand tokens
        assert!(estimate_value_tokens(&large) >= 1000);
    }

    #[test]
    fn test_text_estimate() {
        assert_eq!(estimate_text_tokens("abcdefgh"), 2);
    }
}
