//! Large-result offloading.
//!
//! State must stay small enough to checkpoint cheaply: results above a
//! size or item-count threshold are written to
//! `agent_results/{case_id}` and replaced in state by a reference whose
//! summary carries counts and up to three samples per collection.

use crate::registry::AgentKind;
use crate::state::ResultSlot;
use lexgraph_core::store::{Store, StoreError, StoreRef};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

const SAMPLES_PER_COLLECTION: usize = 3;

/// Build the compact summary placed in state for an offloaded value:
/// per-array counts plus up to three samples, scalar fields carried
/// through.
pub fn summarize_result(value: &Value) -> Value {
    match value {
        Value::Array(items) => json!({
            "count": items.len(),
            "samples": items.iter().take(SAMPLES_PER_COLLECTION).cloned().collect::<Vec<_>>(),
        }),
        Value::Object(map) => {
            let mut summary = Map::new();
            for (key, field) in map {
                match field {
                    Value::Array(items) => {
                        summary.insert(format!("{key}_count"), json!(items.len()));
                        summary.insert(
                            format!("{key}_samples"),
                            json!(items
                                .iter()
                                .take(SAMPLES_PER_COLLECTION)
                                .cloned()
                                .collect::<Vec<_>>()),
                        );
                    }
                    Value::String(s) if s.len() > 200 => {
                        let cut = s
                            .char_indices()
                            .take_while(|(i, _)| *i < 200)
                            .last()
                            .map(|(i, c)| i + c.len_utf8())
                            .unwrap_or(0);
                        summary.insert(key.clone(), json!(&s[..cut]));
                    }
                    scalar => {
                        summary.insert(key.clone(), scalar.clone());
                    }
                }
            }
            Value::Object(summary)
        }
        scalar => scalar.clone(),
    }
}

/// Whether a result should be offloaded: serialized size above
/// `size_bytes` or any contained list longer than `list_items`.
pub fn should_offload(value: &Value, size_bytes: usize, list_items: usize) -> bool {
    let serialized = serde_json::to_vec(value).map(|b| b.len()).unwrap_or(0);
    if serialized > size_bytes {
        return true;
    }
    longest_list(value) > list_items
}

fn longest_list(value: &Value) -> usize {
    match value {
        Value::Array(items) => items
            .len()
            .max(items.iter().map(longest_list).max().unwrap_or(0)),
        Value::Object(map) => map.values().map(longest_list).max().unwrap_or(0),
        _ => 0,
    }
}

/// Store a result and return the reference slot; or keep it inline when
/// small enough.
pub async fn store_or_inline(
    store: &Arc<dyn Store>,
    case_id: &str,
    run_id: &str,
    kind: AgentKind,
    value: Value,
    size_bytes: usize,
    list_items: usize,
) -> Result<ResultSlot, StoreError> {
    if !should_offload(&value, size_bytes, list_items) {
        return Ok(ResultSlot::inline(value));
    }

    let namespace = format!("agent_results/{case_id}");
    let key = format!("{}_{run_id}", kind.as_str());
    let summary = summarize_result(&value);
    store.put(&namespace, &key, value).await?;
    debug!(%namespace, %key, "offloaded large agent result");

    Ok(ResultSlot::stored(
        StoreRef::new(namespace, key).with_summary(summary),
    ))
}

/// Resolve a slot to its full value, dereferencing through the store when
/// offloaded.
pub async fn resolve_slot(store: &Arc<dyn Store>, slot: &ResultSlot) -> Result<Value, StoreError> {
    match slot {
        ResultSlot::Inline(value) => Ok(value.clone()),
        ResultSlot::Stored(_) => {
            let store_ref = slot.as_stored().expect("stored slot");
            store.resolve(&store_ref).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexgraph_core::store::InMemoryStore;

    #[test]
    fn test_small_results_stay_inline() {
        let value = json!({"facts": ["a", "b"]});
        assert!(!should_offload(&value, 10 * 1024, 100));
    }

    #[test]
    fn test_large_payload_offloads() {
        let value = json!({"text": "x".repeat(11 * 1024)});
        assert!(should_offload(&value, 10 * 1024, 100));
    }

    #[test]
    fn test_long_list_offloads() {
        let items: Vec<Value> = (0..101).map(|i| json!(i)).collect();
        let value = json!({"events": items});
        assert!(should_offload(&value, 10 * 1024 * 1024, 100));
    }

    #[test]
    fn test_summary_counts_and_samples() {
        let items: Vec<Value> = (0..10).map(|i| json!({"n": i})).collect();
        let summary = summarize_result(&json!({"events": items, "note": "short"}));
        assert_eq!(summary["events_count"], 10);
        assert_eq!(summary["events_samples"].as_array().unwrap().len(), 3);
        assert_eq!(summary["note"], "short");
    }

    #[tokio::test]
    async fn test_store_or_inline_roundtrip() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let big: Vec<Value> = (0..200).map(|i| json!({"event": i})).collect();
        let value = json!({"events": big});

        let slot = store_or_inline(&store, "C1", "r1", AgentKind::KeyFacts, value.clone(), 10 * 1024, 100)
            .await
            .unwrap();

        let stored = slot.as_stored().expect("offloaded");
        assert_eq!(stored.namespace, "agent_results/C1");
        assert_eq!(stored.key, "key_facts_r1");
        assert_eq!(slot.summary_view()["events_count"], 200);

        let resolved = resolve_slot(&store, &slot).await.unwrap();
        assert_eq!(resolved, value);
    }

    #[tokio::test]
    async fn test_inline_resolution_is_identity() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let slot = ResultSlot::inline(json!({"k": 1}));
        assert_eq!(resolve_slot(&store, &slot).await.unwrap(), json!({"k": 1}));
    }
}
