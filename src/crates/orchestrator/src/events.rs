//! Streaming event vocabulary.
//!
//! Every event is one JSON object; the transport frames them as SSE
//! (`data: {json}` lines, `data: [DONE]` terminator). Node-boundary
//! `phase` events are emitted by the graph engine; everything else is
//! emitted by the scheduler, the agent runtime and the tabular engine.

use crate::registry::AgentKind;
use lexgraph_core::stream::EventSink;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One clarification request item for HITL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClarificationItem {
    pub cell_id: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<Value>>,
}

/// Events produced during an analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisEvent {
    Phase {
        phase: String,
    },
    StepStarted {
        agent: AgentKind,
        step_id: String,
    },
    StepCompleted {
        agent: AgentKind,
        step_id: String,
        elapsed_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<Value>,
    },
    StepFailed {
        agent: AgentKind,
        step_id: String,
        kind: String,
        message: String,
        elapsed_ms: u64,
    },
    CacheHit {
        agent: AgentKind,
        key_fingerprint: String,
    },
    PartialToken {
        agent: AgentKind,
        text_delta: String,
    },
    ClarificationRequest {
        thread_id: String,
        requests: Vec<ClarificationItem>,
    },
    Error {
        kind: String,
        message: String,
    },
    Complete {
        run_id: String,
        result_refs: Value,
        succeeded: Vec<AgentKind>,
        failed: Vec<AgentKind>,
        result_count: usize,
    },
}

impl AnalysisEvent {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Emit onto a run's event sink.
    pub async fn emit(&self, sink: &EventSink) {
        sink.emit(self.to_value()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexgraph_core::stream::sse_encode;

    #[test]
    fn test_tagged_serialization() {
        let event = AnalysisEvent::StepCompleted {
            agent: AgentKind::Timeline,
            step_id: "timeline_step".into(),
            elapsed_ms: 42,
            summary: Some(serde_json::json!({"events": 3})),
        };
        let value = event.to_value();
        assert_eq!(value["type"], "step_completed");
        assert_eq!(value["agent"], "timeline");
        assert_eq!(value["summary"]["events"], 3);
    }

    #[test]
    fn test_sse_line_shape() {
        let event = AnalysisEvent::CacheHit {
            agent: AgentKind::KeyFacts,
            key_fingerprint: "abcd1234".into(),
        };
        let line = sse_encode(&event.to_value());
        assert!(line.starts_with("data: {"));
        assert!(line.contains("\"cache_hit\""));
    }

    #[test]
    fn test_clarification_request_carries_cells() {
        let event = AnalysisEvent::ClarificationRequest {
            thread_id: "case_C1".into(),
            requests: vec![ClarificationItem {
                cell_id: "f1:amount".into(),
                reason: "low confidence".into(),
                candidates: Some(vec![serde_json::json!("500000")]),
            }],
        };
        let value = event.to_value();
        assert_eq!(value["requests"][0]["cell_id"], "f1:amount");
    }
}
