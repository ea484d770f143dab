//! Streaming events with bounded backpressure.
//!
//! Every run owns one [`EventSink`] feeding the transport. The queue is
//! bounded (default 256); when the consumer falls behind, `emit` awaits
//! until space frees up. Agents keep running while their emits wait, and
//! events are never dropped.
//!
//! Events are JSON objects. The transport frames them as server-sent
//! events: one `data: {json}` line per event and a literal `data: [DONE]`
//! terminator.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Default capacity of the event queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

/// Receiving half of an event channel.
pub type EventStream = ReceiverStream<Value>;

/// Sending half of a run's event channel.
///
/// Cloned into every node context and agent runtime. A sink constructed
/// with [`EventSink::disconnected`] silently discards events, which keeps
/// unit tests free of channel plumbing.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<Value>>,
}

impl EventSink {
    /// Create a bounded event channel with the given capacity.
    pub fn channel(capacity: usize) -> (Self, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, ReceiverStream::new(rx))
    }

    /// Create a channel with the default capacity.
    pub fn bounded() -> (Self, EventStream) {
        Self::channel(DEFAULT_EVENT_QUEUE_CAPACITY)
    }

    /// A sink that discards everything.
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    /// Emit one event. Awaits when the queue is full (backpressure); a
    /// closed receiver means the consumer went away and the event is
    /// dropped silently.
    pub async fn emit(&self, event: Value) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }

    /// Whether a consumer is attached.
    pub fn is_connected(&self) -> bool {
        self.tx.is_some()
    }
}

/// Frame one event as an SSE line.
pub fn sse_encode(event: &Value) -> String {
    format!("data: {event}\n\n")
}

/// The SSE stream terminator.
pub fn sse_done() -> String {
    "data: [DONE]\n\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut stream) = EventSink::channel(8);
        sink.emit(json!({"type": "phase", "phase": "UNDERSTAND"})).await;
        sink.emit(json!({"type": "phase", "phase": "PLAN"})).await;
        drop(sink);

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!(first["phase"], "UNDERSTAND");
        assert_eq!(second["phase"], "PLAN");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_full_queue_applies_backpressure() {
        let (sink, mut stream) = EventSink::channel(1);
        sink.emit(json!({"n": 0})).await;

        // The queue is full; the second emit must wait for the consumer.
        let producer = tokio::spawn({
            let sink = sink.clone();
            async move { sink.emit(json!({"n": 1})).await }
        });
        tokio::task::yield_now().await;
        assert!(!producer.is_finished());

        assert_eq!(stream.next().await.unwrap()["n"], 0);
        producer.await.unwrap();
        drop(sink);
        assert_eq!(stream.next().await.unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn test_disconnected_sink_discards() {
        let sink = EventSink::disconnected();
        assert!(!sink.is_connected());
        sink.emit(json!({"ignored": true})).await;
    }

    #[test]
    fn test_sse_framing() {
        let line = sse_encode(&json!({"type": "complete"}));
        assert!(line.starts_with("data: {"));
        assert!(line.ends_with("\n\n"));
        assert_eq!(sse_done(), "data: [DONE]\n\n");
    }
}
